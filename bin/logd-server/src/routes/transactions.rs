//! `/api/transactions`: create, abort, status, and state-evolution watch
//! (`spec.md` §6's endpoint semantics table, first block).

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use logd_core::Node;
use logd_storage::{TransactionStateRecord, TransactionStatus};
use logd_transaction::TransactionId;
use logd_wire::TreeCodec;

use crate::error::ApiError;
use crate::state::{now_millis, AppState};
use crate::wire;

pub async fn dispatch(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    let result = match method.as_str() {
        "PATCH" => patch(&state, body).await,
        "MATCH" => match_(&state, body).await,
        "WATCH" => watch(&state, body).await,
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn patch(state: &AppState, body: Bytes) -> Result<Response, ApiError> {
    let envelope = state.codec.decode(&body)?;
    match wire::match_transaction_id(&envelope)? {
        None => create(state, &envelope).await,
        Some(raw) => abort(state, &envelope, raw).await,
    }
}

/// `PATCH /api/transactions` with `match: null`: create a transaction.
async fn create(state: &AppState, envelope: &Node) -> Result<Response, ApiError> {
    let participant_count = wire::patch_participant_count(envelope)?;
    let deadline = wire::meta_deadline_ms(envelope)?.map(Duration::from_millis);
    let id = state.coordinator.create(participant_count, deadline, now_millis())?;

    let response =
        wire::obj_field(vec![("patch", wire::obj_field(vec![("transactionId", Node::string(id.to_string()))]))]);
    Ok((StatusCode::OK, state.codec.encode(&response)).into_response())
}

/// `PATCH /api/transactions` with `match.transactionId` and
/// `patch: !delete null`: abort a transaction.
async fn abort(state: &AppState, envelope: &Node, raw_id: String) -> Result<Response, ApiError> {
    let patch = wire::require_patch(envelope)?;
    if patch.tag.as_ref().and_then(|t| t.operator_name()) != Some("delete") {
        return Err(ApiError::InvalidDiff("aborting a transaction requires patch: !delete null".into()));
    }

    let id = TransactionId::from_raw(raw_id);
    state.coordinator.abort(&id)?;

    let response = wire::obj_field(vec![("meta", wire::obj_field(vec![("transactionId", Node::string(id.to_string()))]))]);
    Ok((StatusCode::OK, state.codec.encode(&response)).into_response())
}

/// `MATCH /api/transactions` with `match.transactionId`: current status.
async fn match_(state: &AppState, body: Bytes) -> Result<Response, ApiError> {
    let envelope = state.codec.decode(&body)?;
    let raw_id = wire::match_transaction_id(&envelope)?
        .ok_or_else(|| ApiError::InvalidDiff("missing 'match.transactionId'".into()))?;
    let id = TransactionId::from_raw(raw_id);

    let record = state.coordinator.status(&id)?;
    let response = wire::obj_field(vec![("patch", transaction_state_node(&record))]);
    Ok((StatusCode::OK, state.codec.encode(&response)).into_response())
}

/// `WATCH /api/transactions` with `match.transactionId`: the transaction's
/// state evolution, `pending` then its terminal state (`spec.md` §4.4
/// `Watch`).
async fn watch(state: &AppState, body: Bytes) -> Result<Response, ApiError> {
    let envelope = state.codec.decode(&body)?;
    let raw_id = wire::match_transaction_id(&envelope)?
        .ok_or_else(|| ApiError::InvalidDiff("missing 'match.transactionId'".into()))?;
    let id = TransactionId::from_raw(raw_id);

    let coordinator = state.coordinator.clone();
    let codec = state.codec.clone();

    let stream = async_stream::stream! {
        match coordinator.watch(&id).await {
            Ok(states) => {
                for record in &states {
                    yield Ok::<Bytes, Infallible>(frame_transaction(codec.as_ref(), record));
                }
            }
            Err(err) => {
                tracing::error!(%err, "transaction watch stream aborted");
                let api_err: ApiError = err.into();
                yield Ok::<Bytes, Infallible>(frame_error(codec.as_ref(), &api_err));
            }
        }
    };

    let body = Body::from_stream(stream);
    Ok((StatusCode::OK, [("content-type", "application/x-tony")], body).into_response())
}

fn transaction_state_node(record: &TransactionStateRecord) -> Node {
    let status = match record.status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Committed => "committed",
        TransactionStatus::Aborted => "aborted",
    };
    wire::obj_field(vec![
        ("transactionId", Node::string(record.transaction_id.clone())),
        ("participantCount", Node::int(record.participant_count as i64)),
        ("participantsReceived", Node::int(record.participants_received as i64)),
        ("status", Node::string(status)),
        ("createdAt", Node::int(record.created_at)),
    ])
}

fn frame_transaction(codec: &dyn TreeCodec, record: &TransactionStateRecord) -> Bytes {
    let doc = wire::obj_field(vec![("patch", transaction_state_node(record))]);
    frame_doc(codec, &doc)
}

fn frame_error(codec: &dyn TreeCodec, err: &ApiError) -> Bytes {
    let doc = wire::obj_field(vec![("error", Node::string(err.to_string()))]);
    frame_doc(codec, &doc)
}

fn frame_doc(codec: &dyn TreeCodec, doc: &Node) -> Bytes {
    let body = codec.encode(doc);
    let mut encoded = Vec::with_capacity(body.len() + 4);
    encoded.extend_from_slice(b"---\n");
    encoded.extend_from_slice(&body);
    Bytes::from(encoded)
}
