//! `/api/data`: write (`PATCH`), reconstruct (`MATCH`), stream (`WATCH`)
//! (`spec.md` §6's endpoint semantics table, second block).

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use logd_core::{diff as diff_nodes, Node};
use logd_engine::WatchEvent;
use logd_transaction::TransactionId;

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
    let path = wire::require_path(&envelope)?;
    let diff_node = wire::require_patch(&envelope)?.clone();
    let tx_id = wire::meta_tx_id(&envelope)?;
    let timestamp = now_millis();
    let diff_body = state.codec.encode_string(&diff_node);

    let commit_count = match tx_id {
        Some(raw) => {
            let id = TransactionId::from_raw(raw);
            state.coordinator.join(&id, path.clone(), &diff_body, timestamp).await?
        }
        None => state.coordinator.write_single(path.clone(), &diff_body, timestamp)?,
    };

    state.engine.on_committed(&path, commit_count, timestamp)?;

    let response = wire::obj_field(vec![(
        "meta",
        wire::obj_field(vec![("seq", Node::int(commit_count.get() as i64)), ("timestamp", Node::int(timestamp))]),
    )]);
    Ok((StatusCode::OK, state.codec.encode(&response)).into_response())
}

async fn match_(state: &AppState, body: Bytes) -> Result<Response, ApiError> {
    let envelope = state.codec.decode(&body)?;
    let path = wire::require_path(&envelope)?;
    let seq = wire::meta_seq(&envelope)?;

    let reconstructed = state.engine.reconstruct(&path, seq)?;
    let from_null = diff_nodes(&Node::null(), &reconstructed.state);

    let response = wire::obj_field(vec![
        ("meta", wire::obj_field(vec![("seq", Node::int(reconstructed.commit_count.get() as i64))])),
        ("patch", from_null),
    ]);
    Ok((StatusCode::OK, state.codec.encode(&response)).into_response())
}

async fn watch(state: &AppState, body: Bytes) -> Result<Response, ApiError> {
    let envelope = state.codec.decode(&body)?;
    let path = wire::require_path(&envelope)?;
    let from_seq = wire::meta_from_seq(&envelope)?;
    let to_seq = wire::meta_to_seq(&envelope)?;

    let codec = state.codec.clone();
    let events = state.engine.watch(path, from_seq, to_seq);
    let framed = events.map(move |event| Ok::<Bytes, Infallible>(frame(codec.as_ref(), event)));

    let body = Body::from_stream(framed);
    Ok((StatusCode::OK, [("content-type", "application/x-tony")], body).into_response())
}

fn frame(codec: &dyn logd_wire::TreeCodec, event: logd_engine::Result<WatchEvent>) -> Bytes {
    let doc = match event {
        Ok(WatchEvent::Seed { commit_count, timestamp, state, from_snapshot }) => {
            let mut meta = vec![("seq", Node::int(commit_count.get() as i64)), ("timestamp", Node::int(timestamp))];
            if from_snapshot {
                meta.push(("snapshot", Node::bool(true)));
            }
            wire::obj_field(vec![("meta", wire::obj_field(meta)), ("diff", state)])
        }
        Ok(WatchEvent::Diff { commit_count, timestamp, diff }) => wire::obj_field(vec![
            ("meta", wire::obj_field(vec![("seq", Node::int(commit_count.get() as i64)), ("timestamp", Node::int(timestamp))])),
            ("diff", diff),
        ]),
        Err(err) => {
            tracing::error!(%err, "watch stream aborted");
            wire::obj_field(vec![("error", Node::string(err.to_string()))])
        }
    };
    let body = codec.encode(&doc);
    let mut encoded = Vec::with_capacity(body.len() + 4);
    encoded.extend_from_slice(b"---\n");
    encoded.extend_from_slice(&body);
    Bytes::from(encoded)
}
