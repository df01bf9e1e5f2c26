//! Request/response envelope handling (`spec.md` §6's request body layout:
//! `path`, `match`, `patch`, `meta`). The core intentionally has no
//! reflection-driven struct<->tree mapping (`spec.md` §9's design note), so
//! every field is pulled out by hand: "read field X, expect type Y, else
//! `InvalidDiff`."

use logd_core::{FieldKey, Node, NumberValue, ObjectValue, Value};
use logd_storage::VirtualPath;

use crate::error::ApiError;

pub fn field<'a>(obj: &'a Node, name: &str) -> Option<&'a Node> {
    match &obj.value {
        Value::Object(fields) => fields.get_str(name),
        _ => None,
    }
}

pub fn require_object(node: &Node) -> Result<&ObjectValue, ApiError> {
    match &node.value {
        Value::Object(obj) => Ok(obj),
        other => Err(ApiError::InvalidDiff(format!("expected request body to be an object, got {other:?}"))),
    }
}

pub fn require_path(body: &Node) -> Result<VirtualPath, ApiError> {
    let node = field(body, "path").ok_or_else(|| ApiError::InvalidDiff("missing 'path' field".into()))?;
    let raw = match &node.value {
        Value::String(s) => &s.value,
        other => return Err(ApiError::InvalidDiff(format!("'path' must be a string, got {other:?}"))),
    };
    VirtualPath::parse(raw).map_err(ApiError::from)
}

pub fn require_patch(body: &Node) -> Result<&Node, ApiError> {
    field(body, "patch").ok_or_else(|| ApiError::InvalidDiff("missing 'patch' field".into()))
}

/// `match.transactionId`, used by the `/api/transactions` endpoints.
pub fn match_transaction_id(body: &Node) -> Result<Option<String>, ApiError> {
    let Some(m) = field(body, "match") else { return Ok(None) };
    if m.is_null() {
        return Ok(None);
    }
    let obj = require_object(m)?;
    match obj.get_str("transactionId") {
        Some(node) => match &node.value {
            Value::String(s) => Ok(Some(s.value.clone())),
            other => Err(ApiError::InvalidDiff(format!("'match.transactionId' must be a string, got {other:?}"))),
        },
        None => Ok(None),
    }
}

fn meta_field<'a>(body: &'a Node, name: &str) -> Option<&'a Node> {
    field(body, "meta").and_then(|m| field(m, name))
}

fn as_u64(node: &Node, field_name: &str) -> Result<u64, ApiError> {
    match &node.value {
        Value::Number(NumberValue::Int(i)) if *i >= 0 => Ok(*i as u64),
        other => Err(ApiError::InvalidDiff(format!("'meta.{field_name}' must be a non-negative integer, got {other:?}"))),
    }
}

pub fn meta_seq(body: &Node) -> Result<Option<u64>, ApiError> {
    match meta_field(body, "seq") {
        Some(node) if node.is_null() => Ok(None),
        Some(node) => as_u64(node, "seq").map(Some),
        None => Ok(None),
    }
}

pub fn meta_from_seq(body: &Node) -> Result<Option<u64>, ApiError> {
    match meta_field(body, "fromSeq") {
        Some(node) if node.is_null() => Ok(None),
        Some(node) => as_u64(node, "fromSeq").map(Some),
        None => Ok(None),
    }
}

pub fn meta_to_seq(body: &Node) -> Result<Option<u64>, ApiError> {
    match meta_field(body, "toSeq") {
        Some(node) if node.is_null() => Ok(None),
        Some(node) => as_u64(node, "toSeq").map(Some),
        None => Ok(None),
    }
}

pub fn meta_tx_id(body: &Node) -> Result<Option<String>, ApiError> {
    match meta_field(body, "tx-id") {
        Some(node) if node.is_null() => Ok(None),
        Some(node) => match &node.value {
            Value::String(s) => Ok(Some(s.value.clone())),
            other => Err(ApiError::InvalidDiff(format!("'meta.tx-id' must be a string, got {other:?}"))),
        },
        None => Ok(None),
    }
}

pub fn meta_deadline_ms(body: &Node) -> Result<Option<u64>, ApiError> {
    match meta_field(body, "deadline") {
        Some(node) if node.is_null() => Ok(None),
        Some(node) => as_u64(node, "deadline").map(Some),
        None => Ok(None),
    }
}

/// `patch.participantCount`, used only by `PATCH /api/transactions` create.
pub fn patch_participant_count(body: &Node) -> Result<u32, ApiError> {
    let patch = require_patch(body)?;
    let obj = require_object(patch)?;
    let node = obj
        .get_str("participantCount")
        .ok_or_else(|| ApiError::InvalidDiff("missing 'patch.participantCount'".into()))?;
    match &node.value {
        Value::Number(NumberValue::Int(i)) if *i > 0 => Ok(*i as u32),
        other => Err(ApiError::InvalidDiff(format!("'patch.participantCount' must be a positive integer, got {other:?}"))),
    }
}

pub fn obj_field(fields: Vec<(&str, Node)>) -> Node {
    Node::object(fields.into_iter().map(|(k, v)| (FieldKey::Str(k.to_string()), v)).collect())
}
