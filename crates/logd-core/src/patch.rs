use crate::error::{Error, PathTrace, Result};
use crate::node::{FieldKey, Node, ObjectValue, Value};

/// Applies `diff` to `state`, returning the new state.
///
/// Implements the operators named in `spec.md` §4.1: `!insert`, `!delete`,
/// `!replace`, `!key(<k>)` keyed-list merge, index-keyed array diffs, and
/// untagged structural recursion. A precondition mismatch fails loudly with
/// the offending path (`Error::PatchConflict`); an operator this kernel does
/// not implement patch semantics for fails with `Error::UnsupportedOperator`
/// rather than silently no-op'ing.
pub fn patch(state: &Node, diff: &Node) -> Result<Node> {
    let result = patch_at(Some(state), diff, &PathTrace::root()).inspect_err(|err| {
        tracing::debug!(%err, "patch rejected");
    })?;
    Ok(result.unwrap_or_else(Node::null))
}

fn patch_at(current: Option<&Node>, diff: &Node, path: &PathTrace) -> Result<Option<Node>> {
    match &diff.tag {
        Some(tag) if tag.is_operator() => apply_operator(current, diff, tag.operator_name().unwrap(), path),
        _ => apply_structural(current, diff, path),
    }
}

fn apply_operator(
    current: Option<&Node>,
    diff: &Node,
    op: &str,
    path: &PathTrace,
) -> Result<Option<Node>> {
    match op {
        "insert" => {
            if !is_absent(current) {
                return Err(Error::PatchConflict { path: path.clone() });
            }
            Ok(Some(strip_tag(diff)))
        }
        "delete" => {
            // "!delete null at root means delete the whole document" —
            // unconditional, regardless of the document's actual content.
            if path.0.is_empty() && diff.value == Value::Null {
                return Ok(None);
            }
            let cur = current.ok_or_else(|| Error::PatchConflict { path: path.clone() })?;
            if !cur.semantically_eq(&strip_tag(diff)) {
                return Err(Error::PatchConflict { path: path.clone() });
            }
            Ok(None)
        }
        "replace" => {
            let obj = expect_object(diff, path)?;
            let from = obj
                .get_str("from")
                .ok_or_else(|| Error::InvalidDiff { path: path.clone(), reason: "!replace missing 'from'".into() })?;
            let to = obj
                .get_str("to")
                .ok_or_else(|| Error::InvalidDiff { path: path.clone(), reason: "!replace missing 'to'".into() })?;
            let cur = current.ok_or_else(|| Error::PatchConflict { path: path.clone() })?;
            if !cur.semantically_eq(from) {
                return Err(Error::PatchConflict { path: path.clone() });
            }
            Ok(Some(to.clone()))
        }
        "key" => apply_keyed_merge(current, diff, path),
        "addtag" | "removetag" | "retag" | "string-diff" | "json-patch" => {
            Err(Error::UnsupportedOperator { op: op.to_string(), path: path.clone() })
        }
        other => Err(Error::UnsupportedOperator { op: other.to_string(), path: path.clone() }),
    }
}

/// A position is "absent" (the precondition `!insert` requires) either
/// because there is literally nothing there, or because it holds an
/// explicit `Null` — the spec's reconstruction engine already uses `Null`
/// as the sentinel for "document doesn't exist yet", so the kernel treats
/// the two the same way for operator preconditions.
fn is_absent(current: Option<&Node>) -> bool {
    current.map(|n| n.is_null()).unwrap_or(true)
}

fn strip_tag(diff: &Node) -> Node {
    Node { value: diff.value.clone(), tag: None, leading_comment: diff.leading_comment.clone() }
}

fn expect_object<'a>(node: &'a Node, path: &PathTrace) -> Result<&'a ObjectValue> {
    match &node.value {
        Value::Object(obj) => Ok(obj),
        _ => Err(Error::InvalidDiff { path: path.clone(), reason: "expected object".into() }),
    }
}

fn apply_structural(current: Option<&Node>, diff: &Node, path: &PathTrace) -> Result<Option<Node>> {
    match &diff.value {
        Value::Object(diff_obj) => {
            if is_index_diff(diff_obj) {
                apply_array_index_diff(current, diff_obj, path)
            } else {
                apply_object_recursion(current, diff_obj, path)
            }
        }
        // A bare, untagged leaf: the diff degenerates to "this subtree is
        // exactly this value" only when there was nothing there before,
        // which we treat the same as an implicit insert; otherwise it must
        // equal what's already there (a true no-op diff).
        other => match current {
            None => Ok(Some(Node { value: other.clone(), tag: None, leading_comment: diff.leading_comment.clone() })),
            Some(cur) if cur.value == *other => Ok(Some(cur.clone())),
            Some(_) => Err(Error::PatchConflict { path: path.clone() }),
        },
    }
}

fn is_index_diff(obj: &ObjectValue) -> bool {
    !obj.is_empty() && obj.fields.iter().all(|f| matches!(f, FieldKey::Int(_)))
}

fn apply_object_recursion(current: Option<&Node>, diff_obj: &ObjectValue, path: &PathTrace) -> Result<Option<Node>> {
    let empty = ObjectValue::new();
    let cur_obj = match current {
        Some(node) => match &node.value {
            Value::Object(obj) => obj,
            _ => return Err(Error::PatchConflict { path: path.clone() }),
        },
        None => &empty,
    };

    let mut result = ObjectValue::new();
    // Preserve existing fields, applying any diff that touches them.
    for (key, value) in cur_obj.iter() {
        let field_path = field_path(path, key);
        if let Some(child_diff) = diff_obj.get(key) {
            if let Some(new_value) = patch_at(Some(value), child_diff, &field_path)? {
                result.push(key.clone(), new_value);
            }
            // else: deleted, drop the field.
        } else {
            result.push(key.clone(), value.clone());
        }
    }
    // Any diff-only fields are new additions (must resolve via !insert or a
    // bare value at an absent position).
    for (key, child_diff) in diff_obj.iter() {
        if cur_obj.get(key).is_some() {
            continue;
        }
        let field_path = field_path(path, key);
        if let Some(new_value) = patch_at(None, child_diff, &field_path)? {
            result.push(key.clone(), new_value);
        }
    }

    Ok(Some(Node::new(Value::Object(result))))
}

fn field_path(path: &PathTrace, key: &FieldKey) -> PathTrace {
    match key {
        FieldKey::Str(s) => path.child_field(s.clone()),
        FieldKey::Int(i) => path.child_field(i.to_string()),
        FieldKey::Null => path.child_field("<merge-key>"),
    }
}

/// Applies an index-keyed array diff: `{ "0": !insert(x), "2": !delete(y) }`
/// walked jointly against the source array per `spec.md` §4.1 — non-present
/// indices copy through, `!delete` consumes one source element, `!replace`
/// consumes one and emits `to`, `!insert` emits without consuming.
fn apply_array_index_diff(current: Option<&Node>, diff_obj: &ObjectValue, path: &PathTrace) -> Result<Option<Node>> {
    let empty: Vec<Node> = Vec::new();
    let source: &[Node] = match current {
        Some(node) => match &node.value {
            Value::Array(items) => items,
            _ => return Err(Error::PatchConflict { path: path.clone() }),
        },
        None => &empty,
    };

    let mut ops: Vec<(i64, &Node)> = diff_obj
        .fields
        .iter()
        .zip(diff_obj.values.iter())
        .filter_map(|(k, v)| match k {
            FieldKey::Int(i) => Some((*i, v)),
            _ => None,
        })
        .collect();
    ops.sort_by_key(|(i, _)| *i);

    let mut result = Vec::with_capacity(source.len());
    let mut src_idx: usize = 0;
    let mut out_idx: i64 = 0;
    let mut ops = ops.into_iter().peekable();

    loop {
        if let Some(&(op_idx, op_node)) = ops.peek() {
            if op_idx == out_idx {
                ops.next();
                let op = op_node
                    .tag
                    .as_ref()
                    .and_then(|t| t.operator_name())
                    .ok_or_else(|| Error::InvalidDiff {
                        path: path.child_index(out_idx as usize),
                        reason: "array index diff entries must carry an operator tag".into(),
                    })?;
                let idx_path = path.child_index(out_idx as usize);
                match op {
                    "insert" => {
                        result.push(strip_tag(op_node));
                    }
                    "delete" => {
                        let src = source.get(src_idx).ok_or_else(|| Error::PatchConflict { path: idx_path.clone() })?;
                        if !src.semantically_eq(&strip_tag(op_node)) {
                            return Err(Error::PatchConflict { path: idx_path });
                        }
                        src_idx += 1;
                    }
                    "replace" => {
                        let obj = expect_object(op_node, &idx_path)?;
                        let from = obj.get_str("from").ok_or_else(|| Error::InvalidDiff {
                            path: idx_path.clone(),
                            reason: "!replace missing 'from'".into(),
                        })?;
                        let to = obj.get_str("to").ok_or_else(|| Error::InvalidDiff {
                            path: idx_path.clone(),
                            reason: "!replace missing 'to'".into(),
                        })?;
                        let src = source.get(src_idx).ok_or_else(|| Error::PatchConflict { path: idx_path.clone() })?;
                        if !src.semantically_eq(from) {
                            return Err(Error::PatchConflict { path: idx_path });
                        }
                        src_idx += 1;
                        result.push(to.clone());
                    }
                    other => {
                        return Err(Error::UnsupportedOperator { op: other.to_string(), path: idx_path });
                    }
                }
                out_idx += 1;
                continue;
            }
        }

        if src_idx >= source.len() {
            break;
        }
        result.push(source[src_idx].clone());
        src_idx += 1;
        out_idx += 1;
    }

    Ok(Some(Node::new(Value::Array(result))))
}

/// Applies a `!key(<k>)` keyed-list merge over an object-valued array:
/// children carry `!insert`/`!delete` or recurse structurally, matched
/// against the source array by the value of field `k`.
fn apply_keyed_merge(current: Option<&Node>, diff: &Node, path: &PathTrace) -> Result<Option<Node>> {
    let key_field = diff
        .tag
        .as_ref()
        .and_then(|t| t.head())
        .and_then(|c| c.args.first())
        .and_then(|arg| arg.head())
        .map(|c| c.name.clone())
        .ok_or_else(|| Error::InvalidDiff { path: path.clone(), reason: "!key(...) missing key argument".into() })?;

    let children = match &diff.value {
        Value::Array(items) => items,
        _ => return Err(Error::InvalidDiff { path: path.clone(), reason: "!key(...) requires an array value".into() }),
    };

    let empty: Vec<Node> = Vec::new();
    let source: &[Node] = match current {
        Some(node) => match &node.value {
            Value::Array(items) => items,
            _ => return Err(Error::PatchConflict { path: path.clone() }),
        },
        None => &empty,
    };

    let key_of = |node: &Node| -> Option<FieldKey> {
        match &node.value {
            Value::Object(obj) => obj.get_str(&key_field).map(node_to_field_key),
            _ => None,
        }
    };

    let mut result: Vec<Node> = source.to_vec();

    for (i, child) in children.iter().enumerate() {
        let child_path = path.child_index(i);
        let op = child.tag.as_ref().and_then(|t| t.operator_name());
        match op {
            Some("insert") => {
                let new_key = key_of(child).ok_or_else(|| Error::InvalidDiff {
                    path: child_path.clone(),
                    reason: "!insert into keyed array missing key field".into(),
                })?;
                if result.iter().any(|n| key_of(n).as_ref() == Some(&new_key)) {
                    return Err(Error::PatchConflict { path: child_path });
                }
                result.push(strip_tag(child));
            }
            Some("delete") => {
                let del_key = key_of(child).ok_or_else(|| Error::InvalidDiff {
                    path: child_path.clone(),
                    reason: "!delete from keyed array missing key field".into(),
                })?;
                let pos = result
                    .iter()
                    .position(|n| key_of(n).as_ref() == Some(&del_key))
                    .ok_or_else(|| Error::PatchConflict { path: child_path.clone() })?;
                if !result[pos].semantically_eq(&strip_tag(child)) {
                    return Err(Error::PatchConflict { path: child_path });
                }
                result.remove(pos);
            }
            Some(other) => {
                return Err(Error::UnsupportedOperator { op: other.to_string(), path: child_path });
            }
            None => {
                // Structural sub-diff: locate the matching element by key
                // (the key field must be present, untagged, in the diff).
                let match_key = key_of(child).ok_or_else(|| Error::InvalidDiff {
                    path: child_path.clone(),
                    reason: "keyed-array structural diff missing key field".into(),
                })?;
                let pos = result
                    .iter()
                    .position(|n| key_of(n).as_ref() == Some(&match_key))
                    .ok_or_else(|| Error::PatchConflict { path: child_path.clone() })?;
                let patched = patch_at(Some(&result[pos]), child, &child_path)?
                    .ok_or_else(|| Error::PatchConflict { path: child_path })?;
                result[pos] = patched;
            }
        }
    }

    Ok(Some(Node::new(Value::Array(result))))
}

fn node_to_field_key(node: &Node) -> FieldKey {
    match &node.value {
        Value::String(s) => FieldKey::Str(s.value.clone()),
        Value::Number(crate::node::NumberValue::Int(i)) => FieldKey::Int(*i),
        _ => FieldKey::Str(format!("{node:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NumberValue;
    use crate::tag::Tag;

    fn str_field(name: &str) -> FieldKey {
        FieldKey::Str(name.to_string())
    }

    #[test]
    fn insert_at_root() {
        let state = Node::null();
        let diff = Node::tagged(Tag::single("!insert"), Value::Bool(true));
        let result = patch(&state, &diff).unwrap();
        assert_eq!(result, Node::bool(true));
    }

    #[test]
    fn insert_conflict_when_present() {
        let state = Node::bool(true);
        let diff = Node::tagged(Tag::single("!insert"), Value::Bool(false));
        assert!(patch(&state, &diff).is_err());
    }

    #[test]
    fn delete_whole_document() {
        let state = Node::int(5);
        let diff = Node::tagged(Tag::single("!delete"), Value::Null);
        let result = patch(&state, &diff).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn replace_field_value() {
        let state = Node::object(vec![(str_field("pid"), Node::int(1))]);
        let replace = Node::tagged(
            Tag::single("!replace"),
            Value::Object(ObjectValue {
                fields: vec![str_field("from"), str_field("to")],
                values: vec![Node::int(1), Node::int(2)],
            }),
        );
        let diff = Node::object(vec![(str_field("pid"), replace)]);
        let result = patch(&state, &diff).unwrap();
        let expected = Node::object(vec![(str_field("pid"), Node::int(2))]);
        assert!(result.semantically_eq(&expected));
    }

    #[test]
    fn keyed_insert_into_empty_array() {
        let item = Node::object(vec![
            (str_field("id"), Node::string("proc-1")),
            (str_field("pid"), Node::int(1234)),
        ]);
        let inserted = item.clone().with_tag(Tag::single("!insert"));
        let diff = Node::tagged(Tag::with_arg("!key", Tag::single("id")), Value::Array(vec![inserted]));

        let result = patch(&Node::null(), &diff).unwrap();
        let expected = Node::array(vec![item]);
        assert!(result.semantically_eq(&expected));
    }

    #[test]
    fn keyed_delete_by_key() {
        let item = Node::object(vec![
            (str_field("id"), Node::string("proc-1")),
            (str_field("pid"), Node::int(1234)),
        ]);
        let state = Node::array(vec![item.clone()]);

        let deleted = item.with_tag(Tag::single("!delete"));
        let diff = Node::tagged(Tag::with_arg("!key", Tag::single("id")), Value::Array(vec![deleted]));

        let result = patch(&state, &diff).unwrap();
        assert!(result.semantically_eq(&Node::array(vec![])));
    }

    #[test]
    fn array_index_insert_and_delete() {
        let state = Node::array(vec![Node::int(1), Node::int(2), Node::int(3)]);
        let diff = Node::object(vec![
            (FieldKey::Int(1), Node::int(2).with_tag(Tag::single("!delete"))),
            (FieldKey::Int(3), Node::int(4).with_tag(Tag::single("!insert"))),
        ]);
        let result = patch(&state, &diff).unwrap();
        assert_eq!(result, Node::array(vec![Node::int(1), Node::int(3), Node::int(4)]));
    }

    #[test]
    fn structural_recursion_nested_field() {
        let state = Node::object(vec![(
            str_field("meta"),
            Node::object(vec![(str_field("count"), Node::int(1))]),
        )]);
        let replace = Node::tagged(
            Tag::single("!replace"),
            Value::Object(ObjectValue {
                fields: vec![str_field("from"), str_field("to")],
                values: vec![Node::int(1), Node::int(2)],
            }),
        );
        let diff = Node::object(vec![(
            str_field("meta"),
            Node::object(vec![(str_field("count"), replace)]),
        )]);
        let result = patch(&state, &diff).unwrap();
        let expected = Node::object(vec![(
            str_field("meta"),
            Node::object(vec![(str_field("count"), Node::int(2))]),
        )]);
        assert!(result.semantically_eq(&expected));
    }

    #[test]
    fn number_decimal_fallback_roundtrips() {
        let n = Node::new(Value::Number(NumberValue::Decimal("12345678901234567890.5".into())));
        assert!(matches!(n.value, Value::Number(NumberValue::Decimal(_))));
    }
}
