use crate::node::{FieldKey, Node, ObjectValue, Value};
use crate::tag::Tag;

/// Computes a diff such that `patch(a, diff(a, b))` yields a tree
/// semantically equal to `b` (`spec.md` §8, testable property 6).
///
/// This is not a minimal diff — for structurally identical objects it
/// recurses field-by-field so small edits stay small, but it falls back to
/// a single `!replace` for anything it does not special-case (arrays,
/// scalars, absent-vs-present transitions handled via `!insert`/`!delete`).
/// The round-trip guarantee holds regardless of minimality.
pub fn diff(a: &Node, b: &Node) -> Node {
    if a.semantically_eq(b) {
        return no_op(a);
    }

    match (&a.value, &b.value) {
        (Value::Null, _) => Node::tagged(Tag::single("!insert"), b.value.clone()),
        (_, Value::Null) => Node::tagged(Tag::single("!delete"), a.value.clone()),
        (Value::Object(oa), Value::Object(ob)) => diff_objects(oa, ob),
        _ => replace(a, b),
    }
}

fn no_op(a: &Node) -> Node {
    // A diff that reproduces `a` unchanged: replace `a` with itself. Always
    // satisfies the precondition since `from == a`.
    replace(a, a)
}

fn replace(from: &Node, to: &Node) -> Node {
    Node::tagged(
        Tag::single("!replace"),
        Value::Object(ObjectValue {
            fields: vec![FieldKey::Str("from".into()), FieldKey::Str("to".into())],
            values: vec![from.clone(), to.clone()],
        }),
    )
}

fn diff_objects(a: &ObjectValue, b: &ObjectValue) -> Node {
    let mut result = ObjectValue::new();

    for (key, a_value) in a.iter() {
        match b.get(key) {
            Some(b_value) => {
                if !a_value.semantically_eq(b_value) {
                    result.push(key.clone(), diff(a_value, b_value));
                }
            }
            None => {
                result.push(key.clone(), Node::tagged(Tag::single("!delete"), a_value.value.clone()));
            }
        }
    }
    for (key, b_value) in b.iter() {
        if a.get(key).is_none() {
            result.push(key.clone(), Node::tagged(Tag::single("!insert"), b_value.value.clone()));
        }
    }

    Node::new(Value::Object(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::patch;

    fn obj(pairs: Vec<(&str, Node)>) -> Node {
        Node::object(pairs.into_iter().map(|(k, v)| (FieldKey::Str(k.to_string()), v)).collect())
    }

    #[test]
    fn round_trips_scalar_replace() {
        let a = Node::int(1);
        let b = Node::int(2);
        let d = diff(&a, &b);
        let result = patch(&a, &d).unwrap();
        assert!(result.semantically_eq(&b));
    }

    #[test]
    fn round_trips_insert_from_null() {
        let a = Node::null();
        let b = Node::bool(true);
        let d = diff(&a, &b);
        let result = patch(&a, &d).unwrap();
        assert!(result.semantically_eq(&b));
    }

    #[test]
    fn round_trips_delete_to_null() {
        let a = Node::int(5);
        let b = Node::null();
        let d = diff(&a, &b);
        let result = patch(&a, &d).unwrap();
        assert!(result.semantically_eq(&b));
    }

    #[test]
    fn round_trips_nested_object_edit() {
        let a = obj(vec![("x", Node::int(1)), ("y", Node::int(2))]);
        let b = obj(vec![("x", Node::int(1)), ("y", Node::int(3)), ("z", Node::bool(true))]);
        let d = diff(&a, &b);
        let result = patch(&a, &d).unwrap();
        assert!(result.semantically_eq(&b), "got {result:?}, want {b:?}");
    }

    #[test]
    fn round_trips_equal_trees_as_no_op() {
        let a = obj(vec![("x", Node::int(1))]);
        let d = diff(&a, &a);
        let result = patch(&a, &d).unwrap();
        assert!(result.semantically_eq(&a));
    }
}
