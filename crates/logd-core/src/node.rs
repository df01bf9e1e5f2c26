use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// A tagged-union tree value (`spec.md` §3).
///
/// `Node` is the unit the kernel patches and diffs. Child sequences are
/// owned exclusively by their parent; there are no back-pointers on the
/// node itself — callers that need a node's position walk down from a
/// known root and accumulate a `PathTrace` as they go (see `error.rs`),
/// trading a little recomputation for never having a cycle to worry about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub value: Value,
    pub tag: Option<Tag>,
    /// A line-comment node attached ahead of this one. When present it must
    /// itself be a `Value::Comment(CommentBody::Line(_))` node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading_comment: Option<Box<Node>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(NumberValue),
    String(StringValue),
    Array(Vec<Node>),
    Object(ObjectValue),
    Comment(CommentBody),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumberValue {
    Int(i64),
    Float(f64),
    /// Fallback representation for numbers that do not round-trip cleanly
    /// through `i64`/`f64` (arbitrary precision decimals).
    Decimal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringValue {
    pub value: String,
    /// Line decomposition, used only when a producer guarantees
    /// `lines.join("") == value` (or with separators folded back in);
    /// never relied upon by the kernel itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
}

/// An object field key. Keys in a single object are either all `Str` or all
/// `Int` (invariant 1 in `spec.md` §3) — except for repeated `Null` keys,
/// which mark merge-key placeholders used by keyed-list diffs rather than
/// ordinary fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKey {
    Str(String),
    Int(i64),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub fields: Vec<FieldKey>,
    pub values: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommentBody {
    /// A head comment wrapping exactly one child.
    Head(Box<Node>),
    /// A line comment with no children, living in another node's
    /// `leading_comment` slot.
    Line(String),
}

impl Node {
    pub fn new(value: Value) -> Self {
        Node { value, tag: None, leading_comment: None }
    }

    pub fn tagged(tag: Tag, value: Value) -> Self {
        Node { value, tag: Some(tag), leading_comment: None }
    }

    pub fn null() -> Self {
        Node::new(Value::Null)
    }

    pub fn bool(b: bool) -> Self {
        Node::new(Value::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Node::new(Value::Number(NumberValue::Int(i)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::new(Value::String(StringValue { value: s.into(), lines: None }))
    }

    pub fn array(items: Vec<Node>) -> Self {
        Node::new(Value::Array(items))
    }

    pub fn object(fields: Vec<(FieldKey, Node)>) -> Self {
        let (fields, values) = fields.into_iter().unzip();
        Node::new(Value::Object(ObjectValue { fields, values }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Equality "up to node equality (comments excluded from equality)" per
    /// `spec.md` §4.1: ignores `leading_comment`, and ignores any array
    /// element / object field whose value is itself a `Comment` node.
    pub fn semantically_eq(&self, other: &Node) -> bool {
        if self.tag != other.tag {
            return false;
        }
        match (&self.value, &other.value) {
            (Value::Array(a), Value::Array(b)) => {
                let a: Vec<&Node> = a.iter().filter(|n| !n.is_comment()).collect();
                let b: Vec<&Node> = b.iter().filter(|n| !n.is_comment()).collect();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.semantically_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                let a: Vec<(&FieldKey, &Node)> = a
                    .fields
                    .iter()
                    .zip(a.values.iter())
                    .filter(|(_, v)| !v.is_comment())
                    .collect();
                let b: Vec<(&FieldKey, &Node)> = b
                    .fields
                    .iter()
                    .zip(b.values.iter())
                    .filter(|(_, v)| !v.is_comment())
                    .collect();
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ak, av), (bk, bv))| ak == bk && av.semantically_eq(bv))
            }
            (a, b) => a == b,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.value, Value::Comment(_))
    }
}

impl ObjectValue {
    pub fn new() -> Self {
        ObjectValue { fields: Vec::new(), values: Vec::new() }
    }

    pub fn get(&self, key: &FieldKey) -> Option<&Node> {
        self.fields.iter().position(|k| k == key).map(|i| &self.values[i])
    }

    pub fn get_str(&self, key: &str) -> Option<&Node> {
        self.get(&FieldKey::Str(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Node)> {
        self.fields.iter().zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push(&mut self, key: FieldKey, value: Node) {
        self.fields.push(key);
        self.values.push(value);
    }
}

impl Default for ObjectValue {
    fn default() -> Self {
        Self::new()
    }
}
