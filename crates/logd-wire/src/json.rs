use logd_core::Node;

use crate::codec::TreeCodec;
use crate::error::{Error, Result};

/// The default, and only, concrete `TreeCodec` (`spec.md` §1/§6: the
/// canonical textual encoding itself is out of scope, named only as an
/// interface). Rides on `Node`'s derived `serde` impl, the same way
/// `reifydb`'s encoding layer leans on `serde_json` for its own wire
/// types (`crates/base/src/encoding/mod.rs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTreeCodec;

impl TreeCodec for JsonTreeCodec {
    fn encode(&self, node: &Node) -> Vec<u8> {
        serde_json::to_vec(node).expect("Node serialization is infallible")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Node> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logd_core::{FieldKey, Node, Tag};

    #[test]
    fn round_trips_tagged_object() {
        let codec = JsonTreeCodec;
        let node = Node::object(vec![(FieldKey::Str("id".into()), Node::int(7))])
            .with_tag(Tag::single("!key"));
        let bytes = codec.encode(&node);
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let codec = JsonTreeCodec;
        assert!(codec.decode(b"{not json").is_err());
    }
}
