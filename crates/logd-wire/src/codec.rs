use logd_core::Node;

use crate::error::Result;

/// The named interface `spec.md` §1 leaves external: "the textual
/// encode/parse codecs for the tree format". The store and coordinator
/// depend only on this trait, never on a concrete encoding.
pub trait TreeCodec: Send + Sync {
    fn encode(&self, node: &Node) -> Vec<u8>;

    fn encode_string(&self, node: &Node) -> String {
        String::from_utf8(self.encode(node)).expect("codec must produce valid UTF-8")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Node>;

    fn decode_str(&self, text: &str) -> Result<Node> {
        self.decode(text.as_bytes())
    }
}
