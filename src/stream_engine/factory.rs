use crate::schema::NodeKind;
use crate::stream_engine::nodes::{FromNode, StreamNode};
use crate::stream_engine::Node;
use anyhow::Result;

/// Builds the node for a typed definition. Fails only when the definition
/// cannot be compiled, e.g. a malformed `where` expression.
pub fn create(kind: &NodeKind) -> Result<Box<dyn Node>> {
    let node: Box<dyn Node> = match kind {
        NodeKind::Stream => Box::new(StreamNode),
        NodeKind::From(config) => Box::new(FromNode::new(config.clone())?),
    };
    Ok(node)
}
