pub mod from_node;
pub mod stream_node;

pub use from_node::{FromConfig, FromNode};
pub use stream_node::StreamNode;
