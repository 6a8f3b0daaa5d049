pub mod models;
pub mod schema;
pub mod stream_engine;

pub use models::{Dimensions, GroupId, Point};
pub use stream_engine::{Node, StreamExecutor};
