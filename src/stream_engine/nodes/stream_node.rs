use crate::models::Point;
use crate::stream_engine::Node;

/// Copies every point from its input to all of its outputs unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamNode;

impl Node for StreamNode {
    fn kind(&self) -> &'static str {
        "stream"
    }

    fn process(&self, point: Point) -> Option<Point> {
        Some(point)
    }
}
