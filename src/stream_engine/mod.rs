use crate::models::Point;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

pub mod edge;
pub mod executor;
pub mod expressions;
pub mod factory;
pub mod nodes;
pub mod stats;
pub mod timer;

pub use edge::{EdgeError, EdgeReceiver, EdgeSender, InEdge, OutEdge};
pub use executor::StreamExecutor;
pub use timer::NodeTimer;

/// One stage of the graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Per-point logic. `None` drops the point.
    fn process(&self, point: Point) -> Option<Point>;

    /// Drains `inputs` until every one is exhausted, pushing each accepted
    /// point to all `outputs`. The first push error ends the run.
    async fn run(
        &self,
        inputs: Vec<Box<dyn InEdge>>,
        outputs: Vec<Box<dyn OutEdge>>,
        timer: &NodeTimer,
    ) -> Result<()> {
        run_loop(self, inputs, outputs, timer).await
    }
}

pub async fn run_loop<N>(
    node: &N,
    inputs: Vec<Box<dyn InEdge>>,
    outputs: Vec<Box<dyn OutEdge>>,
    timer: &NodeTimer,
) -> Result<()>
where
    N: Node + ?Sized,
{
    let mut points = merge_inputs(inputs);
    while let Some(point) = points.next().await {
        let mut span = timer.start();
        timer.stats().record_collected();
        if let Some(point) = node.process(point) {
            span.pause();
            fan_out(&outputs, point).await?;
            timer.stats().record_emitted();
            span.resume();
        }
        span.stop();
    }
    Ok(())
}

/// Pushes `point` to every output in registration order, stopping at the
/// first failure.
pub async fn fan_out(outputs: &[Box<dyn OutEdge>], point: Point) -> Result<()> {
    if let Some((last, rest)) = outputs.split_last() {
        for output in rest {
            output.collect_point(point.clone()).await?;
        }
        last.collect_point(point).await?;
    }
    Ok(())
}

/// Interleaves all inputs. An edge is only polled again once the previous
/// point has been handled.
fn merge_inputs(inputs: Vec<Box<dyn InEdge>>) -> BoxStream<'static, Point> {
    let streams = inputs.into_iter().map(|edge| {
        stream::unfold(edge, |mut edge| async move {
            let point = edge.next_point().await?;
            Some((point, edge))
        })
        .boxed()
    });
    stream::select_all(streams).boxed()
}
