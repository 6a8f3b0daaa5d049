use crate::models::Point;
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Pull side of an edge.
#[async_trait]
pub trait InEdge: Send {
    /// `None` means the stream has ended for good.
    async fn next_point(&mut self) -> Option<Point>;
}

/// Push side of an edge.
#[async_trait]
pub trait OutEdge: Send + Sync {
    async fn collect_point(&self, point: Point) -> Result<()>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EdgeError {
    #[error("edge {from} -> {to} aborted")]
    Aborted { from: String, to: String },
}

struct Delivery {
    point: Point,
    ack: oneshot::Sender<()>,
}

/// Creates a rendezvous edge. `collect_point` on the sender returns once the
/// receiving node has finished with the point, so the sender is held for the
/// whole downstream subtree.
pub fn channel(from: impl Into<String>, to: impl Into<String>) -> (EdgeSender, EdgeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let sender = EdgeSender {
        from: from.into(),
        to: to.into(),
        tx,
    };
    let receiver = EdgeReceiver { rx, pending: None };
    (sender, receiver)
}

#[derive(Clone)]
pub struct EdgeSender {
    from: String,
    to: String,
    tx: mpsc::Sender<Delivery>,
}

impl EdgeSender {
    fn aborted(&self) -> EdgeError {
        EdgeError::Aborted {
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

#[async_trait]
impl OutEdge for EdgeSender {
    async fn collect_point(&self, point: Point) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Delivery { point, ack })
            .await
            .map_err(|_| self.aborted())?;
        // A dropped ack means the receiver stopped before finishing the point.
        done.await.map_err(|_| self.aborted())?;
        Ok(())
    }
}

pub struct EdgeReceiver {
    rx: mpsc::Receiver<Delivery>,
    pending: Option<oneshot::Sender<()>>,
}

impl EdgeReceiver {
    /// Acknowledges the point currently held, releasing its sender.
    fn release(&mut self) {
        if let Some(ack) = self.pending.take() {
            let _ = ack.send(());
        }
    }

    /// Stops accepting points. Senders blocked on this edge get `Aborted`.
    pub fn abort(&mut self) {
        self.pending = None;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub async fn into_points(mut self) -> Vec<Point> {
        let mut points = Vec::new();
        while let Some(point) = self.next_point().await {
            points.push(point);
        }
        points
    }
}

#[async_trait]
impl InEdge for EdgeReceiver {
    async fn next_point(&mut self) -> Option<Point> {
        self.release();
        let delivery = self.rx.recv().await?;
        self.pending = Some(delivery.ack);
        Some(delivery.point)
    }
}
