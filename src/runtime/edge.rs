use crate::models::{Batch, Point};
use crate::pipeline::EdgeType;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Buffered capacity of every edge. A full buffer blocks the producer,
/// which transitively slows everything upstream of it.
pub const EDGE_BUFFER_SIZE: usize = 1000;

/// A payload traveling over an edge.
#[derive(Debug, Clone)]
pub enum Message {
    Point(Point),
    Batch(Batch),
}

impl Message {
    pub fn edge_type(&self) -> EdgeType {
        match self {
            Message::Point(_) => EdgeType::Stream,
            Message::Batch(_) => EdgeType::Batch,
        }
    }
}

/// Counters shared by both ends of an edge: `collected` counts payloads
/// pushed in, `emitted` counts payloads read out.
#[derive(Debug, Default)]
pub struct EdgeStats {
    pub collected: AtomicI64,
    pub emitted: AtomicI64,
}

/// Create a bounded, typed, single-producer single-consumer edge.
pub fn edge(ty: EdgeType, name: impl Into<String>) -> (EdgeSender, EdgeReceiver) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(EDGE_BUFFER_SIZE);
    let stats = Arc::new(EdgeStats::default());
    (
        EdgeSender {
            ty,
            name: name.clone(),
            tx,
            stats: stats.clone(),
        },
        EdgeReceiver {
            ty,
            name,
            rx,
            stats,
        },
    )
}

/// Producer half of an edge. Dropping it closes the edge; the consumer
/// sees EOF once the buffer drains.
pub struct EdgeSender {
    ty: EdgeType,
    name: String,
    tx: mpsc::Sender<Message>,
    stats: Arc<EdgeStats>,
}

impl EdgeSender {
    pub fn edge_type(&self) -> EdgeType {
        self.ty
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<EdgeStats> {
        self.stats.clone()
    }

    /// Push a payload, waiting for buffer space. Fails when the payload
    /// type does not match the edge or the consumer is gone.
    pub async fn send(&self, msg: Message) -> Result<()> {
        if msg.edge_type() != self.ty {
            return Err(anyhow!(
                "edge {}: cannot send a {} payload over a {} edge",
                self.name,
                msg.edge_type(),
                self.ty
            ));
        }
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("edge {} closed", self.name))?;
        self.stats.collected.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn send_point(&self, p: Point) -> Result<()> {
        self.send(Message::Point(p)).await
    }

    pub async fn send_batch(&self, b: Batch) -> Result<()> {
        self.send(Message::Batch(b)).await
    }
}

/// Consumer half of an edge.
pub struct EdgeReceiver {
    ty: EdgeType,
    name: String,
    rx: mpsc::Receiver<Message>,
    stats: Arc<EdgeStats>,
}

impl EdgeReceiver {
    pub fn edge_type(&self) -> EdgeType {
        self.ty
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next payload in FIFO order, or None once the producer has closed
    /// the edge and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        let msg = self.rx.recv().await;
        if msg.is_some() {
            self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        }
        msg
    }

    pub async fn next_point(&mut self) -> Option<Point> {
        match self.recv().await {
            Some(Message::Point(p)) => Some(p),
            Some(Message::Batch(_)) => None,
            None => None,
        }
    }

    pub async fn next_batch(&mut self) -> Option<Batch> {
        match self.recv().await {
            Some(Message::Batch(b)) => Some(b),
            Some(Message::Point(_)) => None,
            None => None,
        }
    }
}

/// Receive from an edge unless the stop signal fires first. Used by node
/// workers so a stop wakes reads blocked on an open but idle edge.
pub async fn recv_or_stop(
    edge: &mut EdgeReceiver,
    stop: &mut watch::Receiver<bool>,
) -> Option<Message> {
    tokio::select! {
        msg = edge.recv() => msg,
        _ = stop.changed() => None,
    }
}
