pub mod alert;
pub mod batch;
pub mod derivative;
pub mod eval;
pub mod group_by;
pub mod http_out;
pub mod influxdb_out;
pub mod join;
pub mod map_reduce;
pub mod sample;
pub mod stats;
pub mod stream;
pub mod udf;
pub mod union;
pub mod where_node;
pub mod window;

use crate::runtime::edge::{recv_or_stop, EdgeReceiver, EdgeSender, Message};
use anyhow::Result;
use tokio::sync::{mpsc, watch};

/// Interleave several input edges into one channel, tagging each payload
/// with its input index. The channel closes once every input has closed;
/// the stop signal wakes forwarders blocked on idle edges.
pub(crate) fn merge_inputs(
    ins: Vec<EdgeReceiver>,
    stop: &watch::Receiver<bool>,
) -> mpsc::Receiver<(usize, Message)> {
    let (tx, rx) = mpsc::channel(16);
    for (i, mut edge) in ins.into_iter().enumerate() {
        let tx = tx.clone();
        let mut stop = stop.clone();
        tokio::spawn(async move {
            while let Some(msg) = recv_or_stop(&mut edge, &mut stop).await {
                if tx.send((i, msg)).await.is_err() {
                    return;
                }
            }
        });
    }
    rx
}

/// Fan a payload out to every output edge. A send failing because the
/// task is stopping is a clean exit, not a node error.
pub(crate) async fn send_all(
    outs: &[EdgeSender],
    msg: &Message,
    stop: &watch::Receiver<bool>,
) -> Result<bool> {
    for out in outs {
        if let Err(e) = out.send(msg.clone()).await {
            if *stop.borrow() {
                return Ok(false);
            }
            return Err(e);
        }
    }
    Ok(true)
}
