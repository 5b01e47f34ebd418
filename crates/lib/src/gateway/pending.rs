//! Request queue (not yet sent) and correlation table (sent, awaiting `res`).

use crate::error::{GatewayError, GatewayResult};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

pub(crate) type Reply = oneshot::Sender<GatewayResult<Value>>;

/// A call waiting for an authenticated socket.
pub(crate) struct QueuedRequest {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
    pub reply: Reply,
}

/// FIFO of calls made while disconnected or handshaking. Survives reconnects.
#[derive(Default)]
pub(crate) struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn push(&mut self, req: QueuedRequest) {
        self.entries.push_back(req);
    }

    pub fn pop(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Put an entry back at the head (flush interrupted before it was written).
    pub fn requeue(&mut self, req: QueuedRequest) {
        self.entries.push_front(req);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn reject_all(&mut self, err: &GatewayError) -> usize {
        let n = self.entries.len();
        for req in self.entries.drain(..) {
            let _ = req.reply.send(Err(err.clone()));
        }
        n
    }
}

struct InflightEntry {
    method: String,
    reply: Reply,
}

/// Requests written to the current socket, keyed by id. Cleared when the socket dies.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    inflight: HashMap<String, InflightEntry>,
}

impl CorrelationTable {
    pub fn insert(&mut self, id: String, method: String, reply: Reply) {
        self.inflight.insert(id, InflightEntry { method, reply });
    }

    /// Complete the entry for `id`. Returns false when no entry matches.
    pub fn resolve(&mut self, id: &str, result: GatewayResult<Value>) -> bool {
        match self.inflight.remove(id) {
            Some(entry) => {
                if let Err(Err(e)) = entry.reply.send(result) {
                    log::debug!("{} failed after its caller went away: {}", entry.method, e);
                }
                true
            }
            None => false,
        }
    }

    pub fn reject(&mut self, id: &str, err: GatewayError) -> bool {
        self.resolve(id, Err(err))
    }

    pub fn reject_all(&mut self, err: &GatewayError) -> usize {
        let n = self.inflight.len();
        for (_, entry) in self.inflight.drain() {
            let _ = entry.reply.send(Err(err.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(id: &str) -> (QueuedRequest, oneshot::Receiver<GatewayResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            QueuedRequest {
                id: id.to_string(),
                method: "m".to_string(),
                params: None,
                reply: tx,
            },
            rx,
        )
    }

    #[test]
    fn queue_is_fifo() {
        let mut q = RequestQueue::default();
        for id in ["1", "2", "3"] {
            q.push(queued(id).0);
        }
        let first = q.pop().unwrap();
        assert_eq!(first.id, "1");
        q.requeue(first);
        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|r| r.id).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut table = CorrelationTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert("a".to_string(), "m".to_string(), tx);
        assert!(!table.resolve("zzz", Ok(json!(1))));
        assert_eq!(table.len(), 1);
        assert!(rx.try_recv().is_err());
        assert!(table.resolve("a", Ok(json!(2))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(2));
    }

    #[test]
    fn reject_all_empties_table_once() {
        let mut table = CorrelationTable::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.insert("1".to_string(), "a".to_string(), tx1);
        table.insert("2".to_string(), "b".to_string(), tx2);
        assert_eq!(table.reject_all(&GatewayError::PingTimeout), 2);
        assert_eq!(table.reject_all(&GatewayError::PingTimeout), 0);
        assert!(matches!(rx1.try_recv().unwrap(), Err(GatewayError::PingTimeout)));
        assert!(matches!(rx2.try_recv().unwrap(), Err(GatewayError::PingTimeout)));
    }

    #[test]
    fn queue_reject_all() {
        let mut q = RequestQueue::default();
        let (req, mut rx) = queued("1");
        q.push(req);
        assert_eq!(q.reject_all(&GatewayError::ShutDown), 1);
        assert_eq!(q.len(), 0);
        assert!(matches!(rx.try_recv().unwrap(), Err(GatewayError::ShutDown)));
    }
}
