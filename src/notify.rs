//! Listener registration and event fan-out.
//!
//! Two listener lists: close listeners receive at most one error and
//! are then closed; block listeners receive flow-control transitions.
//! Register bounded sinks with nonzero capacity: fan-out awaits a slow
//! listener, and during shutdown that stalls the teardown path.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::Error;

/// A broker flow-control notification.
///
/// `active` is true while the server has blocked the connection; the
/// reason is only meaningful on the blocking edge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blocking {
    pub active: bool,
    pub reason: String,
}

/// Holds listener sinks for close and block/unblock events.
///
/// Once frozen (shutdown has begun) registration drops the given sink
/// immediately, so its receiver observes closure right away.
pub(crate) struct NotificationHub {
    inner: Mutex<HubInner>,
}

struct HubInner {
    closes: Vec<mpsc::Sender<Error>>,
    blocks: Vec<mpsc::Sender<Blocking>>,
    frozen: bool,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                closes: Vec::new(),
                blocks: Vec::new(),
                frozen: false,
            }),
        }
    }

    pub(crate) fn register_close(&self, sink: mpsc::Sender<Error>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.frozen {
            inner.closes.push(sink);
        }
    }

    pub(crate) fn register_blocked(&self, sink: mpsc::Sender<Blocking>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.frozen {
            inner.blocks.push(sink);
        }
    }

    /// Deliver a flow-control transition to every block listener, in
    /// registration order.
    pub(crate) async fn broadcast_blocking(&self, event: Blocking) {
        let sinks = self.inner.lock().unwrap().blocks.clone();
        for sink in sinks {
            let _ = sink.send(event.clone()).await;
        }
    }

    /// Freeze the hub and hand the caller every registered sink. Used
    /// exactly once, by shutdown: the returned senders are the only
    /// remaining references, so dropping them closes the sinks.
    pub(crate) fn drain(&self) -> (Vec<mpsc::Sender<Error>>, Vec<mpsc::Sender<Blocking>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.frozen = true;
        (
            std::mem::take(&mut inner.closes),
            std::mem::take(&mut inner.blocks),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_listeners_in_order() {
        let hub = NotificationHub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        hub.register_blocked(tx1);
        hub.register_blocked(tx2);

        hub.broadcast_blocking(Blocking {
            active: true,
            reason: "low memory".into(),
        })
        .await;
        hub.broadcast_blocking(Blocking::default()).await;

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            assert!(first.active);
            assert_eq!(first.reason, "low memory");
            let second = rx.recv().await.unwrap();
            assert!(!second.active);
        }
    }

    #[tokio::test]
    async fn registration_after_drain_closes_the_sink() {
        let hub = NotificationHub::new();
        let _ = hub.drain();

        let (tx, mut rx) = mpsc::channel::<Error>(1);
        hub.register_close(tx);
        // The sink was dropped on registration, so the receiver closes.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn drain_returns_registered_sinks_once() {
        let hub = NotificationHub::new();
        let (tx, _rx) = mpsc::channel::<Error>(1);
        hub.register_close(tx);

        let (closes, blocks) = hub.drain();
        assert_eq!(closes.len(), 1);
        assert!(blocks.is_empty());

        let (closes, _) = hub.drain();
        assert!(closes.is_empty());
    }
}
