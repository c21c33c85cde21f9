//! Hands resolved episodes from the monitor thread to the monitored thread.
//!
//! ```text
//! monitor thread ── schedule(item) ──► channel ──► drain() ── callback(ms, stack)
//!   (producer)                                     (monitored thread, on tick)
//! ```
//!
//! The producer never takes a lock. The consumer side is only touched by the
//! monitored thread, from its tick path.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// One resolved episode, ready for the user callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem {
    pub duration_ms: u64,
    pub stack: String,
}

pub fn channel() -> (DeliverySender, DeliveryReceiver) {
    let (tx, rx) = mpsc::channel();
    (DeliverySender { tx }, DeliveryReceiver { rx })
}

#[derive(Debug)]
pub struct DeliverySender {
    tx: Sender<DeliveryItem>,
}

impl DeliverySender {
    /// Queues `item`. Returns false once the receiving side is gone.
    pub fn schedule(&self, item: DeliveryItem) -> bool {
        self.tx.send(item).is_ok()
    }
}

#[derive(Debug)]
pub struct DeliveryReceiver {
    rx: Receiver<DeliveryItem>,
}

impl DeliveryReceiver {
    /// Invokes `callback` once per pending item, in the order they were
    /// scheduled. Returns the number of items delivered.
    pub fn drain<F>(&self, mut callback: F) -> usize
    where
        F: FnMut(DeliveryItem),
    {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(item) => {
                    callback(item);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }
}
