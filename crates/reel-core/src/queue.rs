//! Bounded blocking FIFO connecting pipeline stages.
//!
//! Built on a bounded `tokio::sync::mpsc` channel driven from blocking
//! threads (`blocking_send` / `blocking_recv`).  Stage workers run under
//! `spawn_blocking`, never on an async executor thread.
//!
//! # End of stream
//!
//! There is no in-band sentinel value.  The producer ends the stream by
//! calling [`QueueSender::close`], which consumes the sender, so the stream
//! can be closed at most once.  Dropping the sender closes it too, which
//! covers early returns and panics.  The consumer observes end of stream
//! as [`QueueReceiver::get`] returning `None` after every queued item has
//! been delivered.
//!
//! # Backpressure
//!
//! `put` suspends the calling thread while the queue holds `capacity` items.
//! Occupancy never exceeds `capacity`.

use tokio::sync::mpsc;

use crate::error::{EngineError, Result};

/// Create a queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero.  [`crate::config::RunConfig::validate`]
/// rejects such configurations before any queue is built.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    assert!(capacity >= 1, "queue capacity must be at least 1");
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producing half of a bounded queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// Returns [`EngineError::ChannelClosed`] once the consumer is gone; the
    /// item is dropped in that case.
    pub fn put(&self, item: T) -> Result<()> {
        self.tx
            .blocking_send(item)
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// End the stream.  Items already queued are still delivered.
    pub fn close(self) {
        drop(self);
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half of a bounded queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the next item, blocking while the queue is empty.
    ///
    /// `None` means the producer closed the stream and nothing is left.
    pub fn get(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Refuse further items.  Queued items can still be drained with `get`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn delivers_in_fifo_order_then_end_of_stream() {
        let (tx, mut rx) = bounded(4);
        let producer = thread::spawn(move || {
            for i in 0..10u32 {
                tx.put(i).expect("consumer alive");
            }
            tx.close();
        });

        let mut seen = Vec::new();
        while let Some(v) = rx.get() {
            seen.push(v);
        }
        producer.join().expect("producer panicked");
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(rx.get().is_none(), "end of stream is sticky");
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let (tx, mut rx) = bounded::<u32>(2);
        let producer = thread::spawn(move || {
            let mut max_seen = 0;
            for i in 0..20 {
                tx.put(i).expect("consumer alive");
                max_seen = max_seen.max(tx.len());
            }
            max_seen
        });

        let mut count = 0;
        while let Some(_) = rx.get() {
            assert!(rx.len() <= 2);
            count += 1;
            thread::sleep(Duration::from_millis(1));
        }
        let max_seen = producer.join().expect("producer panicked");
        assert_eq!(count, 20);
        assert!(max_seen <= 2, "observed occupancy {max_seen}");
    }

    #[test]
    fn put_blocks_until_consumer_makes_room() {
        let (tx, mut rx) = bounded::<u8>(1);
        tx.put(1).expect("first put fits");
        assert_eq!(tx.len(), 1);

        let producer = thread::spawn(move || {
            tx.put(2).expect("second put after get");
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished(), "put must wait for space");

        assert_eq!(rx.get(), Some(1));
        producer.join().expect("producer panicked");
        assert_eq!(rx.get(), Some(2));
        assert_eq!(rx.get(), None);
    }

    #[test]
    fn put_after_receiver_drop_reports_channel_closed() {
        let (tx, rx) = bounded::<u8>(1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(tx.put(7), Err(EngineError::ChannelClosed)));
    }

    #[test]
    fn dropped_sender_ends_stream() {
        let (tx, mut rx) = bounded::<u8>(2);
        tx.put(5).expect("consumer alive");
        drop(tx);
        assert_eq!(rx.get(), Some(5));
        assert_eq!(rx.get(), None);
    }
}
