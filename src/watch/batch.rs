//! Batch collector with size/timeout/flush/close triggers, plus a
//! newest-wins ring buffer for bounded buffering (`spec.md` §4.6.2).

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Accumulates items from `source` and forwards them to `sink` as `Vec<T>`
/// batches, flushing whichever trigger fires first:
/// - the batch reaches `max_size`,
/// - `max_wait` has elapsed since the first item in the current batch
///   arrived,
/// - the source channel closes (final partial batch is still delivered).
pub async fn collect_batches<T: Send + 'static>(
    mut source: mpsc::UnboundedReceiver<T>,
    sink: mpsc::UnboundedSender<Vec<T>>,
    max_size: usize,
    max_wait: Duration,
) {
    let mut batch: Vec<T> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let sleep = match deadline {
            Some(d) => tokio::time::sleep_until(d),
            None => tokio::time::sleep(Duration::from_secs(u64::MAX / 2)),
        };
        tokio::pin!(sleep);

        tokio::select! {
            item = source.recv() => {
                match item {
                    Some(item) => {
                        if batch.is_empty() {
                            deadline = Some(Instant::now() + max_wait);
                        }
                        batch.push(item);
                        if batch.len() >= max_size {
                            if sink.send(std::mem::take(&mut batch)).is_err() {
                                return;
                            }
                            deadline = None;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            let _ = sink.send(std::mem::take(&mut batch));
                        }
                        return;
                    }
                }
            }
            _ = &mut sleep, if deadline.is_some() => {
                if !batch.is_empty() {
                    if sink.send(std::mem::take(&mut batch)).is_err() {
                        return;
                    }
                }
                deadline = None;
            }
        }
    }
}

/// Fixed-capacity FIFO where pushing past capacity drops the oldest entry
/// ("newest wins"), used when a watch's consumer is slower than its source
/// and bounded memory matters more than completeness.
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
    dropped: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
            dropped: 0,
        }
    }

    /// Push a value, evicting the oldest if at capacity. Returns the evicted
    /// value, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(value);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count of items evicted due to capacity pressure since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flushes_on_size() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(collect_batches(rx, sink_tx, 3, Duration::from_secs(10)));

        for i in 0..3u32 {
            tx.send(i).unwrap();
        }
        let batch = sink_rx.recv().await.unwrap();
        assert_eq!(batch, vec![0, 1, 2]);
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_timeout() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(collect_batches(rx, sink_tx, 100, Duration::from_millis(50)));

        tx.send(1u32).unwrap();
        tokio::time::advance(Duration::from_millis(60)).await;
        let batch = sink_rx.recv().await.unwrap();
        assert_eq!(batch, vec![1]);
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn flushes_remainder_on_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(collect_batches(rx, sink_tx, 100, Duration::from_secs(10)));

        tx.send(1u32).unwrap();
        tx.send(2u32).unwrap();
        drop(tx);
        let batch = sink_rx.recv().await.unwrap();
        assert_eq!(batch, vec![1, 2]);
        handle.await.unwrap();
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut rb = RingBuffer::new(2);
        assert_eq!(rb.push(1), None);
        assert_eq!(rb.push(2), None);
        assert_eq!(rb.push(3), Some(1));
        assert_eq!(rb.dropped_count(), 1);
        assert_eq!(rb.pop(), Some(2));
        assert_eq!(rb.pop(), Some(3));
    }
}
