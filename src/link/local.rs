//! In-process links using kanal channels.

use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// Item travelling over a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// A data buffer.
    Buffer(Buffer),
    /// No more data will follow on this link.
    Eos,
}

impl Flow {
    /// Whether this is the end-of-stream marker.
    pub fn is_eos(&self) -> bool {
        matches!(self, Flow::Eos)
    }
}

impl From<Buffer> for Flow {
    fn from(buffer: Buffer) -> Self {
        Flow::Buffer(buffer)
    }
}

/// Constructor for local link channels.
///
/// A thin wrapper around kanal channels.
pub struct LocalLink;

impl LocalLink {
    /// Create a bounded link with the specified capacity.
    pub fn bounded(capacity: usize) -> (LinkSender, LinkReceiver) {
        let (tx, rx) = kanal::bounded(capacity);
        (LinkSender { inner: tx }, LinkReceiver { inner: rx })
    }
}

/// Sender half of a link, held by the upstream output port.
#[derive(Clone)]
pub struct LinkSender {
    inner: kanal::Sender<Flow>,
}

impl LinkSender {
    /// Send an item through the link.
    ///
    /// Blocks while the channel is full. Fails with [`Error::Flushing`]
    /// once the channel has been closed by teardown.
    pub fn send(&self, item: impl Into<Flow>) -> Result<()> {
        self.inner.send(item.into()).map_err(|_| Error::Flushing)
    }

    /// Try to send without blocking.
    ///
    /// Returns `Ok(false)` if the channel is full.
    pub fn try_send(&self, item: impl Into<Flow>) -> Result<bool> {
        self.inner.try_send(item.into()).map_err(|_| Error::Flushing)
    }

    /// Close the channel for both halves, waking any blocked receiver.
    pub fn close(&self) {
        let _ = self.inner.close();
    }

    /// Check if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the channel is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Receiver half of a link, owned by the input port's stage.
pub struct LinkReceiver {
    inner: kanal::Receiver<Flow>,
}

impl LinkReceiver {
    /// Receive the next item.
    ///
    /// Blocks until an item is available. Returns `None` once the channel
    /// is closed.
    pub fn recv(&self) -> Option<Flow> {
        self.inner.recv().ok()
    }

    /// Try to receive without blocking.
    pub fn try_recv(&self) -> Option<Flow> {
        match self.inner.try_recv() {
            Ok(Some(item)) => Some(item),
            _ => None,
        }
    }

    /// Check if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn make_buffer(seq: u64) -> Buffer {
        Buffer::new(vec![0u8; 16]).with_sequence(seq)
    }

    #[test]
    fn test_link_order_and_eos() {
        let (tx, rx) = LocalLink::bounded(8);

        tx.send(make_buffer(1)).unwrap();
        tx.send(make_buffer(2)).unwrap();
        tx.send(Flow::Eos).unwrap();

        let seqs: Vec<_> = std::iter::from_fn(|| rx.recv())
            .take_while(|item| !item.is_eos())
            .map(|item| match item {
                Flow::Buffer(b) => b.sequence(),
                Flow::Eos => unreachable!(),
            })
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_link_threaded() {
        let (tx, rx) = LocalLink::bounded(4);
        let count = 100u64;

        let producer = thread::spawn(move || {
            for i in 0..count {
                tx.send(make_buffer(i)).unwrap();
            }
            tx.send(Flow::Eos).unwrap();
        });

        let mut received = Vec::new();
        while let Some(Flow::Buffer(buf)) = rx.recv() {
            received.push(buf.sequence());
        }
        producer.join().unwrap();

        assert_eq!(received, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_wakes_receiver() {
        let (tx, rx) = LocalLink::bounded(4);
        let closer = tx.clone();

        let waiter = thread::spawn(move || rx.recv());
        thread::sleep(std::time::Duration::from_millis(20));
        closer.close();

        assert!(waiter.join().unwrap().is_none());
        assert!(tx.send(make_buffer(1)).unwrap_err().is_flushing());
    }

    #[test]
    fn test_try_send_full() {
        let (tx, rx) = LocalLink::bounded(1);

        assert!(tx.try_send(make_buffer(1)).unwrap());
        assert!(!tx.try_send(make_buffer(2)).unwrap());
        assert!(rx.try_recv().is_some());
        assert!(tx.try_send(make_buffer(3)).unwrap());
    }
}
