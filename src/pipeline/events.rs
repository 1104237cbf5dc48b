//! Pipeline message bus.
//!
//! Stages and the controller post [`Message`]s on the bus; the controller is
//! the single consumer. Waiting is filtered: messages that do not match the
//! filter are discarded while waiting.

use super::PipelineState;
use crate::observability::record_bus_message;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Messages posted on a pipeline bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A stage hit a fatal runtime error.
    Error {
        /// Name of the stage that posted the error.
        source: String,
        /// Human-readable description.
        description: String,
        /// Optional debugging detail.
        debug: Option<String>,
    },

    /// A non-fatal problem, such as a refused dynamic link.
    Warning {
        /// Name of the stage (or component) that posted the warning.
        source: String,
        /// Human-readable description.
        description: String,
        /// Optional debugging detail.
        debug: Option<String>,
    },

    /// Every sink has seen the end of its stream.
    EndOfStream,

    /// The pipeline moved between lifecycle states.
    StateChanged {
        /// Previous state.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },
}

impl Message {
    /// Short kind name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Error { .. } => "error",
            Message::Warning { .. } => "warning",
            Message::EndOfStream => "eos",
            Message::StateChanged { .. } => "state-changed",
        }
    }

    /// Whether this message ends the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Error { .. } | Message::EndOfStream)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Error {
                source,
                description,
                ..
            } => write!(f, "Error from {source}: {description}"),
            Message::Warning {
                source,
                description,
                ..
            } => write!(f, "Warning from {source}: {description}"),
            Message::EndOfStream => write!(f, "EOS"),
            Message::StateChanged { from, to } => write!(f, "StateChanged: {from} -> {to}"),
        }
    }
}

/// Set of message kinds to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageFilter(u8);

impl MessageFilter {
    /// Error messages.
    pub const ERROR: Self = Self(1);
    /// End-of-stream messages.
    pub const EOS: Self = Self(1 << 1);
    /// State-change messages.
    pub const STATE_CHANGED: Self = Self(1 << 2);
    /// Warning messages.
    pub const WARNING: Self = Self(1 << 3);
    /// Every message.
    pub const ALL: Self = Self(0b1111);
    /// The terminal set: error or end of stream.
    pub const TERMINAL: Self = Self(0b0011);

    /// Whether the message is in this set.
    pub fn matches(&self, message: &Message) -> bool {
        let bit = match message {
            Message::Error { .. } => Self::ERROR,
            Message::EndOfStream => Self::EOS,
            Message::StateChanged { .. } => Self::STATE_CHANGED,
            Message::Warning { .. } => Self::WARNING,
        };
        self.0 & bit.0 != 0
    }
}

impl BitOr for MessageFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Posting half of a bus. Cheap to clone.
#[derive(Clone)]
pub struct BusSender {
    pipeline: Arc<str>,
    tx: kanal::Sender<Message>,
}

impl BusSender {
    /// Post a message.
    ///
    /// Posting on a closed bus is a no-op: nobody is listening anymore.
    pub fn post(&self, message: Message) {
        trace!(pipeline = %self.pipeline, kind = message.kind(), "posting message");
        record_bus_message(&self.pipeline, message.kind());
        let _ = self.tx.send(message);
    }

    /// Post an [`Message::Error`].
    pub fn post_error(
        &self,
        source: impl Into<String>,
        description: impl Into<String>,
        debug: Option<String>,
    ) {
        self.post(Message::Error {
            source: source.into(),
            description: description.into(),
            debug,
        });
    }

    /// Post a [`Message::Warning`].
    pub fn post_warning(
        &self,
        source: impl Into<String>,
        description: impl Into<String>,
        debug: Option<String>,
    ) {
        self.post(Message::Warning {
            source: source.into(),
            description: description.into(),
            debug,
        });
    }

    /// Name of the pipeline this bus belongs to.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}

/// Single-consumer message bus of one pipeline.
pub struct EventBus {
    sender: BusSender,
    rx: kanal::Receiver<Message>,
}

impl EventBus {
    /// Create a bus for the named pipeline.
    pub fn new(pipeline: &str) -> Self {
        let (tx, rx) = kanal::unbounded();
        Self {
            sender: BusSender {
                pipeline: Arc::from(pipeline),
                tx,
            },
            rx,
        }
    }

    /// A posting handle.
    pub fn sender(&self) -> BusSender {
        self.sender.clone()
    }

    /// Post a message.
    pub fn post(&self, message: Message) {
        self.sender.post(message);
    }

    /// Take the next message without blocking.
    pub fn try_pop(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(Some(message)) => Some(message),
            _ => None,
        }
    }

    /// Block until a message arrives. `None` once the bus is closed.
    pub fn pop(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    /// Block until a message matching `filter` arrives, discarding others.
    pub fn pop_filtered(&self, filter: MessageFilter) -> Option<Message> {
        loop {
            let message = self.rx.recv().ok()?;
            if filter.matches(&message) {
                return Some(message);
            }
            debug!(kind = message.kind(), "discarding message while waiting");
        }
    }

    /// Like [`pop_filtered`](Self::pop_filtered), giving up after `timeout`.
    pub fn timed_pop_filtered(
        &self,
        filter: MessageFilter,
        timeout: Duration,
    ) -> Option<Message> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let message = self.rx.recv_timeout(remaining).ok()?;
            if filter.matches(&message) {
                return Some(message);
            }
            debug!(kind = message.kind(), "discarding message while waiting");
        }
    }

    /// Async form of [`pop_filtered`](Self::pop_filtered).
    pub async fn pop_filtered_async(&self, filter: MessageFilter) -> Option<Message> {
        let rx = self.rx.as_async();
        loop {
            let message = rx.recv().await.ok()?;
            if filter.matches(&message) {
                return Some(message);
            }
            debug!(kind = message.kind(), "discarding message while waiting");
        }
    }

    /// Close the bus. Pending and future messages are discarded.
    pub fn close(&self) {
        let _ = self.rx.close();
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

/// Counts sinks that still expect data and posts end of stream once all
/// of them have finished.
pub(crate) struct EosTracker {
    pending: AtomicUsize,
    bus: BusSender,
}

impl EosTracker {
    pub(crate) fn new(sinks: usize, bus: BusSender) -> Self {
        Self {
            pending: AtomicUsize::new(sinks),
            bus,
        }
    }

    /// Record one sink reaching end of stream.
    pub(crate) fn sink_done(&self, sink: &str) {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                debug!(sink = %sink, "last sink reached end of stream");
                self.bus.post(Message::EndOfStream);
            }
            Ok(n) => trace!(sink = %sink, remaining = n - 1, "sink reached end of stream"),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(source: &str) -> Message {
        Message::Error {
            source: source.to_string(),
            description: "boom".to_string(),
            debug: None,
        }
    }

    #[test]
    fn test_filter_matches() {
        assert!(MessageFilter::TERMINAL.matches(&Message::EndOfStream));
        assert!(MessageFilter::TERMINAL.matches(&error("src")));
        assert!(!MessageFilter::TERMINAL.matches(&Message::StateChanged {
            from: PipelineState::Ready,
            to: PipelineState::Paused,
        }));
        assert_eq!(MessageFilter::ERROR | MessageFilter::EOS, MessageFilter::TERMINAL);
    }

    #[test]
    fn test_pop_filtered_discards_others() {
        let bus = EventBus::new("test");
        bus.post(Message::StateChanged {
            from: PipelineState::Paused,
            to: PipelineState::Playing,
        });
        bus.post(Message::Warning {
            source: "decodebin0".into(),
            description: "link refused".into(),
            debug: None,
        });
        bus.post(error("udpsrc0"));
        bus.post(Message::EndOfStream);

        assert_eq!(bus.pop_filtered(MessageFilter::TERMINAL), Some(error("udpsrc0")));
        assert_eq!(bus.try_pop(), Some(Message::EndOfStream));
        assert_eq!(bus.try_pop(), None);
    }

    #[test]
    fn test_timed_pop_gives_up() {
        let bus = EventBus::new("test");
        bus.post(Message::StateChanged {
            from: PipelineState::Paused,
            to: PipelineState::Playing,
        });
        let popped = bus.timed_pop_filtered(MessageFilter::TERMINAL, Duration::from_millis(20));
        assert!(popped.is_none());
    }

    #[test]
    fn test_post_after_close_is_ignored() {
        let bus = EventBus::new("test");
        let sender = bus.sender();
        bus.close();
        sender.post(Message::EndOfStream);
        assert!(bus.pop().is_none());
    }

    #[test]
    fn test_eos_tracker_waits_for_all_sinks() {
        let bus = EventBus::new("test");
        let tracker = EosTracker::new(2, bus.sender());

        tracker.sink_done("a");
        assert!(bus.try_pop().is_none());
        tracker.sink_done("b");
        assert_eq!(bus.try_pop(), Some(Message::EndOfStream));

        // extra reports never post twice
        tracker.sink_done("b");
        assert!(bus.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_filtered_async() {
        let bus = EventBus::new("test");
        let sender = bus.sender();
        tokio::spawn(async move {
            sender.post_warning("x", "ignored", None);
            sender.post(Message::EndOfStream);
        });

        let message = bus.pop_filtered_async(MessageFilter::TERMINAL).await;
        assert_eq!(message, Some(Message::EndOfStream));
    }

    #[test]
    fn test_message_display() {
        assert_eq!(error("sink").to_string(), "Error from sink: boom");
        assert_eq!(Message::EndOfStream.to_string(), "EOS");
    }
}
