//! Links carrying data between stages.
//!
//! Every input port owns a bounded channel created together with the port.
//! Linking hands a clone of that channel's sender to the upstream output
//! port, so a consumer can start waiting before anything is linked to it.
//!
//! Items on a link are [`Flow`] values: buffers followed by a single
//! end-of-stream marker.

mod local;

pub use local::{Flow, LinkReceiver, LinkSender, LocalLink};
