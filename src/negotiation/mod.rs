//! Link negotiation.
//!
//! Static links are checked when they are made: both ports' caps must
//! intersect. Links to outputs that only appear at runtime are described up
//! front as [`DeferredLinkIntent`]s and resolved by the [`LinkResolver`]
//! when the stage announces the port.

mod error;
mod resolver;

pub use error::NegotiationError;
pub use resolver::{DeferredLinkIntent, LinkResolver, Resolution};
