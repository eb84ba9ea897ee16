//! Session state for the Parley feedback bridge.
//!
//! A [`SessionStore`] owns every [`Session`]. Each session carries its own
//! [`MessageChannel`] (sequenced outbound queue with gap replay, deduplicated
//! inbound queue) and at most one [`TransportHandle`] to the socket task that
//! serves it. All of that sits behind one per-session mutex, so delivery,
//! state changes and transport swaps for a session never interleave.

/// Ordered, bounded per-session queues.
pub mod channel;
/// Session lifecycle.
pub mod session;
/// Process-wide session registry and sweep.
pub mod store;
/// Handle to the live transport of a session.
pub mod transport;

pub use channel::{InboundOutcome, MessageChannel, MIN_OUTBOUND_CAPACITY};
pub use session::{Session, SessionInfo, SessionOptions, SessionState};
pub use store::{SessionStore, SharedSession, SweepReport};
pub use transport::{TransportCommand, TransportHandle};
