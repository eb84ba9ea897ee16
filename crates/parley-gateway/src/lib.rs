//! WebSocket and HTTP front end of the Parley feedback bridge.
//!
//! - [`ConnectionManager`] keeps one live transport per session, replays the
//!   outbound gap on attach and supersedes stale transports.
//! - [`FeedbackBridge`] implements [`parley_core::FeedbackCollector`]: it
//!   queues work summaries, parks callers until a reply or timeout, and runs
//!   the periodic sweep.
//! - [`GatewayServer`] exposes `/ws/{session_id}`, `/health` and the
//!   `/api/session/...` endpoints with axum.

/// Feedback waiters, reply handling and the sweeper.
pub mod bridge;
/// Transport attach, supersede and detach.
pub mod connection;
/// axum routes.
pub mod server;

pub use bridge::{FeedbackBridge, Submission, ACK_MESSAGE};
pub use connection::{Attachment, Connection, ConnectionManager};
pub use server::{ApiError, GatewayServer};
