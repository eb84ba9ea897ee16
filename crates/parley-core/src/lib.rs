//! Core types and error definitions for the Parley feedback bridge.
//!
//! This crate provides the foundational types shared across all Parley crates:
//! the envelope wire model, session identifiers, bridge configuration, the
//! error taxonomy, and the tool-invocation boundary.
//!
//! # Main types
//!
//! - [`ParleyError`]: Unified error enum for all Parley components.
//! - [`ParleyResult`]: Convenience alias for `Result<T, ParleyError>`.
//! - [`Envelope`]: A sequenced unit of bridge-to-client traffic.
//! - [`ClientFrame`]: A frame sent by the client to the bridge.
//! - [`SessionId`]: A validated, URL-shareable session token.
//! - [`BridgeConfig`]: TTLs, queue bounds and completion policy.
//! - [`FeedbackCollector`]: The blocking "wait for a human" boundary.

/// Bridge tunables.
pub mod config;
/// Envelope and attachment wire types.
pub mod envelope;
/// Error taxonomy.
pub mod error;
/// Tool-invocation boundary types.
pub mod feedback;
/// Session identifier validation.
pub mod session_id;
/// Generic tool call abstractions.
pub mod tool;

pub use config::BridgeConfig;
pub use envelope::{
    close_code, AttachmentRef, ClientFrame, Envelope, EnvelopeType, ErrorKind, FeedbackPayload,
    Payload, Sequence,
};
pub use error::{ParleyError, ParleyResult};
pub use feedback::{CollectOutcome, CollectRequest, FeedbackCollector, FeedbackResult};
pub use session_id::{SessionId, MAX_SESSION_ID_LEN};
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolResult};
