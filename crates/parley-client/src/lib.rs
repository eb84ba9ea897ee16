//! Client side of the Parley feedback bridge.
//!
//! # Main types
//!
//! - [`ReconnectController`]: Pure reconnect/backoff state machine.
//! - [`BridgeClient`]: Drives a WebSocket to the gateway, reconnecting per
//!   the controller and never surfacing an envelope twice.
//! - [`FeedbackComposer`]: Validates a reply and sends it, keeping it for
//!   an unchanged retry when the transport is down.

/// WebSocket driver.
pub mod client;
/// Reply drafting and submission.
pub mod composer;
/// Reconnect state machine and backoff.
pub mod reconnect;

pub use client::{BridgeClient, ClientEvent};
pub use composer::{FeedbackComposer, FeedbackDraft, FrameSink};
pub use reconnect::{
    compute_backoff, Action, AttemptRecord, ConnectionState, ReconnectController,
    ReconnectPolicy, Trigger,
};
