//! Built-in tools for the Parley feedback bridge.
//!
//! Exposes `collect_feedback` to an agent host through a [`ToolRegistry`].
//!
//! # Main entry points
//!
//! - [`register_builtins()`] registers every built-in tool over a collector.
//! - [`CollectFeedbackTool`] can also be used on its own.

/// The `collect_feedback` tool.
pub mod collect_feedback;
/// Name-indexed tool registry.
pub mod registry;

pub use collect_feedback::CollectFeedbackTool;
pub use registry::ToolRegistry;

use parley_core::FeedbackCollector;
use std::sync::Arc;
use std::time::Duration;

/// Registers the built-in tools into `registry`.
///
/// `public_url` is the base URL users open to reach the feedback page;
/// `default_timeout` applies when a call names no timeout.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    collector: Arc<dyn FeedbackCollector>,
    public_url: impl Into<String>,
    default_timeout: Duration,
) {
    registry.register(Arc::new(CollectFeedbackTool::new(
        collector,
        public_url,
        default_timeout,
    )));
}
