use async_trait::async_trait;
use parley_core::{
    CollectOutcome, CollectRequest, FeedbackCollector, ParleyResult, SessionId, Tool, ToolCall,
    ToolDescriptor, ToolResult,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Arguments accepted by `collect_feedback`.
#[derive(Debug, Deserialize)]
struct CollectArgs {
    work_summary: String,
    #[serde(default)]
    timeout: Option<i64>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default = "default_require_response")]
    require_response: bool,
}

fn default_require_response() -> bool {
    true
}

/// The `collect_feedback` tool: shows the agent's work summary to a human
/// and blocks until they reply or the timeout passes.
///
/// Results are markdown. A timeout is not an error: the text carries the
/// page URL so the user can still answer later.
pub struct CollectFeedbackTool {
    descriptor: ToolDescriptor,
    collector: Arc<dyn FeedbackCollector>,
    public_url: String,
    default_timeout: Duration,
}

impl CollectFeedbackTool {
    /// Tool over `collector`; `public_url` is where users open the page.
    pub fn new(
        collector: Arc<dyn FeedbackCollector>,
        public_url: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "collect_feedback".to_string(),
                description: "Show a work summary to the user and wait for their feedback. \
                    Use this whenever you need the user to review, confirm or answer \
                    something before continuing."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "work_summary": {
                            "type": "string",
                            "description": "What was done and what needs the user's attention (markdown)"
                        },
                        "timeout": {
                            "type": "integer",
                            "description": "Seconds to wait for a reply",
                            "default": default_timeout.as_secs()
                        },
                        "session_id": {
                            "type": "string",
                            "description": "Reuse an existing session; generated when omitted"
                        },
                        "require_response": {
                            "type": "boolean",
                            "description": "Wait for the reply; false returns right after the summary is queued",
                            "default": true
                        }
                    },
                    "required": ["work_summary"]
                }),
            },
            collector,
            public_url: public_url.into(),
            default_timeout,
        }
    }

    /// Page URL for a session.
    pub fn feedback_url(&self, session_id: &SessionId) -> String {
        let base = self.public_url.trim_end_matches('/');
        format!("{base}/?session={session_id}")
    }

    fn render(&self, outcome: &CollectOutcome) -> String {
        match outcome {
            CollectOutcome::Feedback(result) => format!(
                "User feedback received:\n\n**Text:**\n{}\n\n**Images:** {}\n**Files:** {}\n\n**Session ID:** {}",
                result.text,
                result.image_count(),
                result.file_count(),
                result.session_id
            ),
            CollectOutcome::Timeout { session_id, .. } => {
                let url = self.feedback_url(session_id);
                format!(
                    "Timed out waiting for the user. They can still reply here:\n{url}\n\n**Session ID:** {session_id}"
                )
            }
            CollectOutcome::Delivered { session_id, .. } => {
                let url = self.feedback_url(session_id);
                format!(
                    "Feedback collection started. The user can reply here:\n{url}\n\n**Session ID:** {session_id}"
                )
            }
        }
    }
}

#[async_trait]
impl Tool for CollectFeedbackTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall) -> ParleyResult<ToolResult> {
        let args: CollectArgs = match serde_json::from_value(call.arguments.clone()) {
            Ok(a) => a,
            Err(e) => {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Invalid arguments: {e}"),
                ))
            }
        };

        if args.work_summary.trim().is_empty() {
            return Ok(ToolResult::error(&call.id, "work_summary must not be empty"));
        }

        let timeout = match args.timeout {
            None => self.default_timeout,
            Some(secs) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
            Some(secs) => {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("timeout must be positive, got {secs}"),
                ))
            }
        };

        let mut request = CollectRequest::new(args.work_summary, timeout);
        if let Some(id) = args.session_id {
            request = request.with_session(id);
        }
        if !args.require_response {
            request = request.fire_and_forget();
        }

        info!(
            call_id = %call.id,
            timeout_secs = timeout.as_secs(),
            require_response = request.require_response,
            "Collecting feedback"
        );

        match self.collector.collect_feedback(request).await {
            Ok(outcome) => {
                info!(call_id = %call.id, session_id = %outcome.session_id(), "Feedback call finished");
                Ok(ToolResult::success(&call.id, self.render(&outcome)))
            }
            Err(e) => {
                warn!(call_id = %call.id, error = %e, "Feedback collection failed");
                Ok(ToolResult::error(
                    &call.id,
                    format!("Feedback collection failed: {e}"),
                ))
            }
        }
    }
}
