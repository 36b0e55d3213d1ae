//! Model client abstraction for stage invocation.
//!
//! The [`ModelClient`] trait decouples the chain from the actual model backend
//! (a configured CLI command by default). Tests use scripted clients that return
//! predetermined replies without spawning processes.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::stage::StageName;
use crate::core::types::ToolCall;
use crate::io::config::ModelConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Environment variable carrying the stage name to the model command.
pub const STAGE_ENV: &str = "HOOKCHAIN_STAGE";
/// Environment variable carrying the stage input (JSON object) to the model command.
pub const CONTEXT_ENV: &str = "HOOKCHAIN_CONTEXT";

/// Parameters for one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub stage: StageName,
    /// Rendered prompt text.
    pub prompt: String,
    /// Stage input, including carried context fields.
    pub context: Map<String, Value>,
}

/// Raw reply from the model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelReply {
    pub text: String,
    /// Tool calls requested instead of (or alongside) a final answer.
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Interpret command output, recognizing a `{"tool_calls": [...]}` request.
    pub fn from_output(output: &str) -> Self {
        let tool_calls = serde_json::from_str::<ToolCallEnvelope>(output.trim())
            .map(|envelope| envelope.tool_calls)
            .unwrap_or_default();
        Self {
            text: output.to_string(),
            tool_calls,
        }
    }
}

/// Abstraction over model backends.
///
/// Implementations must bound their own wait time; an `Err` covers every
/// transport-level failure (timeout, non-success status, unreachable backend).
pub trait ModelClient {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelReply>;
}

impl<T: ModelClient + ?Sized> ModelClient for &T {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        (**self).invoke(request)
    }
}

/// Model client that spawns a configured command per invocation.
///
/// The prompt is written to stdin and stdout is the reply. The stage name and
/// input are exported as [`STAGE_ENV`] and [`CONTEXT_ENV`].
#[derive(Debug, Clone)]
pub struct CommandModelClient {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModelClient {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl ModelClient for CommandModelClient {
    #[instrument(skip_all, fields(stage = %request.stage, timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        let mut cmd = command_from_argv(&self.command)?;
        let context =
            serde_json::to_string(&request.context).context("serialize model context")?;
        cmd.env(STAGE_ENV, request.stage.as_str())
            .env(CONTEXT_ENV, context);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command '{}'", self.command[0]))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(400)
            ));
        }

        let reply = ModelReply::from_output(&output.stdout_text());
        debug!(
            reply_bytes = reply.text.len(),
            tool_calls = reply.tool_calls.len(),
            "model replied"
        );
        Ok(reply)
    }
}
