//! Stage executor: render a stage prompt, invoke the model, dispatch tool calls.
//!
//! The executor never decides success. Render and transport failures come
//! back as `Err(description)` in [`StageReply::reply`] for the retry policy to
//! classify.

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::stage::StageSpec;
use crate::core::types::{ToolCall, ToolInvocation};
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::tools::ToolRegistry;
use crate::prompt::{PromptEngine, prompt_digest};

/// Result of one stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReply {
    /// Digest of the initially rendered prompt (empty if rendering failed).
    pub prompt_digest: String,
    /// Raw reply text, or a description of why no reply was obtained.
    pub reply: Result<String, String>,
    /// Tool calls dispatched while obtaining the reply.
    pub tool_calls: Vec<ToolInvocation>,
}

pub struct StageExecutor<M> {
    model: M,
    prompts: PromptEngine,
    tools: Option<Box<dyn ToolRegistry + Send + Sync>>,
    max_tool_rounds: u32,
}

impl<M: ModelClient> StageExecutor<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            prompts: PromptEngine::new(),
            tools: None,
            max_tool_rounds: 3,
        }
    }

    pub fn with_tools(mut self, tools: impl ToolRegistry + Send + Sync + 'static) -> Self {
        self.tools = Some(Box::new(tools));
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    #[instrument(skip_all, fields(stage = %spec.name, clarified = clarification.is_some()))]
    pub fn execute(
        &self,
        spec: &StageSpec,
        input: &Map<String, Value>,
        clarification: Option<&str>,
    ) -> StageReply {
        let prompt = match self.prompts.render(spec, input, clarification) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "prompt render failed");
                return StageReply {
                    prompt_digest: String::new(),
                    reply: Err(format!("prompt render failed: {err:#}")),
                    tool_calls: Vec::new(),
                };
            }
        };
        let digest = prompt_digest(&prompt);
        let mut request = ModelRequest {
            stage: spec.name,
            prompt,
            context: input.clone(),
        };
        let mut tool_calls = Vec::new();
        let mut rounds = 0u32;

        let reply = loop {
            let reply = match self.model.invoke(&request) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "model invocation failed");
                    break Err(format!("model invocation failed: {err:#}"));
                }
            };
            if reply.tool_calls.is_empty() {
                break Ok(reply.text);
            }
            let Some(tools) = self.tools.as_deref() else {
                debug!(
                    requested = reply.tool_calls.len(),
                    "tool calls requested without a registry"
                );
                break Ok(reply.text);
            };
            if rounds >= self.max_tool_rounds {
                warn!(rounds, "tool round limit reached, using last reply");
                break Ok(reply.text);
            }
            rounds += 1;

            let results = dispatch(tools, &reply.tool_calls);
            request.prompt.push_str(&tool_results_section(rounds, &results));
            tool_calls.extend(results);
        };

        StageReply {
            prompt_digest: digest,
            reply,
            tool_calls,
        }
    }
}

fn dispatch(tools: &(dyn ToolRegistry + Send + Sync), calls: &[ToolCall]) -> Vec<ToolInvocation> {
    calls
        .iter()
        .map(|call| {
            let (result, error) = match tools.call(&call.name, &call.arguments) {
                Ok(value) => (Some(value), None),
                Err(err) => {
                    warn!(tool = %call.name, err = %format!("{err:#}"), "tool call failed");
                    (None, Some(format!("{err:#}")))
                }
            };
            ToolInvocation {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result,
                error,
            }
        })
        .collect()
}

fn tool_results_section(round: u32, results: &[ToolInvocation]) -> String {
    let mut section = format!("\n\n## Tool results (round {round})\n");
    for invocation in results {
        match (&invocation.result, &invocation.error) {
            (_, Some(error)) => {
                section.push_str(&format!("- {} failed: {error}\n", invocation.name));
            }
            (Some(result), None) => {
                section.push_str(&format!("- {}: {result}\n", invocation.name));
            }
            (None, None) => {
                section.push_str(&format!("- {}: null\n", invocation.name));
            }
        }
    }
    section.push_str("\nUse these results and reply with the final JSON object only.");
    section
}
