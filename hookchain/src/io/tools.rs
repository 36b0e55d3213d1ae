//! Tool registry: call-by-name dispatch for tool calls requested mid-stage.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Abstraction over tool backends.
pub trait ToolRegistry {
    /// Invoke the tool registered as `name`; unknown names are an error.
    fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value>;
}

impl<T: ToolRegistry + ?Sized> ToolRegistry for &T {
    fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value> {
        (**self).call(name, arguments)
    }
}

/// One entry of the tool descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    /// Command receiving the JSON arguments on stdin and printing its result on stdout.
    pub command: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// Registry of command-backed tools loaded from a JSON descriptor file:
///
/// ```json
/// {"tools": [{"name": "memory_bank", "command": ["python3", "tools/memory_bank.py"]}]}
/// ```
#[derive(Debug, Clone)]
pub struct CommandToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandToolRegistry {
    pub fn new(
        descriptors: Vec<ToolDescriptor>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.command.is_empty() {
                return Err(anyhow!("tool '{}' has an empty command", descriptor.name));
            }
            if tools.contains_key(&descriptor.name) {
                return Err(anyhow!("duplicate tool name '{}'", descriptor.name));
            }
            tools.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self {
            tools,
            timeout,
            output_limit_bytes,
        })
    }

    /// Load descriptors from `path`. A missing file yields an empty registry.
    pub fn load(path: &Path, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no tool registry file, starting empty");
            return Self::new(Vec::new(), timeout, output_limit_bytes);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let file: RegistryFile =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        Self::new(file.tools, timeout, output_limit_bytes)
            .with_context(|| format!("invalid tool registry {}", path.display()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

impl ToolRegistry for CommandToolRegistry {
    #[instrument(skip_all, fields(tool = name))]
    fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value> {
        let descriptor = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("tool '{name}' not registered"))?;
        let cmd = command_from_argv(&descriptor.command)?;
        let input = serde_json::to_vec(arguments).context("serialize tool arguments")?;

        let output = run_command_with_timeout(cmd, Some(&input), self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run tool '{name}'"))?;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "tool timed out");
            return Err(anyhow!("tool '{name}' timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "tool '{name}' failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(400)
            ));
        }

        let stdout = output.stdout_text();
        let result = serde_json::from_str(stdout.trim())
            .unwrap_or_else(|_| Value::String(stdout.trim().to_string()));
        debug!("tool call completed");
        Ok(result)
    }
}
