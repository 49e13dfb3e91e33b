//! Reply sinks that hand desktop replies back to the notifying app

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::process::Command;

use crate::app::config::ReplyConfig;
use crate::relay::reply::{ReplyHandle, ReplySink};

/// Only logs the reply
pub struct LogSink;

#[async_trait::async_trait]
impl ReplySink for LogSink {
    async fn submit(&self, handle: &ReplyHandle, text: &str) -> Result<()> {
        tracing::info!(%handle, chars = text.chars().count(), "Reply received");
        Ok(())
    }
}

/// Runs a helper program with the reply handle and text appended as arguments
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Reply command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait::async_trait]
impl ReplySink for CommandSink {
    async fn submit(&self, handle: &ReplyHandle, text: &str) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(handle.as_str())
            .arg(text)
            .output()
            .await
            .with_context(|| format!("Failed to run reply command: {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Reply command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// Build the sink selected in the configuration
pub fn sink_from_config(config: &ReplyConfig) -> Result<Arc<dyn ReplySink>> {
    if config.command.is_empty() {
        Ok(Arc::new(LogSink))
    } else {
        Ok(Arc::new(CommandSink::new(&config.command)?))
    }
}
