//! The LLM capability seam handed to hosted agents.
//!
//! Provider selection, fallback chains, and accounting live outside the
//! control plane; the runtime only promises agents *some* invoker.

use async_trait::async_trait;

#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Stand-in invoker for nodes with no provider configured. Logs the call
/// and returns an empty completion.
pub struct NoopInvoker;

#[async_trait]
impl LlmInvoker for NoopInvoker {
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
        tracing::debug!(prompt_len = prompt.len(), "llm invocation dropped (no provider)");
        Ok(String::new())
    }
}
