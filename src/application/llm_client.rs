// LLM client trait for diagnostics prompts
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one system instruction and one user prompt, return the reply text
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String>;
}
