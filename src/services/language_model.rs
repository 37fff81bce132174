use async_trait::async_trait;

use crate::error::AppResult;

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> AppResult<String>;
}
