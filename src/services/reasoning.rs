//! Question answering over an HTTP completion endpoint

use async_trait::async_trait;
use serde_json::json;

use crate::services::Reasoner;
use crate::{Error, Result};

/// Response shape of chat-completion style endpoints
#[derive(serde::Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(serde::Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(serde::Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// HTTP reasoning client
pub struct HttpReasoner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpReasoner {
    /// Create a reasoning client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(endpoint: String, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("reasoning API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        })
    }

    fn first_answer(response: CompletionResponse) -> Result<String> {
        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if answer.trim().is_empty() {
            return Err(Error::UpstreamError(
                "reasoning service returned an empty response".to_string(),
            ));
        }
        Ok(answer)
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn complete(&self, prompt: &str) -> Result<String> {
        tracing::debug!(prompt_chars = prompt.len(), "forwarding question upstream");

        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "reasoning request failed");
                Error::UpstreamError(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "reasoning API error");
            return Err(Error::UpstreamError(format!(
                "reasoning error {status}: {body}"
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamError(format!("malformed response: {e}")))?;

        let answer = Self::first_answer(parsed)?;
        tracing::info!(answer_chars = answer.len(), "question answered");
        Ok(answer)
    }
}
