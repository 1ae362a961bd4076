//! Assistant backend over the OpenAI Assistants (v2) HTTP API.
//!
//! Any server speaking the same thread/run protocol works; the base URL is
//! configurable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

use parley_core::{AssistantBackend, Run, ToolCallOutput, ToolDef};

use crate::convert::{
    WireMessageList, WireObject, WireRun, format_tool_outputs, format_tools,
    latest_assistant_text, run_from_wire,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const ASSISTANTS_BETA: &str = "assistants=v2";

/// Max retry attempts for transient errors.
const MAX_RETRIES: u32 = 3;

pub struct OpenAiAssistants {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiAssistants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistants")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiAssistants {
    pub fn new(api_key: String, base_url: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;

        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_owned();
        debug!(base_url = %base_url, "creating assistants backend");

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    /// Create from an API key environment variable.
    pub fn from_env(var: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key =
            std::env::var(var).with_context(|| format!("{var} environment variable not set"))?;
        Self::new(api_key, base_url)
    }

    fn build_request(&self, method: Method, path: &str, body: Option<&Value>) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let req = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA);
        match body {
            Some(body) => req.json(body),
            None => req,
        }
    }

    /// Send a request with retry on transient errors (429, 500, 502, 503).
    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            let response = self
                .build_request(method.clone(), path, body)
                .send()
                .await
                .with_context(|| format!("failed to send request to {path}"))?;

            let status = response.status();
            debug!(status = %status, attempt = attempt + 1, path, "http response");

            if status.is_success() {
                return Ok(response);
            }

            let is_retryable = matches!(status.as_u16(), 429 | 500 | 502 | 503);
            let error_text = response.text().await.unwrap_or_default();

            if !is_retryable || attempt == MAX_RETRIES {
                anyhow::bail!("assistants API error: {status} - {error_text}");
            }

            let backoff_ms = 500u64 * 2u64.pow(attempt);
            warn!(
                attempt = attempt + 1,
                max = MAX_RETRIES,
                status = %status,
                backoff_ms,
                "retryable assistants error, backing off: {error_text}"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            last_err = Some(format!("{status} - {error_text}"));
        }

        anyhow::bail!(
            "assistants API error after retries: {}",
            last_err.unwrap_or_default()
        );
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send_with_retry(method, path, body).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response from {path}"))
    }
}

#[async_trait]
impl AssistantBackend for OpenAiAssistants {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_thread(&self) -> Result<String> {
        let thread: WireObject = self
            .call(Method::POST, "/threads", Some(&json!({})))
            .instrument(info_span!("assistant_create_thread"))
            .await?;
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()> {
        let body = json!({ "role": "user", "content": text });
        let _: WireObject = self
            .call(
                Method::POST,
                &format!("/threads/{thread_id}/messages"),
                Some(&body),
            )
            .instrument(info_span!("assistant_add_message", thread = %thread_id))
            .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        tools: &[ToolDef],
    ) -> Result<Run> {
        let mut body = json!({ "assistant_id": assistant_id });
        if !tools.is_empty() {
            body["tools"] = json!(format_tools(tools));
        }
        let run: WireRun = self
            .call(Method::POST, &format!("/threads/{thread_id}/runs"), Some(&body))
            .instrument(info_span!("assistant_create_run", thread = %thread_id, assistant = %assistant_id))
            .await?;
        run_from_wire(run)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run: WireRun = self
            .call(
                Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}"),
                None,
            )
            .await?;
        run_from_wire(run)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<()> {
        let body = format_tool_outputs(outputs);
        let _: WireRun = self
            .call(
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
                Some(&body),
            )
            .instrument(info_span!("assistant_submit_tool_outputs", thread = %thread_id, run = %run_id))
            .await?;
        Ok(())
    }

    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>> {
        let list: WireMessageList = self
            .call(
                Method::GET,
                &format!("/threads/{thread_id}/messages?limit=5&order=desc"),
                None,
            )
            .await?;
        Ok(latest_assistant_text(list))
    }
}
