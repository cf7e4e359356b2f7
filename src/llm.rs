use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Minimal client for Ollama's non-streaming `/api/generate`.
pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
}

impl OllamaClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Client)?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, LlmError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: temperature.map(|temperature| GenerateOptions { temperature }),
        };

        let res = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(LlmError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body: GenerateResponse = res.json().await.map_err(|source| LlmError::Request {
            url: self.url.clone(),
            source,
        })?;
        Ok(body.response.trim().to_string())
    }
}

/// Decides whether `message` is a fitting reply to the profile text `context`.
#[async_trait]
pub trait SuitabilityPredicate: Send + Sync {
    async fn is_suitable(&self, context: &str, message: &str) -> bool;
}

/// Suitability judged by a yes/no question to the language model.
/// Any failure counts as "not suitable".
pub struct LlmJudge {
    client: Arc<OllamaClient>,
    model: String,
}

impl LlmJudge {
    pub fn new(client: Arc<OllamaClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

pub fn judge_prompt(context: &str, message: &str) -> String {
    format!(
        "Prompt: \"{}\"\nMessage: \"{}\"\n\
         Is this message a good, relevant, and contextually appropriate reply to the prompt? \
         Reply with only \"yes\" or \"no\".",
        context.trim(),
        message.trim()
    )
}

pub fn parse_verdict(response: &str) -> bool {
    response.to_lowercase().contains("yes")
}

#[async_trait]
impl SuitabilityPredicate for LlmJudge {
    async fn is_suitable(&self, context: &str, message: &str) -> bool {
        let prompt = judge_prompt(context, message);
        match self.client.generate(&self.model, &prompt, None).await {
            Ok(response) => {
                let verdict = parse_verdict(&response);
                tracing::info!("judge said {response:?} -> suitable={verdict}");
                verdict
            }
            Err(e) => {
                tracing::error!("suitability check failed: {e:#}");
                false
            }
        }
    }
}

/// Writes an opening message for a profile.
#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate(&self, bio: &str) -> Option<String>;
}

pub struct LlmGenerator {
    client: Arc<OllamaClient>,
    model: String,
    temperature: f32,
    max_retries: u32,
    personality: String,
    style: String,
}

impl LlmGenerator {
    pub fn new(client: Arc<OllamaClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.generation_model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries.max(1),
            personality: config.personality.clone(),
            style: config.style.clone(),
        }
    }
}

pub fn generation_prompt(bio: &str, personality: &str, style: &str) -> String {
    format!(
        "You are a {personality} person trying to message someone on a dating app.\n\
         Their bio is:\n\"{}\"\n\
         Write a {style} opener that sounds natural, not generic. Reply with the message only.",
        bio.trim()
    )
}

/// Trim whitespace and one pair of surrounding quotes; `None` if nothing is left.
pub fn clean_generated(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')] {
        if let Some(inner) = text.strip_prefix(open).and_then(|t| t.strip_suffix(close)) {
            text = inner.trim();
            break;
        }
    }
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl MessageGenerator for LlmGenerator {
    async fn generate(&self, bio: &str) -> Option<String> {
        let prompt = generation_prompt(bio, &self.personality, &self.style);

        for attempt in 1..=self.max_retries {
            match self
                .client
                .generate(&self.model, &prompt, Some(self.temperature))
                .await
            {
                Ok(raw) => {
                    if let Some(message) = clean_generated(&raw) {
                        tracing::info!("generated message on attempt {attempt}: {message:?}");
                        return Some(message);
                    }
                    tracing::warn!("attempt {attempt}/{}: empty generation", self.max_retries);
                }
                Err(e) => {
                    tracing::warn!("attempt {attempt}/{}: generation failed: {e:#}", self.max_retries);
                }
            }
        }

        tracing::error!("no message generated after {} attempts", self.max_retries);
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    /// Serve `/api/generate` locally, answering each request with the next
    /// entry of `replies` (the last one repeats).
    async fn mock_ollama(replies: Vec<&'static str>) -> (String, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let state = (Arc::new(replies), calls.clone());

        async fn handler(
            State((replies, calls)): State<(Arc<Vec<&'static str>>, Arc<AtomicU32>)>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            assert_eq!(body["stream"], json!(false));
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = replies[n.min(replies.len() - 1)];
            Json(json!({"model": body["model"], "response": reply, "done": true}))
        }

        let app = Router::new()
            .route("/api/generate", post(handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/api/generate"), calls)
    }

    fn client(url: &str) -> Arc<OllamaClient> {
        Arc::new(OllamaClient::new(url, Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict("Yes."));
        assert!(parse_verdict("  YES"));
        assert!(!parse_verdict("No, it is off topic."));
        assert!(!parse_verdict(""));
    }

    #[test]
    fn test_judge_prompt_quotes_both_sides() {
        let prompt = judge_prompt("  My simple pleasures\n", " Coffee? ");
        assert!(prompt.starts_with("Prompt: \"My simple pleasures\"\nMessage: \"Coffee?\"\n"));
        assert!(prompt.ends_with("Reply with only \"yes\" or \"no\"."));
    }

    #[test]
    fn test_clean_generated() {
        assert_eq!(clean_generated("  \"Hi there!\" ").as_deref(), Some("Hi there!"));
        assert_eq!(clean_generated("'Hey'").as_deref(), Some("Hey"));
        assert_eq!(clean_generated("Plain text").as_deref(), Some("Plain text"));
        assert_eq!(clean_generated(" \"\" "), None);
    }

    #[tokio::test]
    async fn test_judge_against_mock() {
        let (url, calls) = mock_ollama(vec!["yes"]).await;
        let judge = LlmJudge::new(client(&url), "mistral");
        assert!(judge.is_suitable("Best travel story", "Tell me about Lisbon").await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_judge_unreachable_is_unsuitable() {
        let judge = LlmJudge::new(client("http://127.0.0.1:1/api/generate"), "mistral");
        assert!(!judge.is_suitable("prompt", "message").await);
    }

    #[tokio::test]
    async fn test_generator_retries_empty_responses() {
        let (url, calls) = mock_ollama(vec!["", "  ", "\"Lisbon or Porto?\""]).await;
        let config = LlmConfig::default();
        let generator = LlmGenerator::new(client(&url), &config);

        let message = generator.generate("Loves travel").await;
        assert_eq!(message.as_deref(), Some("Lisbon or Porto?"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_generator_gives_up() {
        let (url, calls) = mock_ollama(vec![""]).await;
        let config = LlmConfig {
            max_retries: 2,
            ..LlmConfig::default()
        };
        let generator = LlmGenerator::new(client(&url), &config);

        assert!(generator.generate("bio").await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
