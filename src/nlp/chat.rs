//! Chat-completions backend for any OpenAI-compatible endpoint
//! (Ollama, llama.cpp server, vLLM, hosted APIs).
//!
//! Requests are non-streaming. The worker keeps the last
//! [`NlpConfig::history_turns`] exchanges as context and strips a leading
//! `[emotion:X]` tag from replies into [`NlpResponse::response_emotion`].

use super::{NLP_COMMANDS, NLP_EVENTS};
use crate::capability::CapabilityId;
use crate::config::{NlpConfig, RobotConfig};
use crate::emotion;
use crate::error::{Result, RobotError};
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, NlpResponse, SegmentStyle, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions worker.
pub struct ChatNlpWorker {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    system: ChatMessage,
    history: VecDeque<ChatMessage>,
    history_turns: usize,
}

impl std::fmt::Debug for ChatNlpWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatNlpWorker")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("history", &self.history.len())
            .finish()
    }
}

impl ChatNlpWorker {
    /// Build a worker for `config.endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured, the API key variable is
    /// unset, or the HTTP client cannot be built.
    pub fn new(config: &NlpConfig) -> Result<Self> {
        let endpoint = endpoint_url(config)?;
        let api_key = api_key(config)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.as_str().trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            system: ChatMessage {
                role: "system",
                content: config.system_prompt.clone(),
            },
            history: VecDeque::new(),
            history_turns: config.history_turns,
        })
    }

    async fn complete(&self, user: &ChatMessage) -> Result<String> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(&self.system);
        messages.extend(self.history.iter());
        messages.push(user);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RobotError::Nlp(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RobotError::Nlp(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body)
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| RobotError::Nlp(format!("unexpected response: {e}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RobotError::Nlp("empty completion".to_owned()))
    }

    fn remember(&mut self, user: ChatMessage, reply: String) {
        self.history.push_back(user);
        self.history.push_back(ChatMessage {
            role: "assistant",
            content: reply,
        });
        while self.history.len() > self.history_turns * 2 {
            self.history.pop_front();
        }
    }
}

#[async_trait]
impl Worker for ChatNlpWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Nlp
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let text = match command {
            Command::ProcessInput { text } => text,
            other => return Err(unsupported(CapabilityId::Nlp, &other)),
        };
        let input = text.trim();
        if input.is_empty() {
            return Err(RobotError::Nlp("empty input".to_owned()));
        }

        let user = ChatMessage {
            role: "user",
            content: input.to_owned(),
        };
        let raw = self.complete(&user).await?;
        let (reply, response_emotion) = match emotion::strip_emotion_tag(&raw) {
            Some((rest, tag)) => (rest, Some(tag)),
            None => (raw, None),
        };
        debug!(chars = reply.len(), emotion = ?response_emotion, "completion received");
        self.remember(user, reply.clone());

        let reading = emotion::classify(input);
        let detected_emotion = (reading.emotion != "neutral").then_some(reading.emotion);
        ctx.emit(Event::ProcessingComplete(NlpResponse {
            kind: "llm_response".to_owned(),
            text_to_speak: reply.clone(),
            display: vec![(SegmentStyle::Normal, reply)],
            original_input: input.to_owned(),
            timestamp: Utc::now(),
            detected_emotion,
            response_emotion,
            action: None,
        }));
        Ok(())
    }
}

fn endpoint_url(config: &NlpConfig) -> Result<reqwest::Url> {
    let raw = config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| RobotError::Config("nlp.endpoint is not set".to_owned()))?;
    let url = reqwest::Url::parse(raw)
        .map_err(|e| RobotError::Config(format!("nlp.endpoint {raw:?} is invalid: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RobotError::Config(format!(
            "nlp.endpoint scheme {other} is not http(s)"
        ))),
    }
}

fn api_key(config: &NlpConfig) -> Result<Option<String>> {
    match config.api_key_env.as_deref() {
        None => Ok(None),
        Some(var) => std::env::var(var)
            .map(Some)
            .map_err(|_| RobotError::Config(format!("environment variable {var} is not set"))),
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

pub struct ChatNlpProvider;

impl WorkerProvider for ChatNlpProvider {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Nlp
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        NLP_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        NLP_EVENTS
    }

    fn probe(&self, config: &RobotConfig) -> Result<()> {
        endpoint_url(&config.nlp)?;
        api_key(&config.nlp)?;
        Ok(())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        let worker = ChatNlpWorker::new(&config.nlp)?;
        info!(url = worker.url.as_str(), model = worker.model.as_str(), "chat backend ready");
        Ok(Box::new(worker))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> NlpConfig {
        NlpConfig {
            endpoint: Some(format!("{}/v1", server.uri())),
            history_turns: 1,
            ..NlpConfig::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn probe_requires_endpoint() {
        let config = RobotConfig::default();
        let err = ChatNlpProvider.probe(&config).expect_err("no endpoint");
        assert!(err.to_string().contains("nlp.endpoint"));
    }

    #[test]
    fn probe_rejects_non_http_endpoint() {
        let mut config = RobotConfig::default();
        config.nlp.endpoint = Some("ftp://example.com".into());
        assert!(ChatNlpProvider.probe(&config).is_err());
    }

    #[test]
    fn probe_requires_api_key_variable() {
        let mut config = RobotConfig::default();
        config.nlp.endpoint = Some("http://localhost:11434/v1".into());
        config.nlp.api_key_env = Some("UPDOGO_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = ChatNlpProvider.probe(&config).expect_err("missing key");
        assert!(err.to_string().contains("UPDOGO_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn error_message_extraction() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"model not found"}}"#),
            "model not found"
        );
        assert_eq!(extract_error_message("plain failure"), "plain failure");
    }

    #[tokio::test]
    async fn reply_becomes_processing_complete_with_emotion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({ "stream": false })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("[emotion:happy] Nice to meet you!")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut worker = ChatNlpWorker::new(&config_for(&server)).expect("worker");
        let (ctx, mut rx) = WorkerContext::standalone(CapabilityId::Nlp);
        worker
            .handle(
                Command::ProcessInput {
                    text: "hello, I am so happy and glad".into(),
                },
                &ctx,
            )
            .await
            .expect("handle");

        match rx.try_recv().expect("event").event {
            Event::ProcessingComplete(response) => {
                assert_eq!(response.kind, "llm_response");
                assert_eq!(response.text_to_speak, "Nice to meet you!");
                assert_eq!(response.response_emotion.as_deref(), Some("happy"));
                assert_eq!(response.detected_emotion.as_deref(), Some("happy"));
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn history_is_bounded_and_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let mut worker = ChatNlpWorker::new(&config_for(&server)).expect("worker");
        let (ctx, _rx) = WorkerContext::standalone(CapabilityId::Nlp);
        for text in ["one", "two", "three"] {
            worker
                .handle(Command::ProcessInput { text: text.into() }, &ctx)
                .await
                .expect("handle");
        }
        assert_eq!(worker.history.len(), 2);
        assert_eq!(worker.history[0].content, "three");

        let requests = server.received_requests().await.expect("recorded");
        let last: serde_json::Value = serde_json::from_slice(&requests[2].body).expect("json");
        let messages = last["messages"].as_array().expect("messages");
        // system + one remembered exchange + new user message
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["content"], "two");
    }

    #[tokio::test]
    async fn bearer_token_is_sent_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi")))
            .expect(1)
            .mount(&server)
            .await;

        let mut worker = ChatNlpWorker::new(&config_for(&server)).expect("worker");
        worker.api_key = Some("sk-test".into());
        let (ctx, _rx) = WorkerContext::standalone(CapabilityId::Nlp);
        worker
            .handle(Command::ProcessInput { text: "hi".into() }, &ctx)
            .await
            .expect("handle");
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({ "error": { "message": "overloaded" } })),
            )
            .mount(&server)
            .await;

        let mut worker = ChatNlpWorker::new(&config_for(&server)).expect("worker");
        let (ctx, _rx) = WorkerContext::standalone(CapabilityId::Nlp);
        let err = worker
            .handle(Command::ProcessInput { text: "hi".into() }, &ctx)
            .await
            .expect_err("server error");
        assert_eq!(err.to_string(), "NLP error: HTTP 500: overloaded");
        assert!(worker.history.is_empty());
    }
}
