//! HTTP façade for the local inference gateway.
//!
//! Exposes the mediator behind two API dialects: OpenAI chat completions and
//! Anthropic messages. Both normalize into the same internal call and render
//! the same [`inference::GenerationResult`] back out, as JSON or as SSE.

use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use config::{Backend, Config, ReasoningLevel};
use harmony::{HarmonyEncoding, ReasoningEffort, Tokenizer};
use inference::{EchoEngine, Engine, Mediator, MediatorSettings, MemoryBudget, Recovery};
use serde::Serialize;
use uuid::Uuid;

mod convert;
mod error;
pub mod protocol;
mod stream;

pub use error::{AnthropicApiError, AnthropicResult, ApiError, ApiResult};

use crate::protocol::{anthropic, openai};

/// Shared server state: the mediator (when a backend is loaded) plus the
/// configuration snapshot.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    /// Present when a backend is loaded; absent means every completion
    /// endpoint answers 503.
    mediator: Option<Arc<Mediator>>,
    config: Config,
    started_at: Instant,
}

impl Gateway {
    /// Assemble the gateway from configuration: tokenizer, backend,
    /// mediator.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(HarmonyEncoding::o200k()?);

        let engine: Option<Arc<dyn Engine>> = match config.model.backend {
            Backend::Echo => {
                log::info!("using the echo development backend");
                Some(Arc::new(EchoEngine::new(
                    Arc::clone(&tokenizer),
                    config.model.context_window,
                )))
            }
            Backend::None => {
                log::warn!("no backend configured; serving without a loaded model");
                None
            }
        };

        let settings = MediatorSettings {
            knowledge_cutoff: config.inference.knowledge_cutoff.clone(),
            current_date: config.inference.current_date.clone(),
            reasoning: config.inference.reasoning.map(|level| match level {
                ReasoningLevel::Low => ReasoningEffort::Low,
                ReasoningLevel::Medium => ReasoningEffort::Medium,
                ReasoningLevel::High => ReasoningEffort::High,
            }),
            capture_reasoning: config.inference.capture_reasoning,
            tools: Vec::new(),
        };

        let memory = MemoryBudget::from_gb(config.model.available_memory_gb, config.model.safety_margin_gb);

        let mediator = engine.map(|engine| {
            Arc::new(Mediator::new(
                engine,
                Arc::clone(&tokenizer),
                settings,
                memory,
                Recovery::default(),
            ))
        });

        Ok(Self {
            inner: Arc::new(GatewayInner {
                mediator,
                config,
                started_at: Instant::now(),
            }),
        })
    }

    fn mediator(&self) -> Result<&Arc<Mediator>, inference::Error> {
        self.inner.mediator.as_ref().ok_or(inference::Error::NotReady)
    }
}

/// Build the axum router over a gateway.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .with_state(gateway)
}

fn unix_now() -> u64 {
    u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or(0)
}

/// Health payload for `/health`.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    uptime_seconds: f64,
}

async fn health(State(gateway): State<Gateway>) -> Response {
    let loaded = gateway
        .inner
        .mediator
        .as_ref()
        .is_some_and(|mediator| mediator.is_ready());

    let body = HealthResponse {
        status: if loaded { "ok" } else { "error" },
        model_loaded: loaded,
        model_name: loaded.then(|| gateway.inner.config.model.name.clone()),
        uptime_seconds: gateway.inner.started_at.elapsed().as_secs_f64(),
    };

    let status = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}

async fn list_models(State(gateway): State<Gateway>) -> Json<openai::ModelsResponse> {
    Json(openai::ModelsResponse {
        object: "list".to_string(),
        data: vec![openai::Model {
            id: gateway.inner.config.model.name.clone(),
            object: "model".to_string(),
            created: unix_now(),
            owned_by: "local".to_string(),
        }],
    })
}

/// Handle OpenAI chat completion requests, streaming and not.
async fn chat_completions(
    State(gateway): State<Gateway>,
    Json(request): Json<openai::ChatCompletionRequest>,
) -> ApiResult<Response> {
    log::debug!(
        "chat completions: model={}, {} messages, stream={}",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let mediator = gateway.mediator()?;

    if request.model != gateway.inner.config.model.name {
        return Err(ApiError(inference::Error::InvalidInput(format!(
            "model '{}' is not available; use '{}'",
            request.model, gateway.inner.config.model.name
        ))));
    }

    let model = request.model.clone();
    let wants_stream = request.stream.unwrap_or(false);
    let (messages, params) = convert::openai_request(request, &gateway.inner.config.inference)?;

    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = unix_now();

    if wants_stream {
        let handle = mediator.generate_stream(&messages, params).await?;
        return Ok(Sse::new(stream::openai_events(handle, id, created, model)).into_response());
    }

    let result = mediator.generate(&messages, params).await?;

    let response = openai::ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ChatMessage {
                role: "assistant".to_string(),
                content: result.text,
            },
            finish_reason: result.finish_reason.to_string(),
        }],
        usage: openai::Usage {
            prompt_tokens: result.prompt_tokens,
            completion_tokens: result.tokens_generated,
            total_tokens: result.prompt_tokens + result.tokens_generated,
        },
    };

    Ok(Json(response).into_response())
}

/// Handle Anthropic messages requests, streaming and not.
async fn anthropic_messages(
    State(gateway): State<Gateway>,
    Json(request): Json<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    log::debug!(
        "anthropic messages: model={}, {} messages, stream={}",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let mediator = gateway.mediator()?;

    let model = request.model.clone();
    // The operator-side knob forces streaming on when set; otherwise the
    // request decides.
    let wants_stream = gateway.inner.config.inference.streaming || request.stream.unwrap_or(false);
    let (messages, params) = convert::anthropic_request(request, &gateway.inner.config.inference)?;

    let id = format!("msg_{}", Uuid::new_v4().simple());

    if wants_stream {
        let handle = mediator.generate_stream(&messages, params).await?;
        return Ok(Sse::new(stream::anthropic_events(handle, id, model)).into_response());
    }

    let result = mediator.generate(&messages, params).await?;

    // Reasoning capture opt-in: surface chain-of-thought as a thinking
    // block ahead of the answer.
    let text = match &result.analysis {
        Some(analysis) => format!("<thinking>\n{analysis}\n</thinking>\n\n{}", result.text),
        None => result.text.clone(),
    };

    let response = anthropic::MessagesResponse {
        id,
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![anthropic::ResponseBlock::text(text)],
        model,
        stop_reason: Some(anthropic::stop_reason(result.finish_reason).to_string()),
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: result.prompt_tokens,
            output_tokens: result.tokens_generated,
        },
    };

    Ok(Json(response).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn echo_gateway() -> Gateway {
        Gateway::from_config(Config::default()).expect("gateway should build")
    }

    fn bare_gateway() -> Gateway {
        let config = Config {
            model: config::ModelConfig {
                backend: Backend::None,
                ..config::ModelConfig::default()
            },
            ..Config::default()
        };

        Gateway::from_config(config).expect("gateway should build")
    }

    async fn send(gateway: Gateway, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let request = match body {
            Some(json) => axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        };

        let response = router(gateway).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();

        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn health_reports_the_loaded_model() {
        let (status, body) = send(echo_gateway(), "GET", "/health", None).await;
        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["model_loaded"], true);
        assert_eq!(value["model_name"], "gpt-oss-20b");
        assert!(value["uptime_seconds"].as_f64().is_some());
    }

    #[tokio::test]
    async fn health_degrades_without_a_backend() {
        let (status, body) = send(bare_gateway(), "GET", "/health", None).await;
        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["status"], "error");
        assert_eq!(value["model_loaded"], false);
    }

    #[tokio::test]
    async fn models_lists_the_local_model() {
        let (status, body) = send(echo_gateway(), "GET", "/v1/models", None).await;
        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["object"], "list");
        assert_eq!(value["data"][0]["id"], "gpt-oss-20b");
        assert_eq!(value["data"][0]["owned_by"], "local");
    }

    #[tokio::test]
    async fn chat_completion_round_trips_through_the_echo_backend() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/chat/completions",
            Some(json!({
                "model": "gpt-oss-20b",
                "messages": [
                    { "role": "system", "content": "You are a helpful math tutor." },
                    { "role": "user", "content": "What is 15 + 27?" }
                ],
                "temperature": 0.7
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["object"], "chat.completion");
        assert!(value["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "What is 15 + 27?");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");

        let usage = &value["usage"];
        assert_eq!(
            usage["total_tokens"].as_u64().unwrap(),
            usage["prompt_tokens"].as_u64().unwrap() + usage["completion_tokens"].as_u64().unwrap()
        );
    }

    #[tokio::test]
    async fn chat_completion_rejects_unknown_models() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/chat/completions",
            Some(json!({
                "model": "gpt-5",
                "messages": [{ "role": "user", "content": "hi" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn chat_completion_rejects_unknown_roles() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/chat/completions",
            Some(json!({
                "model": "gpt-oss-20b",
                "messages": [{ "role": "moderator", "content": "hi" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["type"], "invalid_request_error");
        assert_eq!(value["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn chat_completion_answers_503_without_a_backend() {
        let (status, body) = send(
            bare_gateway(),
            "POST",
            "/v1/chat/completions",
            Some(json!({
                "model": "gpt-oss-20b",
                "messages": [{ "role": "user", "content": "hi" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["error"]["code"], "model_not_loaded");
    }

    #[tokio::test]
    async fn chat_completion_streams_sse_frames() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/chat/completions",
            Some(json!({
                "model": "gpt-oss-20b",
                "messages": [{ "role": "user", "content": "stream me" }],
                "stream": true
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with("data: [DONE]\n\n"));

        let chunks: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter(|data| *data != "[DONE]")
            .map(|data| serde_json::from_str(data).expect("chunk json"))
            .collect();

        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");

        let content: String = chunks
            .iter()
            .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str())
            .collect();
        assert_eq!(content.trim(), "stream me");

        let last = chunks.last().expect("terminal chunk");
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], json!({}));

        // The analysis channel must never leak into the stream.
        assert!(!body.contains("Echoing the last user turn"));
        assert!(!body.contains("<|"));
    }

    #[tokio::test]
    async fn anthropic_messages_round_trip() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/messages",
            Some(json!({
                "model": "claude-sonnet-4-5",
                "max_tokens": 256,
                "system": "Be brief.",
                "messages": [{ "role": "user", "content": "ahoy" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::OK);
        assert!(value["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["model"], "claude-sonnet-4-5");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "ahoy");
        assert_eq!(value["stop_reason"], "end_turn");
        assert!(value["usage"]["input_tokens"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn anthropic_thinking_blocks_appear_when_capture_is_enabled() {
        let config = Config {
            inference: config::InferenceConfig {
                capture_reasoning: true,
                ..config::InferenceConfig::default()
            },
            ..Config::default()
        };
        let gateway = Gateway::from_config(config).expect("gateway should build");

        let (status, body) = send(
            gateway,
            "POST",
            "/v1/messages",
            Some(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{ "role": "user", "content": "think about it" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");

        assert_eq!(status, StatusCode::OK);
        let text = value["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("<thinking>\n"));
        assert!(text.contains("</thinking>\n\nthink about it"));
    }

    #[tokio::test]
    async fn anthropic_messages_stream_frames() {
        let (status, body) = send(
            echo_gateway(),
            "POST",
            "/v1/messages",
            Some(json!({
                "model": "claude-sonnet-4-5",
                "stream": true,
                "messages": [{ "role": "user", "content": "flow" }]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("message_start"));
        assert!(body.contains("content_block_delta"));
        assert!(body.contains("end_turn"));
        assert!(body.trim_end().ends_with(r#"{"type":"message_stop"}"#));
        assert!(!body.contains("[DONE]"));
        assert!(!body.contains("<|"));
    }

    #[tokio::test]
    async fn anthropic_errors_use_the_dialect_envelope() {
        let (status, body) = send(
            bare_gateway(),
            "POST",
            "/v1/messages",
            Some(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{ "role": "user", "content": "hi" }]
            })),
        )
        .await;

        let value: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "overloaded_error");
    }
}
