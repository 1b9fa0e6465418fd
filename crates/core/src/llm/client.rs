use crate::config::Settings;
use crate::llm::error::CompletionError;
use crate::llm::retry::RetryPolicy;
use crate::llm::{CompletionClient, CompletionRequest, CompletionResponse};
use anyhow::Context;
use std::time::Duration;

/// Chat-completion endpoint speaking the OpenAI-compatible wire format, authenticated with a
/// bearer token.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpCompletionClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.require_llm_api_url()?,
            settings.require_llm_api_key()?,
            Duration::from_secs(settings.llm_timeout_secs),
            settings.retry,
        )
    }

    pub fn new(
        url: &str,
        api_key: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build completion http client")?;

        Ok(Self {
            http,
            url: url.to_string(),
            api_key: api_key.to_string(),
            timeout,
            retry,
        })
    }

    async fn send_once(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let res = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = match serde_json::from_str::<CompletionResponse>(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Err(CompletionError::Decode {
                    detail: e.to_string(),
                    body,
                })
            }
        };
        if parsed.content().is_none() {
            return Err(CompletionError::Decode {
                detail: "response has no choices[0].message.content".to_string(),
                body,
            });
        }
        Ok(parsed)
    }

    fn transport_error(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            CompletionError::Network(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl CompletionClient for HttpCompletionClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let started = std::time::Instant::now();
        let res = self.retry.run(|_| self.send_once(request)).await;
        match &res {
            Ok(r) => tracing::info!(
                endpoint = %self.url,
                model = %request.model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                usage = ?r.usage,
                "completion request succeeded"
            ),
            Err(err) => tracing::error!(
                endpoint = %self.url,
                model = %request.model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "completion request failed"
            ),
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/chat/completions")
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.7,
            max_tokens: 16,
            response_format: None,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn sends_bearer_token_and_decodes_reply() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer secret" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no"})));
                }
                assert_eq!(body["model"], "test-model");
                (
                    StatusCode::OK,
                    Json(json!({
                        "choices": [{"message": {"content": "```json\n{}\n```"}}],
                        "usage": {"total_tokens": 3}
                    })),
                )
            }),
        );
        let url = serve(app).await;

        let client =
            HttpCompletionClient::new(&url, "secret", Duration::from_secs(5), fast_retry(1)).unwrap();
        let res = client.complete(&request()).await.unwrap();
        assert_eq!(res.content(), Some("```json\n{}\n```"));
        assert_eq!(res.usage, Some(json!({"total_tokens": 3})));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"content": "ok"}}]})),
                        )
                    }
                }
            }),
        );
        let url = serve(app).await;

        let client =
            HttpCompletionClient::new(&url, "k", Duration::from_secs(5), fast_retry(3)).unwrap();
        let res = client.complete(&request()).await.unwrap();
        assert_eq!(res.content(), Some("ok"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_surface_status_and_body_without_retry() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::UNAUTHORIZED, "invalid api key")
                }
            }),
        );
        let url = serve(app).await;

        let client =
            HttpCompletionClient::new(&url, "k", Duration::from_secs(5), fast_retry(3)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Http { status: 401, .. }));
        assert_eq!(err.response_body(), Some("invalid api key"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
        let url = serve(app).await;

        let client =
            HttpCompletionClient::new(&url, "k", Duration::from_millis(100), fast_retry(1)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_content_is_a_decode_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let url = serve(app).await;

        let client =
            HttpCompletionClient::new(&url, "k", Duration::from_secs(5), fast_retry(3)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Decode { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let client = HttpCompletionClient::new(
            "http://127.0.0.1:9/v1/chat/completions",
            "k",
            Duration::from_secs(2),
            fast_retry(1),
        )
        .unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Network(_) | CompletionError::Timeout(_)));
    }
}
