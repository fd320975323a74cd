//! JSON-over-HTTP plumbing shared by the embedding and language-model
//! providers.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every failure is reported through the caller's `fail` constructor, so an
//! embedding client only ever produces [`RagError::Embedding`] and a
//! generation client only [`RagError::Generation`].

use anyhow::Result;
use std::time::Duration;

use crate::error::RagError;

/// POST `body` to `url` and decode the JSON reply, retrying transient failures.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
    fail: fn(String) -> RagError,
) -> Result<serde_json::Value> {
    let mut last_err: Option<String> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        fail(format!("{} returned an invalid body: {}", service, e)).into()
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", service, status, body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(message);
                    continue;
                }
                return Err(fail(message).into());
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", service, url, e));
            }
        }
    }

    Err(fail(last_err.unwrap_or_else(|| format!("{} request failed after retries", service))).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn client_errors_use_the_callers_error_kind() {
        let base = serve(Router::new().route(
            "/",
            post(|| async { (StatusCode::BAD_REQUEST, "model not found") }),
        ))
        .await;
        let client = reqwest::Client::new();
        let body = serde_json::json!({});

        let err = post_json_with_retry(&client, &base, None, &body, 3, "Ollama", RagError::Generation)
            .await
            .unwrap_err();
        assert!(matches!(kind_of(&err), Some(RagError::Generation(m)) if m.contains("model not found")));

        let err = post_json_with_retry(&client, &base, None, &body, 3, "Ollama", RagError::Embedding)
            .await
            .unwrap_err();
        assert!(matches!(kind_of(&err), Some(RagError::Embedding(_))));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((StatusCode::SERVICE_UNAVAILABLE, "loading model"))
                    } else {
                        Ok(Json(serde_json::json!({ "response": "ok" })))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let json = post_json_with_retry(
            &reqwest::Client::new(),
            &base,
            None,
            &serde_json::json!({}),
            1,
            "Ollama",
            RagError::Generation,
        )
        .await
        .unwrap();
        assert_eq!(json["response"], "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_server_reports_the_callers_kind() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = post_json_with_retry(
            &reqwest::Client::new(),
            &url,
            None,
            &serde_json::json!({}),
            0,
            "OpenAI",
            RagError::Embedding,
        )
        .await
        .unwrap_err();
        assert!(matches!(kind_of(&err), Some(RagError::Embedding(m)) if m.contains("connection error")));
    }
}
