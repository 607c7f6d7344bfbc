//! Axum server setup and router configuration.

use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::{Json, Router, response::IntoResponse, routing::get};
use futures_util::Stream;
use pollcast_sdk::objects::{HealthResponse, StatusResponse, StreamEvent};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/status", get(status))
        .route("/api/v1/events", get(event_stream))
        .with_state(state)
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Loop state, handlers, dedup window and counters.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let interval = state.client.config().read().await.interval;
    let handlers = state
        .client
        .registry()
        .names()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    let counters = state.status.snapshot().await;

    Json(StatusResponse {
        state: state.client.state().into(),
        interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        handlers,
        window: state
            .client
            .window()
            .iter()
            .map(ToString::to_string)
            .collect(),
        polls: counters.polls,
        events_dispatched: counters.events_dispatched,
        handler_failures: counters.handler_failures,
        backoffs: counters.backoffs,
        last_poll_at: counters.last_poll_at,
        last_error: counters.last_error,
    })
}

/// Loop events as server-sent events, one JSON frame per event.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.client.subscribe()).filter_map(|message| {
        match message {
            Ok(event) => {
                let frame = StreamEvent::from(event);
                SseEvent::default()
                    .event(frame.name())
                    .json_data(&frame)
                    .ok()
                    .map(Ok)
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Run the server until `shutdown` completes.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use pollcast_core::entities::Event;
    use pollcast_core::processors::{EventSource, FetchError, FilterChain, handler_fn};
    use pollcast_core::{PollClient, PollConfig};
    use pollcast_sdk::objects::LoopStateName;
    use serde_json::json;
    use tower::ServiceExt;

    struct Fixed;

    #[async_trait]
    impl EventSource for Fixed {
        async fn fetch(&self) -> Result<Vec<Event>, FetchError> {
            Ok(vec![Event::new(2u64, json!({})), Event::new(1u64, json!({}))])
        }
    }

    async fn state() -> AppState {
        let client = PollClient::new(Fixed, PollConfig::default());
        client
            .register_handler(
                "noop",
                handler_fn(|_event: Event| async { Ok(()) }),
                FilterChain::new(),
            )
            .await;
        AppState::new(client)
    }

    async fn get_json(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let body = get_json(build_router(state().await), "/health").await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_of_stopped_client() {
        let body = get_json(build_router(state().await), "/api/v1/status").await;
        let status: StatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(status.state, LoopStateName::Stopped);
        assert_eq!(status.interval_ms, 2_000);
        assert_eq!(status.handlers, ["noop"]);
        assert!(status.window.is_empty());
        assert_eq!(status.polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_seeded_window() {
        let state = state().await;
        let mut rx = state.client.subscribe();
        let client = state.client.clone();
        let run = tokio::spawn(async move { client.start().await });
        while !matches!(
            rx.recv().await.unwrap(),
            pollcast_core::events::LoopEvent::Seeded { .. }
        ) {}

        let body = get_json(build_router(state.clone()), "/api/v1/status").await;
        let status: StatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(status.state, LoopStateName::Running);
        assert_eq!(status.window, ["2", "1"]);

        state.client.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_client_against_live_server() {
        use pollcast_sdk::client::StatusClient;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state().await);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = StatusClient::new(format!("http://{addr}").parse().unwrap());
        assert_eq!(client.health().await.unwrap().status, "healthy");
        let status = client.status().await.unwrap();
        assert_eq!(status.handlers, ["noop"]);
        assert_eq!(status.state, LoopStateName::Stopped);
    }

    #[tokio::test]
    async fn test_event_stream_is_sse() {
        let response = build_router(state().await)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
    }
}
