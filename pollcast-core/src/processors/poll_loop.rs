//! PollClient and its poll loop.
//!
//! A [`PollClient`] owns everything one client instance needs: the event
//! source, the handler registry, the live [`PollConfig`] and the loop event
//! channel. [`PollClient::start`] runs the loop in the calling task until
//! [`PollClient::stop`] is requested or a non-retryable error occurs:
//!
//! 1. Seed the dedup window from an initial fetch (nothing is dispatched).
//! 2. Sleep for the configured interval.
//! 3. Fetch, retrying transient failures after a backoff delay.
//! 4. Record and dispatch each new event, oldest first.
//! 5. Repeat from 2.
//!
//! Stopping is cooperative. It interrupts the interval or backoff sleep but
//! never an in-flight fetch or dispatch.

use super::dedup::DedupWindow;
use super::dispatch::DispatchEngine;
use super::fetcher::{EventSource, FetchError};
use super::filter::FilterChain;
use super::registry::{EventHandler, HandlerName, HandlerRegistry, Registered};
use crate::config::{ConfigStore, PollConfig};
use crate::entities::{Event, EventId};
use crate::events::{
    LoopEvent, LoopEventReceiver, LoopEventSender, LoopState, emit, loop_event_channel,
};
use kanau::processor::Processor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors returned by [`PollClient::start`].
#[derive(Debug, Error)]
pub enum PollError {
    /// The loop hit a non-retryable fetch error and stopped.
    #[error("poll loop stopped on fatal error: {0}")]
    Fatal(#[source] FetchError),

    #[error("poll loop is already running")]
    AlreadyRunning,
}

/// Why a run of the loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`PollClient::stop`] was called.
    Requested,
}

struct ClientState {
    source: Arc<dyn EventSource>,
    registry: HandlerRegistry,
    config: ConfigStore<PollConfig>,
    events_tx: LoopEventSender,
    state_tx: watch::Sender<LoopState>,
    window_tx: watch::Sender<Vec<EventId>>,
    /// Stop signal of the current run; `Some` exactly while running.
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl ClientState {
    fn stop_slot(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one polling client. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct PollClient {
    inner: Arc<ClientState>,
}

impl PollClient {
    pub fn new(source: impl EventSource + 'static, config: PollConfig) -> Self {
        Self::with_config_store(source, ConfigStore::new(config))
    }

    /// Create a client reading its configuration from an existing store.
    pub fn with_config_store(
        source: impl EventSource + 'static,
        config: ConfigStore<PollConfig>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Stopped);
        let (window_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(ClientState {
                source: Arc::new(source),
                registry: HandlerRegistry::new(),
                config,
                events_tx: loop_event_channel(),
                state_tx,
                window_tx,
                stop_tx: Mutex::new(None),
            }),
        }
    }

    /// Add a handler, or replace the one already registered under `name`.
    pub async fn register_handler(
        &self,
        name: impl Into<HandlerName>,
        handler: Arc<dyn EventHandler>,
        filters: FilterChain,
    ) -> Registered {
        self.inner.registry.register(name, handler, filters).await
    }

    pub async fn unregister_handler(&self, name: &str) -> bool {
        self.inner.registry.unregister(name).await
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ConfigStore<PollConfig> {
        &self.inner.config
    }

    /// Subscribe to loop events.
    pub fn subscribe(&self) -> LoopEventReceiver {
        self.inner.events_tx.subscribe()
    }

    pub fn state(&self) -> LoopState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.inner.state_tx.subscribe()
    }

    /// Ids currently held by the dedup window, most recent first.
    ///
    /// Updated after the seed fetch and after every poll; keeps the last
    /// value once the loop stops.
    pub fn window(&self) -> Vec<EventId> {
        self.inner.window_tx.borrow().clone()
    }

    /// Run the poll loop until stopped.
    ///
    /// Returns `Ok(StopReason::Requested)` after [`stop`](Self::stop), and
    /// `Err(PollError::Fatal)` if a non-retryable fetch error ended the
    /// loop. Calling `start` on a running client fails with
    /// [`PollError::AlreadyRunning`].
    pub async fn start(&self) -> Result<StopReason, PollError> {
        let stop_rx = self.begin()?;
        let guard = RunGuard {
            state: Arc::clone(&self.inner),
        };

        info!(source = %self.inner.source.describe(), "PollLoop started");
        emit(&self.inner.events_tx, LoopEvent::Started);

        let result = PollLoop::new(Arc::clone(&self.inner), stop_rx).run().await;
        drop(guard);

        let fatal = match &result {
            Ok(_) => None,
            Err(e) => {
                error!(error = %e, "PollLoop exited on fatal error");
                Some(e.to_string())
            }
        };
        emit(&self.inner.events_tx, LoopEvent::Stopped { fatal });
        info!("PollLoop shutdown complete");
        result
    }

    /// Request the loop to stop.
    ///
    /// Takes effect at the next sleep; an in-flight fetch or dispatch is
    /// allowed to finish. A no-op when the client is not running.
    pub fn stop(&self) {
        match self.inner.stop_slot().as_ref() {
            Some(stop_tx) => {
                stop_tx.send_replace(true);
                info!("PollLoop stop requested");
            }
            None => debug!("stop() called on a stopped client, ignoring"),
        }
    }

    fn begin(&self) -> Result<watch::Receiver<bool>, PollError> {
        let mut slot = self.inner.stop_slot();
        if slot.is_some() {
            return Err(PollError::AlreadyRunning);
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        *slot = Some(stop_tx);
        self.inner.state_tx.send_replace(LoopState::Running);
        Ok(stop_rx)
    }
}

/// Returns the client to `Stopped` when a run ends, including when the
/// `start` future is dropped.
struct RunGuard {
    state: Arc<ClientState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut slot = self.state.stop_slot();
        *slot = None;
        self.state.state_tx.send_replace(LoopState::Stopped);
    }
}

/// State of a single run: the dedup window lives and dies with it.
struct PollLoop {
    client: Arc<ClientState>,
    engine: DispatchEngine,
    window: Option<DedupWindow>,
    stop_rx: watch::Receiver<bool>,
}

impl PollLoop {
    fn new(client: Arc<ClientState>, stop_rx: watch::Receiver<bool>) -> Self {
        let engine = DispatchEngine::new(
            client.registry.clone(),
            client.config.clone(),
            client.events_tx.clone(),
        );
        Self {
            client,
            engine,
            window: None,
            stop_rx,
        }
    }

    async fn run(mut self) -> Result<StopReason, PollError> {
        let Some(initial) = self.fetch_with_backoff().await? else {
            return Ok(StopReason::Requested);
        };
        let capacity = self.client.config.read().await.window_capacity;
        let mut window = DedupWindow::new(capacity);
        window.seed(initial.iter().map(|event| event.id().clone()));
        info!(known = window.len(), "Dedup window seeded");
        emit(
            &self.client.events_tx,
            LoopEvent::Seeded {
                known: window.len(),
            },
        );
        self.client.window_tx.send_replace(window.to_vec());
        self.window = Some(window);

        loop {
            let interval = self.client.config.read().await.interval;
            if !self.pause(interval).await {
                break;
            }
            let Some(batch) = self.fetch_with_backoff().await? else {
                break;
            };
            self.handle_batch(batch).await;
        }

        Ok(StopReason::Requested)
    }

    /// Fetch one batch, backing off and retrying on retryable errors.
    ///
    /// `Ok(None)` means a stop was requested during a backoff sleep.
    async fn fetch_with_backoff(&mut self) -> Result<Option<Vec<Event>>, PollError> {
        let mut attempt = 0u32;
        loop {
            match self.client.source.fetch().await {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    let delay = self
                        .client
                        .config
                        .read()
                        .await
                        .backoff
                        .delay_for(attempt, e.retry_after());
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, backing off"
                    );
                    emit(
                        &self.client.events_tx,
                        LoopEvent::BackingOff {
                            attempt,
                            delay,
                            reason: e.to_string(),
                        },
                    );
                    if !self.pause(delay).await {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(PollError::Fatal(e)),
            }
        }
    }

    async fn handle_batch(&mut self, batch: Vec<Event>) {
        let config = self.client.config.snapshot().await;
        let Some(window) = self.window.as_mut() else {
            return;
        };
        window.set_capacity(config.window_capacity);

        let fetched = batch.len();
        let fresh = window.fresh_events(batch, config.dedup);
        debug!(fetched, fresh = fresh.len(), "Polled");
        emit(
            &self.client.events_tx,
            LoopEvent::Polled {
                fetched,
                fresh: fresh.len(),
            },
        );

        for event in fresh {
            // Recorded before dispatch: an event is never delivered twice,
            // even if every handler for it fails.
            window.record(event.id().clone());
            let _ = self.engine.process(event).await;
        }

        self.client.window_tx.send_replace(window.to_vec());
    }

    /// Sleep for `delay` unless a stop is requested first.
    ///
    /// Returns `false` if the loop should exit.
    async fn pause(&mut self, delay: Duration) -> bool {
        if *self.stop_rx.borrow() {
            return false;
        }
        tokio::select! {
            biased;

            changed = self.stop_rx.changed() => {
                changed.is_ok() && !*self.stop_rx.borrow()
            }

            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffPolicy;
    use crate::processors::registry::handler_fn;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Step = Result<Vec<Event>, FetchError>;

    /// Replays a fixed script of fetch results, then returns empty batches.
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<Event>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn batch(ids: &[u64]) -> Step {
        Ok(ids
            .iter()
            .map(|id| Event::new(*id, json!({ "id": id })))
            .collect())
    }

    fn transient() -> Step {
        Err(FetchError::Transient("connection reset".into()))
    }

    /// Registers a handler that records the ids it receives.
    async fn recorder(client: &PollClient) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client
            .register_handler(
                "recorder",
                handler_fn(move |event: Event| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(event.id().to_string());
                        Ok(())
                    }
                }),
                FilterChain::new(),
            )
            .await;
        seen
    }

    fn spawn_start(
        client: &PollClient,
    ) -> tokio::task::JoinHandle<Result<StopReason, PollError>> {
        let client = client.clone();
        tokio::spawn(async move { client.start().await })
    }

    async fn wait_for(
        rx: &mut LoopEventReceiver,
        mut pred: impl FnMut(&LoopEvent) -> bool,
    ) -> LoopEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    async fn wait_for_polls(rx: &mut LoopEventReceiver, polls: usize) -> Vec<LoopEvent> {
        let mut seen = Vec::new();
        let mut remaining = polls;
        while remaining > 0 {
            let event = rx.recv().await.unwrap();
            if matches!(event, LoopEvent::Polled { .. }) {
                remaining -= 1;
            }
            seen.push(event);
        }
        seen
    }

    fn ids(window: Vec<EventId>) -> Vec<String> {
        window.iter().map(ToString::to_string).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_dispatch_order_and_window() {
        let source = ScriptedSource::new(vec![batch(&[5, 4, 3]), batch(&[7, 6, 5])]);
        let config = PollConfig {
            window_capacity: NonZeroUsize::new(4).unwrap(),
            ..PollConfig::default()
        };
        let client = PollClient::new(source.clone(), config);
        let seen = recorder(&client).await;
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        wait_for(&mut rx, |e| {
            matches!(e, LoopEvent::Dispatched(report) if report.event_id.as_str() == "7")
        })
        .await;
        client.stop();

        assert_eq!(handle.await.unwrap().unwrap(), StopReason::Requested);
        assert_eq!(*seen.lock().unwrap(), ["6", "7"]);
        assert_eq!(ids(client.window()), ["7", "6", "5", "4"]);
        assert_eq!(client.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_suppresses_initial_replay() {
        let source = ScriptedSource::new(vec![batch(&[3, 2, 1]), batch(&[3, 2, 1])]);
        let client = PollClient::new(source.clone(), PollConfig::default());
        let seen = recorder(&client).await;
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        let events = wait_for_polls(&mut rx, 1).await;
        client.stop();
        handle.await.unwrap().unwrap();

        assert!(events.contains(&LoopEvent::Seeded { known: 3 }));
        assert!(events.contains(&LoopEvent::Polled {
            fetched: 3,
            fresh: 0
        }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_dispatched_at_most_once() {
        let source = ScriptedSource::new(vec![
            batch(&[1]),
            batch(&[2, 1]),
            batch(&[2, 1]),
            batch(&[3, 2, 1]),
            batch(&[3, 2]),
        ]);
        let client = PollClient::new(source.clone(), PollConfig::default());
        let seen = recorder(&client).await;
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        wait_for_polls(&mut rx, 4).await;
        client.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), ["2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_recover() {
        let source = ScriptedSource::new(vec![batch(&[1]), transient(), transient(), batch(&[2, 1])]);
        let config = PollConfig {
            backoff: BackoffPolicy::Fixed(Duration::from_secs(5)),
            ..PollConfig::default()
        };
        let client = PollClient::new(source.clone(), config);
        let seen = recorder(&client).await;
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        let events = wait_for_polls(&mut rx, 1).await;
        wait_for(&mut rx, |e| matches!(e, LoopEvent::Dispatched(_))).await;
        client.stop();
        handle.await.unwrap().unwrap();

        let backoffs: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::BackingOff { attempt, delay, .. } => {
                    assert_eq!(*delay, Duration::from_secs(5));
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(backoffs, [1, 2]);
        assert_eq!(source.calls(), 4);
        assert_eq!(*seen.lock().unwrap(), ["2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let source = ScriptedSource::new(vec![
            batch(&[]),
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            }),
        ]);
        let client = PollClient::new(source.clone(), PollConfig::default());
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        let event = wait_for(&mut rx, |e| matches!(e, LoopEvent::BackingOff { .. })).await;
        client.stop();
        handle.await.unwrap().unwrap();

        assert!(matches!(
            event,
            LoopEvent::BackingOff { delay, .. } if delay == Duration::from_secs(30)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_sleep_skips_next_fetch() {
        let source = ScriptedSource::new(vec![batch(&[1])]);
        let config = PollConfig {
            interval: Duration::from_secs(60),
            ..PollConfig::default()
        };
        let client = PollClient::new(source.clone(), config);
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        wait_for(&mut rx, |e| matches!(e, LoopEvent::Seeded { .. })).await;
        client.stop();

        assert_eq!(handle.await.unwrap().unwrap(), StopReason::Requested);
        assert_eq!(source.calls(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            LoopEvent::Stopped { fatal: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_is_fatal() {
        let source = ScriptedSource::new(vec![
            batch(&[1]),
            Err(FetchError::Protocol("missing data".into())),
        ]);
        let client = PollClient::new(source.clone(), PollConfig::default());
        let mut rx = client.subscribe();

        let result = client.start().await;
        assert!(matches!(result, Err(PollError::Fatal(FetchError::Protocol(_)))));
        assert_eq!(client.state(), LoopState::Stopped);

        let stopped = wait_for(&mut rx, |e| matches!(e, LoopEvent::Stopped { .. })).await;
        match stopped {
            LoopEvent::Stopped { fatal: Some(reason) } => assert!(reason.contains("missing data")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_rejected() {
        let client = PollClient::new(ScriptedSource::new(Vec::new()), PollConfig::default());
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        wait_for(&mut rx, |e| matches!(e, LoopEvent::Started)).await;
        assert_eq!(client.state(), LoopState::Running);
        assert!(matches!(client.start().await, Err(PollError::AlreadyRunning)));

        client.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(client.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reseeds_window() {
        let source = ScriptedSource::new(vec![batch(&[1]), batch(&[2, 1]), batch(&[3, 2])]);
        let client = PollClient::new(source.clone(), PollConfig::default());
        let seen = recorder(&client).await;
        let mut rx = client.subscribe();

        let handle = spawn_start(&client);
        wait_for_polls(&mut rx, 1).await;
        client.stop();
        handle.await.unwrap().unwrap();

        let handle = spawn_start(&client);
        wait_for(&mut rx, |e| matches!(e, LoopEvent::Seeded { .. })).await;
        client.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), ["2"]);
        assert_eq!(ids(client.window()), ["3", "2"]);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let client = PollClient::new(ScriptedSource::new(Vec::new()), PollConfig::default());
        client.stop();
        client.stop();
        assert_eq!(client.state(), LoopState::Stopped);
    }
}
