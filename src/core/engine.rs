//! Polling engine
//!
//! Owns the connection state machine and drives the refresh cycle:
//!
//! ```text
//!   timer tick ─┐
//!               ├─► refresh_now ─► credentials ─► fetch ─┬─► Connected ─► history + alert tracker
//!   manual ─────┘   (exclusive)                          └─► Disconnected(reason)
//! ```
//!
//! Published state lives in a watch channel. It is only touched before and
//! after the two external calls, never across them.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::auth::{CredentialError, CredentialProvider};
use crate::core::formatter::format_time_remaining;
use crate::core::history::{HistoryStore, HistoryWriter, LIMIT_HIT_UTILIZATION};
use crate::core::models::state::{ConnectionState, EngineState, UsageAlert};
use crate::core::models::usage::{UsageSnapshot, WindowKind};
use crate::core::notify::NotificationTracker;
use crate::core::providers::fetch::{FetchError, SnapshotFetcher};

const CLOCK_TICK: Duration = Duration::from_secs(1);
const ALERT_CHANNEL_CAPACITY: usize = 16;

#[derive(Error, Debug)]
enum RefreshError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub state: ConnectionState,
    /// Set when this sample crossed the alert threshold
    pub alert: Option<UsageAlert>,
}

struct PollSchedule {
    interval: Duration,
    cancel: watch::Sender<bool>,
}

impl PollSchedule {
    fn cancel(self) {
        // The loop only observes this while waiting for a tick, so a fetch
        // already in flight runs to completion.
        let _ = self.cancel.send(true);
    }
}

struct Inner {
    credentials: Arc<dyn CredentialProvider>,
    fetcher: Arc<dyn SnapshotFetcher>,
    state: watch::Sender<EngineState>,
    alerts: broadcast::Sender<UsageAlert>,
    /// Held for the whole refresh cycle; owns the alert tracker.
    refresh: Mutex<NotificationTracker>,
    history: Mutex<HistoryStore>,
    writer: HistoryWriter,
    notifications_enabled: AtomicBool,
    schedule: std::sync::Mutex<Option<PollSchedule>>,
    clock: watch::Sender<DateTime<Utc>>,
    clock_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let schedule = self.schedule.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(schedule) = schedule.take() {
            schedule.cancel();
        }
        let clock_task = self.clock_task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = clock_task.take() {
            task.abort();
        }
    }
}

/// Cheap-to-clone handle to the polling engine.
#[derive(Clone)]
pub struct PollingEngine {
    inner: Arc<Inner>,
}

impl PollingEngine {
    /// Must be called from within a tokio runtime: the history writer task
    /// is spawned here.
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        fetcher: Arc<dyn SnapshotFetcher>,
        history: HistoryStore,
    ) -> Self {
        let writer = HistoryWriter::spawn(history.path().to_path_buf());
        let (state, _) = watch::channel(EngineState::default());
        let (clock, _) = watch::channel(Utc::now());
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                credentials,
                fetcher,
                state,
                alerts,
                refresh: Mutex::new(NotificationTracker::new()),
                history: Mutex::new(history),
                writer,
                notifications_enabled: AtomicBool::new(true),
                schedule: std::sync::Mutex::new(None),
                clock,
                clock_task: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Run one fetch cycle. Concurrent calls wait for the one in flight.
    /// Failures never escape: they become `Disconnected(reason)`.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let mut tracker = self.inner.refresh.lock().await;

        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                let now = Utc::now();
                self.record_history(&snapshot).await;

                let alert = snapshot.five_hour.as_ref().and_then(|window| {
                    tracker
                        .evaluate(window.utilization, self.notifications_enabled())
                        .then(|| UsageAlert {
                            utilization: window.utilization,
                            resets_at: window.resets_at,
                        })
                });

                self.publish(|state| {
                    state.connection = ConnectionState::Connected;
                    state.snapshot = Some(snapshot);
                    state.last_refreshed_at = Some(now);
                });
                self.inner.clock.send_replace(now);

                // Sent after publishing so subscribers already see the snapshot.
                if let Some(alert) = &alert {
                    log::info!("[engine] {}", alert.message());
                    let _ = self.inner.alerts.send(alert.clone());
                }

                RefreshOutcome {
                    state: ConnectionState::Connected,
                    alert,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                match &e {
                    RefreshError::Fetch(fetch) if fetch.is_unauthorized() => {
                        log::error!("[engine] token rejected: {}", reason)
                    }
                    _ => log::warn!("[engine] refresh failed: {}", reason),
                }
                let disconnected = ConnectionState::Disconnected(reason);
                self.publish(|state| state.connection = disconnected.clone());
                RefreshOutcome {
                    state: disconnected,
                    alert: None,
                }
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<UsageSnapshot, RefreshError> {
        let token = self.inner.credentials.get_credential().await?;
        let snapshot = self.inner.fetcher.fetch(&token).await?;
        Ok(snapshot)
    }

    async fn record_history(&self, snapshot: &UsageSnapshot) {
        let mut history = self.inner.history.lock().await;
        history.record(snapshot);
        self.inner.writer.submit(history.to_document());
    }

    fn publish(&self, update: impl FnOnce(&mut EngineState)) {
        self.inner.state.send_modify(|state| {
            let previous = state.connection.clone();
            update(state);
            if previous != state.connection {
                log::info!("[engine] {} -> {}", previous, state.connection);
            }
        });
    }

    /// Install a recurring refresh every `interval_secs` (at least 1),
    /// replacing any previous schedule. The first tick fires one interval
    /// from now.
    pub fn start_polling(&self, interval_secs: u64) {
        let interval = Duration::from_secs(interval_secs.max(1));
        let (cancel, cancelled) = watch::channel(false);

        let mut slot = self.inner.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        tokio::spawn(poll_loop(Arc::downgrade(&self.inner), interval, cancelled));
        *slot = Some(PollSchedule { interval, cancel });
        log::info!("[engine] polling every {}s", interval.as_secs());
    }

    pub fn stop_polling(&self) {
        let mut slot = self.inner.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(schedule) = slot.take() {
            schedule.cancel();
            log::info!("[engine] polling stopped");
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.inner
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.interval)
    }

    /// Advance the countdown reference once per second until the engine is
    /// dropped. Each tick is visible through [`PollingEngine::subscribe_clock`].
    pub fn start_clock(&self) {
        let mut slot = self.inner.clock_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLOCK_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.clock.send_replace(Utc::now());
            }
        }));
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.inner.notifications_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn notifications_enabled(&self) -> bool {
        self.inner.notifications_enabled.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_clock(&self) -> watch::Receiver<DateTime<Utc>> {
        self.inner.clock.subscribe()
    }

    /// Alerts from every refresh, scheduled or manual.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<UsageAlert> {
        self.inner.alerts.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.inner.state.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.borrow().connection.clone()
    }

    pub fn current_snapshot(&self) -> Option<UsageSnapshot> {
        self.inner.state.borrow().snapshot.clone()
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().last_refreshed_at
    }

    /// 0 until a snapshot with a five-hour window has arrived.
    pub fn five_hour_utilization(&self) -> f64 {
        self.inner
            .state
            .borrow()
            .snapshot
            .as_ref()
            .and_then(|s| s.utilization(WindowKind::FiveHour))
            .unwrap_or(0.0)
    }

    pub fn is_limit_hit(&self) -> bool {
        self.five_hour_utilization() >= LIMIT_HIT_UTILIZATION
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.inner.clock.borrow()
    }

    pub fn time_remaining(&self, until: Option<DateTime<Utc>>) -> String {
        format_time_remaining(until, self.now())
    }

    #[cfg(test)]
    pub async fn history(&self) -> tokio::sync::MutexGuard<'_, HistoryStore> {
        self.inner.history.lock().await
    }

    /// Wait until every history write issued so far is on disk.
    pub async fn flush_history(&self) {
        self.inner.writer.flush().await;
    }
}

async fn poll_loop(engine: Weak<Inner>, interval: Duration, mut cancelled: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = engine.upgrade() else { break };
        PollingEngine { inner }.refresh_now().await;
    }
    log::debug!("[engine] poll loop for {}s interval exited", interval.as_secs());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::usage::UsageWindow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct FakeCredentials(Result<String, CredentialError>);

    #[async_trait]
    impl CredentialProvider for FakeCredentials {
        async fn get_credential(&self) -> Result<String, CredentialError> {
            self.0.clone()
        }
    }

    /// Replays scripted results; repeats the last one when the script runs out.
    #[derive(Default)]
    struct FakeFetcher {
        script: std::sync::Mutex<VecDeque<Result<UsageSnapshot, FetchError>>>,
        last: std::sync::Mutex<Option<Result<UsageSnapshot, FetchError>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeFetcher {
        fn scripted(results: Vec<Result<UsageSnapshot, FetchError>>) -> Self {
            Self {
                script: std::sync::Mutex::new(results.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotFetcher for FakeFetcher {
        async fn fetch(&self, _token: &str) -> Result<UsageSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            last.clone().unwrap_or(Err(FetchError::BadResponse))
        }
    }

    fn usage(five_hour: f64) -> Result<UsageSnapshot, FetchError> {
        Ok(UsageSnapshot {
            five_hour: Some(UsageWindow {
                utilization: five_hour,
                resets_at: Some(Utc::now() + chrono::Duration::hours(2)),
            }),
            seven_day: Some(UsageWindow {
                utilization: 10.0,
                resets_at: None,
            }),
            seven_day_opus: None,
            seven_day_oauth_apps: None,
            fetched_at: Utc::now(),
        })
    }

    fn engine_with(
        credentials: Result<String, CredentialError>,
        fetcher: Arc<FakeFetcher>,
    ) -> (PollingEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::load(dir.path().join("usage_history.json"));
        let engine = PollingEngine::new(Arc::new(FakeCredentials(credentials)), fetcher, history);
        (engine, dir)
    }

    fn token() -> Result<String, CredentialError> {
        Ok("tok".to_string())
    }

    #[tokio::test]
    async fn starts_loading_with_empty_helpers() {
        let (engine, _dir) = engine_with(token(), Arc::new(FakeFetcher::default()));
        assert_eq!(engine.connection_state(), ConnectionState::Loading);
        assert!(engine.current_snapshot().is_none());
        assert!(engine.last_refreshed_at().is_none());
        assert_eq!(engine.five_hour_utilization(), 0.0);
        assert!(!engine.is_limit_hit());
        assert!(engine.poll_interval().is_none());
    }

    #[tokio::test]
    async fn credential_failure_disconnects_without_fetching() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(10.0)]));
        let (engine, _dir) = engine_with(
            Err(CredentialError::NotFound("keychain".into())),
            fetcher.clone(),
        );

        let outcome = engine.refresh_now().await;
        let expected = CredentialError::NotFound("keychain".into()).to_string();
        assert_eq!(outcome.state, ConnectionState::Disconnected(expected.clone()));
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected(expected));
        assert_eq!(fetcher.calls(), 0);
        assert!(outcome.alert.is_none());
    }

    #[tokio::test]
    async fn unauthorized_fetch_suggests_relogin() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![Err(FetchError::HttpStatus(401))]));
        let (engine, _dir) = engine_with(token(), fetcher);

        let outcome = engine.refresh_now().await;
        let reason = outcome.state.reason().unwrap().to_string();
        assert!(reason.contains("claude login"), "reason: {}", reason);
    }

    #[tokio::test]
    async fn success_connects_and_records_history() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(42.0)]));
        let (engine, dir) = engine_with(token(), fetcher);

        let outcome = engine.refresh_now().await;
        assert_eq!(outcome.state, ConnectionState::Connected);
        assert_eq!(engine.five_hour_utilization(), 42.0);
        assert!(engine.last_refreshed_at().is_some());
        assert_eq!(engine.history().await.len(), 1);

        engine.flush_history().await;
        let persisted = HistoryStore::load(dir.path().join("usage_history.json"));
        assert_eq!(persisted.records().next().unwrap().peak_five_hour, 42.0);
    }

    #[tokio::test]
    async fn failure_after_success_keeps_last_snapshot() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![
            usage(55.0),
            Err(FetchError::Transport("offline".into())),
            usage(60.0),
        ]));
        let (engine, _dir) = engine_with(token(), fetcher);

        engine.refresh_now().await;
        let outcome = engine.refresh_now().await;
        assert!(matches!(outcome.state, ConnectionState::Disconnected(_)));
        assert_eq!(engine.five_hour_utilization(), 55.0);

        let outcome = engine.refresh_now().await;
        assert_eq!(outcome.state, ConnectionState::Connected);
        assert_eq!(engine.five_hour_utilization(), 60.0);
        let history = engine.history().await;
        assert_eq!(history.records().next().unwrap().sample_count, 2);
    }

    #[tokio::test]
    async fn limit_hit_at_one_hundred() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(100.0)]));
        let (engine, _dir) = engine_with(token(), fetcher);
        engine.refresh_now().await;
        assert!(engine.is_limit_hit());
    }

    #[tokio::test]
    async fn alerts_once_per_episode() {
        let samples = [70.0, 85.0, 90.0, 95.0, 50.0, 85.0];
        let fetcher = Arc::new(FakeFetcher::scripted(samples.iter().map(|&u| usage(u)).collect()));
        let (engine, _dir) = engine_with(token(), fetcher);

        let mut fired = Vec::new();
        for _ in samples {
            fired.push(engine.refresh_now().await.alert.is_some());
        }
        assert_eq!(fired, vec![false, true, false, false, false, true]);
    }

    #[tokio::test]
    async fn disabled_notifications_suppress_alerts() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(90.0)]));
        let (engine, _dir) = engine_with(token(), fetcher);
        engine.set_notifications_enabled(false);
        assert!(engine.refresh_now().await.alert.is_none());

        engine.set_notifications_enabled(true);
        let alert = engine.refresh_now().await.alert.unwrap();
        assert_eq!(alert.utilization, 90.0);
    }

    #[tokio::test]
    async fn alert_subscribers_receive_alerts() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(88.0)]));
        let (engine, _dir) = engine_with(token(), fetcher);
        let mut alerts = engine.subscribe_alerts();

        engine.refresh_now().await;
        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.utilization, 88.0);
        engine.refresh_now().await;
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_refreshes_are_serialized() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_millis(20)),
            ..FakeFetcher::scripted(vec![usage(10.0)])
        });
        let (engine, _dir) = engine_with(token(), fetcher.clone());

        let (a, b) = tokio::join!(engine.refresh_now(), engine.refresh_now());
        assert_eq!(a.state, ConnectionState::Connected);
        assert_eq!(b.state, ConnectionState::Connected);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observers_see_transitions() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(10.0)]));
        let (engine, _dir) = engine_with(token(), fetcher);
        let mut rx = engine.subscribe();

        engine.refresh_now().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().connection, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_fires_every_interval() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(10.0)]));
        let (engine, _dir) = engine_with(token(), fetcher.clone());

        engine.start_polling(1);
        assert_eq!(engine.poll_interval(), Some(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(engine.connection_state(), ConnectionState::Connected);

        engine.stop_polling();
        assert!(engine.poll_interval().is_none());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_previous_schedule() {
        let fetcher = Arc::new(FakeFetcher::scripted(vec![usage(10.0)]));
        let (engine, _dir) = engine_with(token(), fetcher.clone());

        engine.start_polling(1);
        engine.start_polling(1);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(fetcher.calls(), 3);

        engine.start_polling(2);
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(fetcher.calls(), 5);
        assert_eq!(engine.poll_interval(), Some(Duration::from_secs(2)));
        engine.stop_polling();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_one_second() {
        let (engine, _dir) = engine_with(token(), Arc::new(FakeFetcher::default()));
        engine.start_polling(0);
        assert_eq!(engine.poll_interval(), Some(Duration::from_secs(1)));
        engine.stop_polling();
    }

    #[tokio::test]
    async fn time_remaining_uses_engine_clock() {
        let (engine, _dir) = engine_with(token(), Arc::new(FakeFetcher::default()));
        assert_eq!(engine.time_remaining(None), "—");
        let now = engine.now();
        assert_eq!(engine.time_remaining(Some(now - chrono::Duration::seconds(1))), "Any moment now");
        assert_eq!(
            engine.time_remaining(Some(now + chrono::Duration::minutes(90))),
            "1h 30m"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clock_subscribers_are_woken_every_second() {
        let (engine, _dir) = engine_with(token(), Arc::new(FakeFetcher::default()));
        let mut clock = engine.subscribe_clock();
        engine.start_clock();

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(1500), clock.changed())
                .await
                .expect("clock tick")
                .unwrap();
            clock.borrow_and_update();
        }
    }

    #[tokio::test]
    async fn clock_advances_once_started() {
        let (engine, _dir) = engine_with(token(), Arc::new(FakeFetcher::default()));
        let before = engine.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        engine.start_clock();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.now() > before);
    }
}
