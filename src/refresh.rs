use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::poll::ResultsSnapshot;

pub const DEFAULT_INTERVAL_MS: u64 = 1500;
/// Lowest interval the presenter controls accept
pub const MIN_INTERVAL_MS: u64 = 100;
/// Highest accepted interval, one hour
pub const MAX_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Anything results can be loaded from
pub trait ResultsSource: Send + Sync + 'static {
    fn fetch(
        &self,
        poll_id: &str,
    ) -> impl Future<Output = Result<ResultsSnapshot, ClientError>> + Send;
}

impl ResultsSource for ApiClient {
    fn fetch(
        &self,
        poll_id: &str,
    ) -> impl Future<Output = Result<ResultsSnapshot, ClientError>> + Send {
        self.fetch_results(poll_id)
    }
}

/// What the results page shows: the last good snapshot and the last error
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub snapshot: ResultsSnapshot,
    pub error: Option<String>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Default)]
struct LiveState {
    current: LiveSnapshot,
    /// Sequence number of the newest response applied, success or failure
    applied: u64,
    /// Responses numbered below this are dropped
    floor: u64,
}

/// Holder of the one current snapshot.
///
/// Every fetch takes a sequence number before it starts. Fetches are allowed to
/// overlap, so responses can come back out of order: a response older than the
/// newest one already applied is dropped instead of replacing newer data.
#[derive(Default)]
pub struct LiveResults {
    next_seq: AtomicU64,
    state: Mutex<LiveState>,
}

impl LiveResults {
    /// Reserves the sequence number of a new fetch
    pub fn begin(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Applies the outcome of fetch `seq`. Returns false if it was stale.
    /// A failure keeps the last good snapshot and only records the message.
    pub fn apply(&self, seq: u64, result: Result<ResultsSnapshot, ClientError>) -> bool {
        let mut state = self.state.lock().unwrap();
        if seq <= state.applied || seq < state.floor {
            log::debug!("Dropping stale results response #{}", seq);
            return false;
        }
        state.applied = seq;
        match result {
            Ok(snapshot) => {
                log::debug!("Applied results #{}: {} votes", seq, snapshot.total);
                state.current.snapshot = snapshot;
                state.current.error = None;
                state.current.updated_at = Some(chrono::Utc::now());
            }
            Err(e) => {
                state.current.error = Some(e.to_string());
            }
        }
        true
    }

    /// Responses of every fetch started so far will be ignored
    pub fn discard_pending(&self) {
        let next = self.next_seq.load(Ordering::SeqCst) + 1;
        self.state.lock().unwrap().floor = next;
    }

    pub fn current(&self) -> LiveSnapshot {
        self.state.lock().unwrap().current.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub interval_ms: u64,
    pub enabled: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            interval_ms: DEFAULT_INTERVAL_MS,
            enabled: true,
        }
    }
}

/// Handle of a scheduled refresh task
pub struct TimerHandle(JoinHandle<()>);

impl TimerHandle {
    pub fn cancel(self) {
        self.0.abort();
    }
}

/// Keeps [`LiveResults`] fresh by fetching on a fixed period.
///
/// There is never more than one scheduled task: every reconfiguration cancels
/// the current one before scheduling a new one. Dropping the timer cancels it.
pub struct AutoRefreshTimer<S: ResultsSource> {
    source: Arc<S>,
    live: Arc<LiveResults>,
    poll_id: String,
    settings: RefreshSettings,
    handle: Option<TimerHandle>,
}

impl<S: ResultsSource> AutoRefreshTimer<S> {
    /// Creates an idle timer, call [`AutoRefreshTimer::start`] to schedule it
    pub fn new(
        source: Arc<S>,
        live: Arc<LiveResults>,
        poll_id: impl Into<String>,
        settings: RefreshSettings,
    ) -> Self {
        AutoRefreshTimer {
            source,
            live,
            poll_id: poll_id.into(),
            settings,
            handle: None,
        }
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) {
        self.configure(self.settings);
    }

    /// Cancels the pending task and, if enabled, fetches right away and then
    /// every `interval_ms`
    pub fn configure(&mut self, settings: RefreshSettings) {
        self.cancel();
        self.settings = settings;
        if settings.enabled {
            log::info!(
                "Auto-refresh of poll {} every {} ms",
                self.poll_id,
                settings.interval_ms
            );
            self.handle = Some(self.schedule());
        } else {
            log::info!("Auto-refresh of poll {} paused", self.poll_id);
        }
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.configure(RefreshSettings {
            interval_ms,
            ..self.settings
        });
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.configure(RefreshSettings {
            enabled,
            ..self.settings
        });
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }

    /// One fetch outside of the schedule
    pub fn refresh_now(&self) {
        spawn_fetch(&self.source, &self.live, &self.poll_id);
    }

    fn schedule(&self) -> TimerHandle {
        let source = self.source.clone();
        let live = self.live.clone();
        let poll_id = self.poll_id.clone();
        let period = Duration::from_millis(self.settings.interval_ms.max(1));

        TimerHandle(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The first tick completes immediately
                interval.tick().await;
                spawn_fetch(&source, &live, &poll_id);
            }
        }))
    }
}

impl<S: ResultsSource> Drop for AutoRefreshTimer<S> {
    fn drop(&mut self) {
        self.cancel();
        self.live.discard_pending();
    }
}

// Fetches are not awaited by the timer loop, a slow response never delays the next tick
fn spawn_fetch<S: ResultsSource>(source: &Arc<S>, live: &Arc<LiveResults>, poll_id: &str) {
    let seq = live.begin();
    let source = source.clone();
    let live = live.clone();
    let poll_id = poll_id.to_string();
    tokio::spawn(async move {
        let result = source.fetch(&poll_id).await;
        if let Err(e) = &result {
            log::warn!("Failed to load results of poll {}: {}", poll_id, e);
        }
        live.apply(seq, result);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ResultsSource for CountingSource {
        fn fetch(
            &self,
            _poll_id: &str,
        ) -> impl Future<Output = Result<ResultsSnapshot, ClientError>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok(ResultsSnapshot {
                    total: n as u64,
                    ..Default::default()
                })
            }
        }
    }

    fn timer(interval_ms: u64) -> (Arc<CountingSource>, Arc<LiveResults>, AutoRefreshTimer<CountingSource>) {
        let source = Arc::new(CountingSource::default());
        let live = Arc::new(LiveResults::default());
        let timer = AutoRefreshTimer::new(
            source.clone(),
            live.clone(),
            "poll-1",
            RefreshSettings {
                interval_ms,
                enabled: true,
            },
        );
        (source, live, timer)
    }

    fn snapshot(total: u64) -> ResultsSnapshot {
        ResultsSnapshot {
            total,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_periodically() {
        let (source, live, mut timer) = timer(1500);
        timer.start();

        time::sleep(Duration::from_millis(4600)).await;
        // 0, 1500, 3000, 4500
        assert_eq!(source.calls(), 4);
        assert_eq!(live.current().snapshot.total, 4);
        assert!(live.current().updated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_stops_fetching() {
        let (source, _live, mut timer) = timer(1000);
        timer.start();
        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(source.calls(), 3);

        timer.set_enabled(false);
        assert!(!timer.is_active());
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), 3);

        timer.set_enabled(true);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_keeps_one_timer() {
        let (source, _live, mut timer) = timer(1000);
        timer.start();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls(), 1);

        timer.set_interval(300);
        assert!(timer.is_active());
        // New schedule at 100, 400, 700, 1000; the old one would add another at 1000
        time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(source.calls(), 5);
        assert_eq!(timer.settings().interval_ms, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (source, live, mut timer) = timer(1000);
        timer.start();
        time::sleep(Duration::from_millis(10)).await;
        let in_flight = live.begin();
        drop(timer);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls(), 1);
        assert!(!live.apply(in_flight, Ok(snapshot(99))));
        assert_eq!(live.current().snapshot.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_while_paused() {
        let (source, live, mut timer) = timer(1000);
        timer.set_enabled(false);
        timer.refresh_now();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(live.current().snapshot.total, 1);
    }

    #[test]
    fn test_stale_response_dropped() {
        let live = LiveResults::default();
        let first = live.begin();
        let second = live.begin();

        assert!(live.apply(second, Ok(snapshot(2))));
        assert!(!live.apply(first, Ok(snapshot(1))));
        assert_eq!(live.current().snapshot.total, 2);
    }

    #[test]
    fn test_error_keeps_last_snapshot() {
        let live = LiveResults::default();
        let first = live.begin();
        live.apply(first, Ok(snapshot(7)));

        let second = live.begin();
        live.apply(second, Err(ClientError::Fetch("HTTP 503".into())));
        let current = live.current();
        assert_eq!(current.snapshot.total, 7);
        assert_eq!(current.error.as_deref(), Some("HTTP 503"));

        let third = live.begin();
        live.apply(third, Ok(snapshot(8)));
        assert_eq!(live.current().error, None);
    }
}
