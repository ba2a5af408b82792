//! [`Supervisor`] – the periodic detection driver.
//!
//! Each tick of the loop runs one detection cycle:
//!
//! 1. **Fetch** – take the latest frame from the [`FrameSource`]. No frame
//!    means the cycle is a no-op.
//! 2. **Detect** – run the [`Detector`] on a blocking worker thread, bounded
//!    by `detection_timeout`. Only one detection is ever in flight; if a
//!    timed-out detection is still running, later cycles are skipped until
//!    it returns.
//! 3. **Evaluate** – feed the counts to the [`SupervisionStateMachine`].
//! 4. **Record** – hand every produced event to the [`EventDispatcher`],
//!    state change first.
//!
//! Detection failures and timeouts are logged and followed by a short
//! back-off; they never change the supervision state and never stop the
//! loop. The only fatal error is a frame source that cannot be started,
//! which [`Supervisor::start`] returns to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pawwatch_hal::StaticFrameSource;
//! use pawwatch_perception::ScriptedDetector;
//! use pawwatch_runtime::supervisor::{Supervisor, SupervisorConfig};
//!
//! # async fn run() -> Result<(), pawwatch_types::WatchError> {
//! let supervisor = Arc::new(Supervisor::new(
//!     SupervisorConfig::default(),
//!     Arc::new(StaticFrameSource::new("cam")),
//!     Arc::new(ScriptedDetector::constant(1, 0)),
//! ));
//! supervisor.start().await?;
//! // ...
//! supervisor.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use pawwatch_hal::FrameSource;
use pawwatch_kernel::{Observation, SupervisionStateMachine};
use pawwatch_middleware::EventDispatcher;
use pawwatch_perception::Detector;
use pawwatch_types::{
    DetectionCounts, SupervisionEvent, SupervisionState, SupervisionStatus, WatchError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`Supervisor`].
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Unsupervised time before an alert fires.
    pub alert_delay: Duration,
    /// Time between detection cycles.
    pub check_interval: Duration,
    /// Upper bound on one detector call.
    pub detection_timeout: Duration,
    /// Pause after a failed cycle.
    pub error_backoff: Duration,
    /// In-memory event history size.
    pub history_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            alert_delay: Duration::from_secs(5),
            check_interval: Duration::from_millis(500),
            detection_timeout: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
            history_capacity: pawwatch_middleware::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// What one call to [`Supervisor::run_cycle`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The frame source had nothing to offer.
    NoFrame,
    /// A previous detection is still running.
    DetectorBusy,
    /// Counts were evaluated; `events` is how many were recorded.
    Evaluated {
        counts: DetectionCounts,
        events: usize,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

struct DriverHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the state machine and runs the detection loop.
pub struct Supervisor {
    config: SupervisorConfig,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    machine: Mutex<SupervisionStateMachine>,
    dispatcher: Arc<EventDispatcher>,
    detecting: Arc<AtomicBool>,
    running: AtomicBool,
    driver: tokio::sync::Mutex<Option<DriverHandle>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("source", &self.source.id())
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new(config.history_capacity));
        Self::with_dispatcher(config, source, detector, dispatcher)
    }

    /// Use an existing dispatcher (and therefore its observers and history).
    pub fn with_dispatcher(
        config: SupervisorConfig,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            machine: Mutex::new(SupervisionStateMachine::new(config.alert_delay)),
            config,
            source,
            detector,
            dispatcher,
            detecting: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            driver: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SupervisionState {
        self.lock_machine().state()
    }

    fn lock_machine(&self) -> std::sync::MutexGuard<'_, SupervisionStateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start the frame source and spawn the detection loop.
    ///
    /// Calling `start` while already running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::FrameSourceUnavailable`] (or whatever the
    /// source reports) when the frame source cannot be started.
    pub async fn start(self: &Arc<Self>) -> Result<(), WatchError> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            debug!("supervisor already running");
            return Ok(());
        }

        self.source.start()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.running.store(true, Ordering::Release);
        let task = tokio::spawn(Arc::clone(self).drive(shutdown_rx));
        *driver = Some(DriverHandle { shutdown, task });
        info!(
            source = self.source.id(),
            alert_delay_secs = self.config.alert_delay.as_secs_f64(),
            "supervisor started"
        );
        Ok(())
    }

    /// Signal the loop, wait for its current cycle to finish, then release
    /// the frame source. Does nothing when not running.
    pub async fn stop(&self) {
        let Some(handle) = self.driver.lock().await.take() else {
            return;
        };
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "detection loop ended abnormally");
        }
        self.source.stop();
        self.running.store(false, Ordering::Release);
        info!("supervisor stopped");
    }

    async fn drive(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "detection cycle failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }
        debug!("detection loop exited");
    }

    // ── Detection cycle ──────────────────────────────────────────────────────

    /// Run one fetch → detect → evaluate → record cycle.
    ///
    /// # Errors
    ///
    /// Detector failures and timeouts; the state machine is not touched in
    /// that case.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, WatchError> {
        let Some(frame) = self.source.latest_frame() else {
            debug!("no frame available");
            return Ok(CycleOutcome::NoFrame);
        };

        if self
            .detecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous detection still in flight");
            return Ok(CycleOutcome::DetectorBusy);
        }

        let in_flight = InFlight(Arc::clone(&self.detecting));
        let detector = Arc::clone(&self.detector);
        let input = Arc::clone(&frame);
        let job = tokio::task::spawn_blocking(move || {
            let _in_flight = in_flight;
            detector.detect(&input)
        });

        let detections = match tokio::time::timeout(self.config.detection_timeout, job).await {
            Err(_) => return Err(WatchError::DetectionTimeout(self.config.detection_timeout)),
            Ok(Err(join_err)) => {
                return Err(WatchError::Detection(format!("detector task failed: {join_err}")));
            }
            Ok(Ok(result)) => result?,
        };

        let observation = Observation::from_detections(detections, Some(frame));
        let counts = observation.counts;
        let evaluation = self.lock_machine().observe(observation, Utc::now());

        let mut events = 0;
        for event in evaluation.into_events() {
            self.record(event);
            events += 1;
        }
        Ok(CycleOutcome::Evaluated { counts, events })
    }

    fn record(&self, event: SupervisionEvent) {
        let report = self.dispatcher.record_and_broadcast(event);
        if !report.failures.is_empty() {
            debug!(
                failed = report.failures.len(),
                delivered = report.delivered,
                "some observers failed"
            );
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn status(&self) -> SupervisionStatus {
        let machine = self.lock_machine();
        SupervisionStatus {
            state: machine.state(),
            source: self.source.id().to_string(),
            running: self.is_running(),
            unsupervised_elapsed_seconds: machine
                .unsupervised_elapsed(Utc::now())
                .map(|d| d.as_secs_f64()),
            event_count: self.dispatcher.len(),
            alert_delay_seconds: machine.alert_delay().as_secs_f64(),
        }
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<SupervisionEvent> {
        self.dispatcher.recent(limit)
    }
}

/// Clears the in-flight flag when the blocking detection finishes,
/// including by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawwatch_hal::StaticFrameSource;
    use pawwatch_middleware::EventObserver;
    use pawwatch_perception::ScriptedDetector;
    use pawwatch_types::{Detection, Frame};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            alert_delay: Duration::from_millis(60),
            check_interval: Duration::from_millis(10),
            detection_timeout: Duration::from_secs(2),
            error_backoff: Duration::from_millis(20),
            history_capacity: 100,
        }
    }

    fn supervisor(
        source: Arc<StaticFrameSource>,
        detector: Arc<dyn Detector>,
    ) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(fast_config(), source, detector))
    }

    async fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn detect(&self, _: &Frame) -> Result<Vec<Detection>, WatchError> {
            std::thread::sleep(self.0);
            Ok(vec![])
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&self, _: &Frame) -> Result<Vec<Detection>, WatchError> {
            panic!("model crashed");
        }
    }

    struct Broken;

    impl EventObserver for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn on_event(&self, _: &SupervisionEvent) -> Result<(), WatchError> {
            Err(WatchError::Storage("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn start_fails_when_source_unavailable() {
        let source = Arc::new(StaticFrameSource::unavailable("cam"));
        let sup = supervisor(source, Arc::new(ScriptedDetector::constant(1, 0)));
        assert!(matches!(
            sup.start().await,
            Err(WatchError::FrameSourceUnavailable(_))
        ));
        assert!(!sup.is_running());
        assert!(!sup.status().running);
    }

    #[tokio::test]
    async fn start_is_reentrant_and_stop_releases_source() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let sup = supervisor(source.clone(), Arc::new(ScriptedDetector::constant(0, 0)));

        sup.start().await.unwrap();
        sup.start().await.unwrap();
        assert_eq!(source.start_count(), 1);
        assert!(sup.status().running);

        sup.stop().await;
        assert!(!sup.is_running());
        assert!(!source.is_running());
        assert_eq!(source.stop_count(), 1);

        // Second stop is a no-op.
        sup.stop().await;
        assert_eq!(source.stop_count(), 1);
    }

    #[tokio::test]
    async fn loop_raises_single_alert_for_unsupervised_dog() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let sup = supervisor(source, Arc::new(ScriptedDetector::constant(1, 0)));
        sup.dispatcher().register(Arc::new(Broken));

        sup.start().await.unwrap();
        assert!(wait_for(|| sup.state() == SupervisionState::Alert).await);
        // Give the loop time to (not) fire again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        sup.stop().await;

        let events = sup.recent_events(100);
        let states: Vec<_> = events.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![SupervisionState::Unsupervised, SupervisionState::Alert]);
        let alert = &events[1];
        assert!(alert.unsupervised_duration.unwrap() >= Duration::from_millis(60));
        assert!(alert.snapshot.is_some());

        let status = sup.status();
        assert_eq!(status.state, SupervisionState::Alert);
        assert_eq!(status.source, "cam");
        assert_eq!(status.event_count, 2);
        assert!(status.unsupervised_elapsed_seconds.unwrap() >= 0.06);
    }

    #[tokio::test]
    async fn supervisor_presence_prevents_alert() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let sup = supervisor(source, Arc::new(ScriptedDetector::constant(2, 1)));
        sup.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.stop().await;

        let states: Vec<_> = sup.recent_events(10).iter().map(|e| e.state).collect();
        assert_eq!(states, vec![SupervisionState::Supervised]);
        assert!(sup.status().unsupervised_elapsed_seconds.is_none());
    }

    #[tokio::test]
    async fn missing_frame_is_a_noop_cycle() {
        let source = Arc::new(StaticFrameSource::empty("cam"));
        let sup = supervisor(source.clone(), Arc::new(ScriptedDetector::constant(1, 0)));
        assert_eq!(sup.run_cycle().await.unwrap(), CycleOutcome::NoFrame);
        assert_eq!(sup.state(), SupervisionState::Idle);

        source.set_frame(Some(Frame::new(2, 2, vec![0; 4])));
        assert_eq!(
            sup.run_cycle().await.unwrap(),
            CycleOutcome::Evaluated {
                counts: DetectionCounts::new(1, 0),
                events: 1
            }
        );
        assert_eq!(sup.state(), SupervisionState::Unsupervised);
    }

    #[tokio::test]
    async fn detector_failure_leaves_state_untouched() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let detector = Arc::new(ScriptedDetector::constant(1, 0));
        let sup = supervisor(source, detector.clone());

        sup.run_cycle().await.unwrap();
        let since = sup.lock_machine().unsupervised_since();
        detector.set_failing(true);
        assert!(matches!(sup.run_cycle().await, Err(WatchError::Detection(_))));
        assert_eq!(sup.state(), SupervisionState::Unsupervised);
        assert_eq!(sup.lock_machine().unsupervised_since(), since);
        assert_eq!(sup.dispatcher().len(), 1);
    }

    #[tokio::test]
    async fn detector_panic_is_a_failed_cycle() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let sup = supervisor(source, Arc::new(PanickingDetector));
        assert!(matches!(sup.run_cycle().await, Err(WatchError::Detection(_))));
        // The in-flight flag was released by the panicking worker.
        assert!(matches!(sup.run_cycle().await, Err(WatchError::Detection(_))));
    }

    #[tokio::test]
    async fn detection_timeout_blocks_overlapping_detection() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let config = SupervisorConfig {
            detection_timeout: Duration::from_millis(30),
            ..fast_config()
        };
        let sup = Supervisor::new(config, source, Arc::new(SlowDetector(Duration::from_millis(300))));

        assert!(matches!(
            sup.run_cycle().await,
            Err(WatchError::DetectionTimeout(_))
        ));
        assert_eq!(sup.run_cycle().await.unwrap(), CycleOutcome::DetectorBusy);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(
            sup.run_cycle().await,
            Err(WatchError::DetectionTimeout(_))
        ));
        assert_eq!(sup.state(), SupervisionState::Idle);
    }

    #[tokio::test]
    async fn loop_survives_failing_detector() {
        let source = Arc::new(StaticFrameSource::new("cam"));
        let detector = Arc::new(ScriptedDetector::constant(1, 1));
        detector.set_failing(true);
        let sup = supervisor(source, detector.clone());

        sup.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sup.dispatcher().is_empty());
        detector.set_failing(false);
        assert!(wait_for(|| sup.state() == SupervisionState::Supervised).await);
        sup.stop().await;
    }
}
