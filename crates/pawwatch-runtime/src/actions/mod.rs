//! Alert side effects and the coordinator that fires them.
//!
//! An [`Action`] reacts to an alert (plays a sound, writes a log line,
//! records video, calls a webhook). The [`ActionCoordinator`] owns the
//! registered actions and decides, per alert, which of them run:
//!
//! 1. disabled actions are skipped;
//! 2. actions still inside their cooldown window are skipped;
//! 3. the rest are dispatched, each in its own task.
//!
//! Triggering never waits for an action. A slow action (a timed recording,
//! a webhook on a bad network) runs to completion on its own and logs its
//! own result; the coordinator returns as soon as dispatch is done.
//!
//! Cooldown is measured from the last *successful* run of each action.
//! A failure (`Ok(false)`, `Err`, panic or opt-in timeout) leaves the timestamp
//! untouched so the action is retried on the next alert.
//!
//! There is no lock across a whole trigger batch. Two alerts handled at the
//! same moment may both pass the cooldown check for the same action before
//! either records its success; the cooldown is a rate guard, not mutual
//! exclusion.

pub mod file_logger;
pub mod notification;
pub mod sound;
pub mod video_recorder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use pawwatch_middleware::TopicReceiver;
use pawwatch_types::{AlertPayload, WatchError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use file_logger::FileLogger;
pub use notification::WebhookNotifier;
pub use sound::SoundAlert;
pub use video_recorder::VideoRecorder;

/// A side effect run when an alert fires.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique key within a coordinator.
    fn name(&self) -> &str;

    /// Run the side effect.
    ///
    /// `Ok(true)` means it happened; `Ok(false)` means it was skipped or
    /// declined (no URL configured, recording already running, ...).
    async fn execute(&self, payload: &AlertPayload) -> Result<bool, WatchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and reporting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Minimum time between two successful runs of the same action.
    pub cooldown: Duration,
    /// Opt-in upper bound on a single `execute` call. An action still
    /// running at the limit is cancelled and counted as failed. `None` lets
    /// every action run to completion.
    pub action_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            action_timeout: None,
        }
    }
}

/// What happened to one action during a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Handed to its own task and still running when the report was made.
    Dispatched,
    Succeeded,
    Failed(String),
    SkippedDisabled,
    SkippedCooldown { remaining: Duration },
}

/// Per-action outcomes of one trigger, in registration order.
///
/// Freshly returned from [`ActionCoordinator::trigger`], dispatched actions
/// read [`ActionOutcome::Dispatched`]; [`TriggerReport::wait`] replaces them
/// with their final outcome.
#[derive(Debug, Default)]
pub struct TriggerReport {
    pub outcomes: Vec<(String, ActionOutcome)>,
    running: Vec<(usize, JoinHandle<ActionOutcome>)>,
}

impl TriggerReport {
    pub fn outcome(&self, name: &str) -> Option<&ActionOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ActionOutcome::Succeeded)
            .count()
    }

    /// Actions whose task had not been awaited yet.
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Wait for every dispatched action and fill in its final outcome.
    pub async fn wait(mut self) -> Self {
        let (indices, tasks): (Vec<usize>, Vec<_>) =
            std::mem::take(&mut self.running).into_iter().unzip();
        for (index, joined) in indices.into_iter().zip(join_all(tasks).await) {
            self.outcomes[index].1 = joined
                .unwrap_or_else(|e| ActionOutcome::Failed(format!("action task aborted: {e}")));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatus {
    pub name: String,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub actions: Vec<ActionStatus>,
    pub cooldown_seconds: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionCoordinator
// ─────────────────────────────────────────────────────────────────────────────

struct ActionSlot {
    action: Arc<dyn Action>,
    enabled: AtomicBool,
    last_triggered: Mutex<Option<DateTime<Utc>>>,
}

impl ActionSlot {
    fn last_triggered(&self) -> Option<DateTime<Utc>> {
        *self.last_triggered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry of actions plus the cooldown policy.
pub struct ActionCoordinator {
    config: CoordinatorConfig,
    slots: RwLock<Vec<Arc<ActionSlot>>>,
}

impl Default for ActionCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl ActionCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Register `action`, enabled. An action with the same name is replaced
    /// in place (keeping its position) and `true` is returned.
    pub fn add_action(&self, action: Arc<dyn Action>) -> bool {
        let slot = Arc::new(ActionSlot {
            action,
            enabled: AtomicBool::new(true),
            last_triggered: Mutex::new(None),
        });
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let name = slot.action.name().to_string();
        if let Some(existing) = slots.iter_mut().find(|s| s.action.name() == name) {
            *existing = slot;
            true
        } else {
            info!(action = %name, "action registered");
            slots.push(slot);
            false
        }
    }

    pub fn remove_action(&self, name: &str) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|s| s.action.name() != name);
        slots.len() != before
    }

    pub fn enable_action(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_action(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        match slots.iter().find(|s| s.action.name() == name) {
            Some(slot) => {
                slot.enabled.store(enabled, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        self.slots()
            .iter()
            .map(|s| s.action.name().to_string())
            .collect()
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            actions: self
                .slots()
                .iter()
                .map(|s| ActionStatus {
                    name: s.action.name().to_string(),
                    enabled: s.enabled.load(Ordering::Acquire),
                    last_triggered: s.last_triggered(),
                })
                .collect(),
            cooldown_seconds: self.config.cooldown.as_secs_f64(),
        }
    }

    fn slots(&self) -> Vec<Arc<ActionSlot>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Triggering ───────────────────────────────────────────────────────────

    /// Trigger at the current wall-clock time.
    pub fn trigger(&self, payload: &AlertPayload) -> TriggerReport {
        self.trigger_at(payload, Utc::now())
    }

    /// Dispatch every eligible action and return without waiting for them.
    ///
    /// Each dispatched action runs in its own task; on `Ok(true)` that task
    /// records `now` as the action's last trigger time. Use
    /// [`TriggerReport::wait`] to collect the final outcomes. Dropping the
    /// report leaves the actions running. Must be called inside a Tokio
    /// runtime.
    pub fn trigger_at(&self, payload: &AlertPayload, now: DateTime<Utc>) -> TriggerReport {
        let mut report = TriggerReport::default();

        for slot in self.slots() {
            let name = slot.action.name().to_string();
            if !slot.enabled.load(Ordering::Acquire) {
                debug!(action = %name, "action disabled, skipping");
                report.outcomes.push((name, ActionOutcome::SkippedDisabled));
                continue;
            }
            if let Some(remaining) = self.cooldown_remaining(&slot, now) {
                debug!(action = %name, remaining_secs = remaining.as_secs_f64(), "action on cooldown");
                report
                    .outcomes
                    .push((name, ActionOutcome::SkippedCooldown { remaining }));
                continue;
            }
            let task = tokio::spawn(run_action(
                slot,
                payload.clone(),
                now,
                self.config.action_timeout,
            ));
            report.running.push((report.outcomes.len(), task));
            report.outcomes.push((name, ActionOutcome::Dispatched));
        }

        info!(
            dispatched = report.running.len(),
            total = report.outcomes.len(),
            "alert actions dispatched"
        );
        report
    }

    fn cooldown_remaining(&self, slot: &ActionSlot, now: DateTime<Utc>) -> Option<Duration> {
        let last = slot.last_triggered()?;
        let since = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.config.cooldown.checked_sub(since).filter(|r| !r.is_zero())
    }

    // ── Bus integration ──────────────────────────────────────────────────────

    /// Consume alerts from `alerts` until the bus closes.
    pub fn spawn_listener(self: Arc<Self>, mut alerts: TopicReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(event) if event.is_alert() => {
                        self.trigger(&event.alert_payload());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(dropped = n, "action listener lagged behind alert stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("action listener stopped");
        })
    }
}

/// Run one action to completion, record its success and log the result.
///
/// The action itself runs in a nested task so a panic surfaces as a join
/// error here instead of tearing down the bookkeeping.
async fn run_action(
    slot: Arc<ActionSlot>,
    payload: AlertPayload,
    now: DateTime<Utc>,
    timeout: Option<Duration>,
) -> ActionOutcome {
    let action = Arc::clone(&slot.action);
    let mut task = tokio::spawn(async move { action.execute(&payload).await });
    let joined = match timeout {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                let reason = format!("timed out after {limit:?}");
                warn!(action = %slot.action.name(), %reason, "action failed");
                return ActionOutcome::Failed(reason);
            }
        },
    };

    let name = slot.action.name();
    match joined {
        Ok(Ok(true)) => {
            *slot.last_triggered.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
            info!(action = %name, "action succeeded");
            ActionOutcome::Succeeded
        }
        Ok(Ok(false)) => {
            warn!(action = %name, "action reported failure");
            ActionOutcome::Failed("action reported failure".to_string())
        }
        Ok(Err(e)) => {
            warn!(action = %name, error = %e, "action failed");
            ActionOutcome::Failed(e.to_string())
        }
        Err(join_err) => {
            warn!(action = %name, error = %join_err, "action task aborted");
            ActionOutcome::Failed(format!("action task aborted: {join_err}"))
        }
    }
}
