//! `pawwatch-cli` – Pawwatch command line entry point.
//!
//! This binary wires the whole supervision pipeline together and runs it
//! until Ctrl-C. It:
//!
//! 1. Loads `~/.pawwatch/config.toml`, writing the defaults on first run.
//! 2. Starts a simulated camera and the scripted detector (no inference
//!    backend ships with the crate).
//! 3. Persists every event to SQLite and fans it out on the event bus.
//! 4. Runs the configured alert actions with per-action cooldowns.
//! 5. On Ctrl-C shuts down in order (alert listener, recorder, supervisor),
//!    prunes old events and prints a summary.

mod config;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pawwatch_hal::{CaptureThread, FrameSource, SimCamera};
use pawwatch_memory::{EventStore, PersistenceObserver, SharedEventStore};
use pawwatch_middleware::{BusObserver, EventBus, EventDispatcher, Topic};
use pawwatch_perception::{CategoryMap, ScriptedDetector};
use pawwatch_runtime::actions::{FileLogger, SoundAlert, VideoRecorder, WebhookNotifier};
use pawwatch_runtime::{ActionCoordinator, Supervisor, telemetry};
use pawwatch_types::{SupervisionEvent, SupervisionState};

fn main() {
    // Tracing must be up before anything logs; keep the guard alive so
    // buffered spans are flushed on exit.
    let _telemetry = telemetry::init_tracing("pawwatch");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(config = ?cfg, "configuration resolved");

    // ── Shutdown signal ──────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown_rx)) {
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

async fn run(cfg: config::Config, mut shutdown: watch::Receiver<bool>) -> Result<(), String> {
    // ── Frames and detection ─────────────────────────────────────────────
    let source: Arc<dyn FrameSource> = Arc::new(CaptureThread::new(
        Box::new(SimCamera::new("sim-camera").with_resolution(64, 48)),
        cfg.camera_fps,
    ));
    let map = CategoryMap::new(
        cfg.supervisee_labels.clone(),
        cfg.supervisor_labels.clone(),
        cfg.confidence_threshold,
    );
    let detector = ScriptedDetector::new(cfg.script()).with_labels(
        map,
        cfg.supervisee_labels.first().cloned().unwrap_or_default(),
        cfg.supervisor_labels.first().cloned().unwrap_or_default(),
    );

    // ── Persistence and fan-out ──────────────────────────────────────────
    let store = EventStore::open(&cfg.database_path).map_err(|e| {
        format!(
            "cannot open event database {}: {}",
            cfg.database_path.display(),
            e
        )
    })?;
    let store: SharedEventStore = Arc::new(Mutex::new(store));
    let bus = EventBus::default();
    let dispatcher = Arc::new(EventDispatcher::new(cfg.history_capacity));
    dispatcher.register(Arc::new(PersistenceObserver::new(Arc::clone(&store))));
    dispatcher.register(Arc::new(BusObserver::new(bus.clone())));

    // ── Alert actions ────────────────────────────────────────────────────
    let coordinator = Arc::new(ActionCoordinator::new(cfg.coordinator_config()));
    if cfg.enable_sound_alert {
        coordinator.add_action(Arc::new(SoundAlert::new(cfg.sound_file.clone())));
    }
    if cfg.enable_file_logging {
        coordinator.add_action(Arc::new(FileLogger::new(cfg.log_directory.clone())));
    }
    let recorder = cfg.enable_video_recording.then(|| {
        Arc::new(VideoRecorder::new(
            Arc::clone(&source),
            cfg.recording_directory.clone(),
            Duration::from_secs(cfg.recording_duration_seconds),
        ))
    });
    if let Some(recorder) = &recorder {
        coordinator.add_action(Arc::clone(recorder) as Arc<dyn pawwatch_runtime::Action>);
    }
    coordinator.add_action(Arc::new(WebhookNotifier::new(
        cfg.notification_webhook.clone(),
    )));
    println!(
        "  Alert actions: {}",
        coordinator.action_names().join(", ").bold()
    );
    let listener = Arc::clone(&coordinator).spawn_listener(bus.subscribe_to(Topic::Alerts));

    // ── Supervisor ───────────────────────────────────────────────────────
    let supervisor = Arc::new(Supervisor::with_dispatcher(
        cfg.supervisor_config(),
        Arc::clone(&source),
        Arc::new(detector),
        dispatcher,
    ));
    let mut events = bus.subscribe_to(Topic::Events);
    supervisor
        .start()
        .await
        .map_err(|e| format!("cannot start supervision: {}", e))?;
    println!(
        "  Watching. Alert after {} unsupervised. Press {} to stop.\n",
        format!("{:.1}s", cfg.alert_delay_seconds).bold(),
        "Ctrl-C".bold()
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = events.recv() => match received {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "console fell behind the event stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────
    // No new actions once the listener is gone. Closing the recorder also
    // catches a recording dispatched just before that, and it still reads
    // frames until the supervisor releases the camera.
    listener.abort();
    if let Some(recorder) = &recorder
        && let Some(result) = recorder.close().await
    {
        match result {
            Ok(summary) => println!(
                "  {} Recording saved to {} ({} frames)",
                "✓".green(),
                summary.path.display(),
                summary.frames_written
            ),
            Err(e) => println!("  {}: {}", "Recording failed".red(), e),
        }
    }
    let status = supervisor.status();
    supervisor.stop().await;

    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    match store.cleanup_older_than(cfg.cleanup_days, Utc::now()) {
        Ok(0) => {}
        Ok(n) => println!("  {} Pruned {} event(s) older than {} days", "✓".green(), n, cfg.cleanup_days),
        Err(e) => warn!(error = %e, "event cleanup failed"),
    }
    match store.statistics(None, None) {
        Ok(stats) => {
            println!();
            println!("  {}", "Session summary".bold());
            println!("    events in memory    : {}", status.event_count);
            println!("    events stored       : {}", stats.total_events);
            println!("    alerts stored       : {}", stats.total_alerts);
            println!(
                "    longest unsupervised: {:.1}s",
                stats.max_unsupervised_duration
            );
        }
        Err(e) => warn!(error = %e, "could not compute statistics"),
    }
    println!("{}", "  ✓ Exiting Pawwatch.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_event(event: &SupervisionEvent) {
    let time = event.timestamp.format("%H:%M:%S");
    let counts = format!(
        "dogs={} people={}",
        event.supervisee_count, event.supervisor_count
    );
    if event.is_alert() {
        let secs = event
            .unsupervised_duration
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        println!(
            "  {} {} {} ({:.1}s unsupervised)",
            time.to_string().dimmed(),
            "ALERT".red().bold(),
            counts,
            secs
        );
        return;
    }
    let state = match event.state {
        SupervisionState::Idle => "idle".normal(),
        SupervisionState::Supervised => "supervised".green(),
        SupervisionState::Unsupervised => "unsupervised".yellow(),
        SupervisionState::Alert => "alert".red(),
    };
    println!(
        "  {} {} → {} {}",
        time.to_string().dimmed(),
        event.previous_state.as_str().dimmed(),
        state.bold(),
        counts
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                              __      __ "#.bold().cyan());
    println!("{}", r#"  / _ \___ __    ___    _____ _____/ /_____/ / "#.bold().cyan());
    println!("{}", r#" / ___/ _ `/ |/|/ / |/|/ / _ `/ __/ __/ __/ _ \"#.bold().cyan());
    println!("{}", r#"/_/   \_,_/|__,__/|__,__/\_,_/\__/\__/\__/_//_/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Pawwatch".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Unsupervised-pet monitor");
    println!();
}
