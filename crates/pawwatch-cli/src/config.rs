//! Configuration – reads/writes `~/.pawwatch/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pawwatch_runtime::{CoordinatorConfig, SupervisorConfig};

/// Persisted configuration stored in `~/.pawwatch/config.toml`.
///
/// Every field has a default, so a partial file is valid.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture rate limit for the camera thread.
    pub camera_fps: u32,
    /// Detections below this confidence are ignored.
    pub confidence_threshold: f32,
    /// Labels counted as the monitored subject.
    pub supervisee_labels: Vec<String>,
    /// Labels counted as a supervising presence.
    pub supervisor_labels: Vec<String>,

    /// Unsupervised time before an alert fires.
    pub alert_delay_seconds: f64,
    /// Time between detection cycles.
    pub check_interval_seconds: f64,
    /// Upper bound on one detector call.
    pub detection_timeout_seconds: f64,
    /// In-memory event history size.
    pub history_capacity: usize,

    /// SQLite event log.
    pub database_path: PathBuf,
    /// Events older than this many days are pruned on exit.
    pub cleanup_days: u32,

    pub enable_sound_alert: bool,
    /// Custom alert sound; speech is used when unset or missing.
    pub sound_file: Option<PathBuf>,
    pub enable_file_logging: bool,
    pub log_directory: PathBuf,
    pub enable_video_recording: bool,
    pub recording_directory: PathBuf,
    pub recording_duration_seconds: u64,
    /// Incoming-webhook URL. Treated as a secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_webhook: Option<String>,

    /// Minimum time between two successful runs of the same action.
    pub action_cooldown_seconds: u64,
    /// Opt-in upper bound on one action run; `0` lets actions finish.
    pub action_timeout_seconds: u64,

    /// `[supervisees, supervisors]` pairs cycled by the simulated detector.
    pub sim_script: Vec<[u32; 2]>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("camera_fps", &self.camera_fps)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("supervisee_labels", &self.supervisee_labels)
            .field("supervisor_labels", &self.supervisor_labels)
            .field("alert_delay_seconds", &self.alert_delay_seconds)
            .field("check_interval_seconds", &self.check_interval_seconds)
            .field("detection_timeout_seconds", &self.detection_timeout_seconds)
            .field("history_capacity", &self.history_capacity)
            .field("database_path", &self.database_path)
            .field("cleanup_days", &self.cleanup_days)
            .field("enable_sound_alert", &self.enable_sound_alert)
            .field("sound_file", &self.sound_file)
            .field("enable_file_logging", &self.enable_file_logging)
            .field("log_directory", &self.log_directory)
            .field("enable_video_recording", &self.enable_video_recording)
            .field("recording_directory", &self.recording_directory)
            .field("recording_duration_seconds", &self.recording_duration_seconds)
            .field(
                "notification_webhook",
                if self.notification_webhook.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("action_cooldown_seconds", &self.action_cooldown_seconds)
            .field("action_timeout_seconds", &self.action_timeout_seconds)
            .field("sim_script", &self.sim_script.len())
            .finish()
    }
}

/// A short demo: empty room, dog with a person, then the dog alone long
/// enough to raise an alert at the default settings.
fn default_sim_script() -> Vec<[u32; 2]> {
    let mut script = vec![[0, 0]; 4];
    script.extend(std::iter::repeat_n([1, 1], 10));
    script.extend(std::iter::repeat_n([1, 0], 30));
    script
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_fps: 30,
            confidence_threshold: 0.5,
            supervisee_labels: vec!["dog".to_string()],
            supervisor_labels: vec!["person".to_string()],
            alert_delay_seconds: 5.0,
            check_interval_seconds: 0.5,
            detection_timeout_seconds: 10.0,
            history_capacity: 1000,
            database_path: PathBuf::from("pawwatch.db"),
            cleanup_days: 30,
            enable_sound_alert: true,
            sound_file: None,
            enable_file_logging: true,
            log_directory: PathBuf::from("logs"),
            enable_video_recording: true,
            recording_directory: PathBuf::from("recordings"),
            recording_duration_seconds: 30,
            notification_webhook: None,
            action_cooldown_seconds: 60,
            action_timeout_seconds: 0,
            sim_script: default_sim_script(),
        }
    }
}

impl Config {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            alert_delay: seconds(self.alert_delay_seconds),
            check_interval: seconds(self.check_interval_seconds).max(Duration::from_millis(10)),
            detection_timeout: seconds(self.detection_timeout_seconds),
            history_capacity: self.history_capacity,
            ..SupervisorConfig::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cooldown: Duration::from_secs(self.action_cooldown_seconds),
            action_timeout: (self.action_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.action_timeout_seconds)),
        }
    }

    pub fn script(&self) -> Vec<(u32, u32)> {
        self.sim_script.iter().map(|[a, b]| (*a, *b)).collect()
    }
}

/// Negative and non-finite values collapse to zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Return the path to `~/.pawwatch/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".pawwatch").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    Ok(parse_from(path)?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// Read the file at `path` without looking at the environment.
pub(crate) fn parse_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `PAWWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PAWWATCH_ALERT_DELAY` | `alert_delay_seconds` |
/// | `PAWWATCH_CHECK_INTERVAL` | `check_interval_seconds` |
/// | `PAWWATCH_COOLDOWN` | `action_cooldown_seconds` |
/// | `PAWWATCH_WEBHOOK` | `notification_webhook` |
/// | `PAWWATCH_DATABASE` | `database_path` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PAWWATCH_ALERT_DELAY")
        && let Ok(secs) = v.trim().parse::<f64>()
        && secs >= 0.0
    {
        cfg.alert_delay_seconds = secs;
    }
    if let Ok(v) = std::env::var("PAWWATCH_CHECK_INTERVAL")
        && let Ok(secs) = v.trim().parse::<f64>()
        && secs > 0.0
    {
        cfg.check_interval_seconds = secs;
    }
    if let Ok(v) = std::env::var("PAWWATCH_COOLDOWN")
        && let Ok(secs) = v.trim().parse::<u64>()
    {
        cfg.action_cooldown_seconds = secs;
    }
    if let Ok(v) = std::env::var("PAWWATCH_WEBHOOK") {
        cfg.notification_webhook = Some(v).filter(|u| !u.trim().is_empty());
    }
    if let Ok(v) = std::env::var("PAWWATCH_DATABASE") {
        cfg.database_path = PathBuf::from(v);
    }
}

/// Save the config to disk, creating `~/.pawwatch/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only file (rw-------) on Unix; the webhook URL is a credential.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.camera_fps, 30);
        assert_eq!(cfg.alert_delay_seconds, 5.0);
        assert_eq!(cfg.check_interval_seconds, 0.5);
        assert_eq!(cfg.action_cooldown_seconds, 60);
        assert_eq!(cfg.history_capacity, 1000);
        assert_eq!(cfg.cleanup_days, 30);
        assert!(cfg.coordinator_config().action_timeout.is_none());
        assert_eq!(cfg.supervisee_labels, vec!["dog"]);
        assert_eq!(cfg.supervisor_labels, vec!["person"]);
        assert!(cfg.notification_webhook.is_none());
    }

    #[test]
    fn debug_redacts_webhook() {
        let cfg = Config {
            notification_webhook: Some("https://hooks.example.com/T000/secret".to_string()),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("secret"), "webhook must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            alert_delay_seconds: 12.5,
            sim_script: vec![[1, 0], [2, 1]],
            sound_file: Some(PathBuf::from("/tmp/bark.wav")),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = parse_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.alert_delay_seconds, cfg.alert_delay_seconds);
        assert_eq!(loaded.sim_script, cfg.sim_script);
        assert_eq!(loaded.sound_file, cfg.sound_file);
        assert_eq!(loaded.recording_directory, PathBuf::from("recordings"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "alert_delay_seconds = 2.0\ncamera_fps = 15\n").unwrap();
        let cfg = parse_from(&path).unwrap().unwrap();
        assert_eq!(cfg.alert_delay_seconds, 2.0);
        assert_eq!(cfg.camera_fps, 15);
        assert_eq!(cfg.action_cooldown_seconds, 60);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "alert_delay_seconds = \"soon\"").unwrap();
        assert!(parse_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_pawwatch_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".pawwatch"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn runtime_configs_follow_settings() {
        let cfg = Config {
            alert_delay_seconds: 2.5,
            check_interval_seconds: 0.0,
            action_timeout_seconds: 0,
            action_cooldown_seconds: 15,
            ..Config::default()
        };
        let sup = cfg.supervisor_config();
        assert_eq!(sup.alert_delay, Duration::from_millis(2500));
        assert_eq!(sup.check_interval, Duration::from_millis(10));
        let coord = cfg.coordinator_config();
        assert_eq!(coord.cooldown, Duration::from_secs(15));
        assert!(coord.action_timeout.is_none());
        assert_eq!(seconds(-1.0), Duration::ZERO);
    }

    #[test]
    fn default_script_reaches_alert() {
        let script = Config::default().script();
        let unsupervised_tail = script.iter().rev().take_while(|c| **c == (1, 0)).count();
        // 30 cycles at 0.5 s comfortably exceeds the 5 s delay.
        assert!(unsupervised_tail as f64 * 0.5 > 5.0);
    }

    #[test]
    fn apply_env_overrides_changes_alert_delay() {
        // SAFETY: only this test touches PAWWATCH_ALERT_DELAY.
        unsafe { std::env::set_var("PAWWATCH_ALERT_DELAY", "8.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.alert_delay_seconds, 8.5);
        unsafe { std::env::remove_var("PAWWATCH_ALERT_DELAY") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_interval() {
        // SAFETY: only this test touches PAWWATCH_CHECK_INTERVAL.
        unsafe { std::env::set_var("PAWWATCH_CHECK_INTERVAL", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.check_interval_seconds, 0.5);
        unsafe { std::env::remove_var("PAWWATCH_CHECK_INTERVAL") };
    }

    #[test]
    fn apply_env_overrides_changes_cooldown_and_webhook() {
        // SAFETY: only this test touches these variables.
        unsafe {
            std::env::set_var("PAWWATCH_COOLDOWN", "120");
            std::env::set_var("PAWWATCH_WEBHOOK", "https://hooks.example.com/x");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.action_cooldown_seconds, 120);
        assert_eq!(
            cfg.notification_webhook.as_deref(),
            Some("https://hooks.example.com/x")
        );
        unsafe {
            std::env::remove_var("PAWWATCH_COOLDOWN");
            std::env::remove_var("PAWWATCH_WEBHOOK");
        }
    }

    #[test]
    fn env_overrides_apply_on_load_but_not_on_parse() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_path = \"from-file.db\"\n").unwrap();

        // SAFETY: only this test touches PAWWATCH_DATABASE.
        unsafe { std::env::set_var("PAWWATCH_DATABASE", "/var/lib/pawwatch/events.db") };
        let parsed = parse_from(&path).unwrap().unwrap();
        let loaded = load_from(&path).unwrap().unwrap();
        unsafe { std::env::remove_var("PAWWATCH_DATABASE") };

        assert_eq!(parsed.database_path, PathBuf::from("from-file.db"));
        assert_eq!(loaded.database_path, PathBuf::from("/var/lib/pawwatch/events.db"));
    }
}
