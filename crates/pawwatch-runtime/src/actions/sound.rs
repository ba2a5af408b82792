//! Audible alert through the platform's command-line audio tools.

use std::path::PathBuf;

use async_trait::async_trait;
use pawwatch_types::{AlertPayload, WatchError};
use tokio::process::Command;
use tracing::{info, warn};

use super::Action;

const DEFAULT_MESSAGE: &str = "Alert! Dog detected unsupervised";

/// Plays `sound_file` if it exists, otherwise speaks a short message.
///
/// | OS | file | fallback |
/// |---|---|---|
/// | macOS | `afplay <file>` | `say <message>` |
/// | Linux | `aplay <file>` | `espeak <message>` |
#[derive(Debug, Clone)]
pub struct SoundAlert {
    sound_file: Option<PathBuf>,
    message: String,
    player: Option<(String, Vec<String>)>,
}

impl SoundAlert {
    pub fn new(sound_file: Option<PathBuf>) -> Self {
        Self {
            sound_file,
            message: DEFAULT_MESSAGE.to_string(),
            player: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Use a fixed command instead of the platform default.
    pub fn with_player(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.player = Some((program.into(), args));
        self
    }

    /// Command line for `os` (as in [`std::env::consts::OS`]).
    fn command_for(&self, os: &str) -> Option<(String, Vec<String>)> {
        if let Some(player) = &self.player {
            return Some(player.clone());
        }
        let file = self
            .sound_file
            .as_ref()
            .filter(|p| p.exists())
            .map(|p| p.display().to_string());
        let (file_player, speaker) = match os {
            "macos" => ("afplay", "say"),
            "linux" => ("aplay", "espeak"),
            _ => return None,
        };
        Some(match file {
            Some(path) => (file_player.to_string(), vec![path]),
            None => (speaker.to_string(), vec![self.message.clone()]),
        })
    }
}

#[async_trait]
impl Action for SoundAlert {
    fn name(&self) -> &str {
        "sound_alert"
    }

    async fn execute(&self, payload: &AlertPayload) -> Result<bool, WatchError> {
        let Some((program, args)) = self.command_for(std::env::consts::OS) else {
            warn!(os = std::env::consts::OS, "no audio command for this platform");
            return Ok(false);
        };
        info!(
            %program,
            supervisees = payload.supervisee_count,
            "playing sound alert"
        );
        let status = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| WatchError::Action {
                action: self.name().to_string(),
                details: format!("failed to run {program}: {e}"),
            })?;
        if !status.success() {
            warn!(%program, %status, "sound command exited unsuccessfully");
        }
        Ok(status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::payload;

    #[test]
    fn falls_back_to_speech_without_file() {
        let alert = SoundAlert::new(None);
        assert_eq!(
            alert.command_for("macos"),
            Some(("say".to_string(), vec![DEFAULT_MESSAGE.to_string()]))
        );
        assert_eq!(alert.command_for("linux").unwrap().0, "espeak");
        assert!(alert.command_for("windows").is_none());
    }

    #[test]
    fn plays_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let alert = SoundAlert::new(Some(file.path().to_path_buf()));
        let (program, args) = alert.command_for("linux").unwrap();
        assert_eq!(program, "aplay");
        assert_eq!(args, vec![file.path().display().to_string()]);
        assert_eq!(alert.command_for("macos").unwrap().0, "afplay");
    }

    #[test]
    fn missing_file_falls_back_to_speech() {
        let alert = SoundAlert::new(Some(PathBuf::from("/nonexistent/bark.wav")))
            .with_message("Check on the dog");
        assert_eq!(
            alert.command_for("linux"),
            Some(("espeak".to_string(), vec!["Check on the dog".to_string()]))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_success() {
        let ok = SoundAlert::new(None).with_player("true", vec![]);
        assert!(ok.execute(&payload()).await.unwrap());

        let failing = SoundAlert::new(None).with_player("false", vec![]);
        assert!(!failing.execute(&payload()).await.unwrap());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let alert = SoundAlert::new(None).with_player("pawwatch-no-such-player", vec![]);
        assert!(matches!(
            alert.execute(&payload()).await,
            Err(WatchError::Action { .. })
        ));
    }
}
