//! Configuration loading and live preference state

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::hotkey::CommandKey;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Path of the persisted preference file
    pub prefs_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("imetap");

        let socket_path = data_dir.join("daemon.sock");
        let prefs_path = data_dir.join("preferences.json");

        Ok(Self {
            socket_path,
            data_dir,
            prefs_path,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Persisted user preferences.
///
/// Owned by the settings surface (the IPC layer); the core only ever
/// reads them through [`SharedPrefs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Master switch for tap detection
    pub enabled: bool,
    /// Target identifier fragment for a left Command tap
    pub left_target: String,
    /// Target identifier fragment for a right Command tap
    pub right_target: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: true,
            left_target: "com.apple.keylayout.ABC".to_string(),
            right_target: "com.google.inputmethod.Japanese".to_string(),
        }
    }
}

impl Preferences {
    /// Read preferences from disk; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(?path, "no preference file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Persist preferences to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Live view of the preferences shared between the settings surface
/// (which writes) and the core (which only reads).
///
/// The enabled flag is atomic because the event-tap callback reads it
/// on every keystroke and must not take a lock there.
pub struct SharedPrefs {
    enabled: AtomicBool,
    targets: RwLock<Targets>,
}

struct Targets {
    left: String,
    right: String,
}

impl SharedPrefs {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            enabled: AtomicBool::new(prefs.enabled),
            targets: RwLock::new(Targets {
                left: prefs.left_target,
                right: prefs.right_target,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Configured target identifier fragment for the given key
    pub async fn target_for(&self, key: CommandKey) -> String {
        let targets = self.targets.read().await;
        match key {
            CommandKey::Left => targets.left.clone(),
            CommandKey::Right => targets.right.clone(),
        }
    }

    pub async fn set_target(&self, key: CommandKey, target: String) {
        let mut targets = self.targets.write().await;
        match key {
            CommandKey::Left => targets.left = target,
            CommandKey::Right => targets.right = target,
        }
    }

    /// Replace the whole live view, e.g. after a reload from disk
    pub async fn apply(&self, prefs: Preferences) {
        {
            let mut targets = self.targets.write().await;
            targets.left = prefs.left_target;
            targets.right = prefs.right_target;
        }
        self.set_enabled(prefs.enabled);
    }

    /// Consistent copy for persistence and status reporting
    pub async fn snapshot(&self) -> Preferences {
        let targets = self.targets.read().await;
        Preferences {
            enabled: self.is_enabled(),
            left_target: targets.left.clone(),
            right_target: targets.right.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = Preferences::default();
        assert!(prefs.enabled);
        assert_eq!(prefs.left_target, "com.apple.keylayout.ABC");
        assert_eq!(prefs.right_target, "com.google.inputmethod.Japanese");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let prefs = Preferences {
            enabled: false,
            left_target: "com.apple.keylayout.German".to_string(),
            right_target: "com.apple.inputmethod.Korean".to_string(),
        };
        prefs.save(&path).unwrap();

        let loaded = Preferences::load(&path).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, r#"{"enabled": false}"#).unwrap();

        let prefs = Preferences::load(&path).unwrap();
        assert!(!prefs.enabled);
        assert_eq!(prefs.left_target, Preferences::default().left_target);
    }

    #[tokio::test]
    async fn test_shared_prefs_reads_and_writes() {
        let shared = SharedPrefs::new(Preferences::default());

        assert!(shared.is_enabled());
        shared.set_enabled(false);
        assert!(!shared.is_enabled());

        assert_eq!(
            shared.target_for(CommandKey::Left).await,
            "com.apple.keylayout.ABC"
        );
        shared
            .set_target(CommandKey::Left, "com.apple.keylayout.Colemak".to_string())
            .await;
        assert_eq!(
            shared.target_for(CommandKey::Left).await,
            "com.apple.keylayout.Colemak"
        );

        let snapshot = shared.snapshot().await;
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.left_target, "com.apple.keylayout.Colemak");
    }

    #[tokio::test]
    async fn test_apply_replaces_whole_view() {
        let shared = SharedPrefs::new(Preferences::default());

        shared
            .apply(Preferences {
                enabled: false,
                left_target: "com.apple.keylayout.Dvorak".to_string(),
                right_target: "com.apple.inputmethod.Korean".to_string(),
            })
            .await;

        assert!(!shared.is_enabled());
        assert_eq!(
            shared.target_for(CommandKey::Right).await,
            "com.apple.inputmethod.Korean"
        );
    }
}
