//! Environment-driven configuration.
//!
//! Unlike an interactive settings UI that round-trips to disk, `Settings`
//! is read once from the process environment at startup.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Recognized environment keys and their effect.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider_base_url: String,
    pub provider_client_id: String,
    pub provider_client_secret: String,
    pub provider_jwt: Option<String>,

    pub asr_api_key: String,
    pub asr_org: Option<String>,
    pub asr_language: String,
    pub asr_engine: String,
    pub asr_max_wait_seconds: u64,
    pub asr_poll_interval_seconds: u64,

    pub filestore_credentials_path: String,
    pub filestore_root_folder_id: String,

    pub db_url: String,

    pub stage_dir: String,

    pub concurrency_transcribe: usize,
    pub concurrency_persist: usize,

    pub window_days: i64,
}

/// A required environment variable was missing or empty.
#[derive(Debug, thiserror::Error)]
#[error("missing or invalid configuration key: {0}")]
pub struct ConfigError(pub String);

fn required(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError(key.to_string())),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn with_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from the process environment, applying the documented
    /// default for every optional key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            provider_base_url: required("PROVIDER_BASE_URL")?,
            provider_client_id: required("PROVIDER_CLIENT_ID")?,
            provider_client_secret: required("PROVIDER_CLIENT_SECRET")?,
            provider_jwt: optional("PROVIDER_JWT"),

            asr_api_key: required("ASR_API_KEY")?,
            asr_org: optional("ASR_ORG"),
            asr_language: env::var("ASR_LANGUAGE").unwrap_or_else(|_| "en-US".to_string()),
            asr_engine: env::var("ASR_ENGINE").unwrap_or_else(|_| "full".to_string()),
            asr_max_wait_seconds: with_default("ASR_MAX_WAIT_SECONDS", 3600),
            asr_poll_interval_seconds: with_default("ASR_POLL_INTERVAL_SECONDS", 3),

            filestore_credentials_path: required("FILESTORE_CREDENTIALS_PATH")?,
            filestore_root_folder_id: required("FILESTORE_ROOT_FOLDER_ID")?,

            db_url: required("DB_URL")?,

            stage_dir: required("STAGE_DIR")?,

            concurrency_transcribe: with_default("CONCURRENCY_TRANSCRIBE", 3),
            concurrency_persist: with_default("CONCURRENCY_PERSIST", 3),

            window_days: with_default("WINDOW_DAYS", 1),
        })
    }

    pub fn asr_max_wait(&self) -> Duration {
        Duration::from_secs(self.asr_max_wait_seconds)
    }

    pub fn asr_poll_interval(&self) -> Duration {
        Duration::from_secs(self.asr_poll_interval_seconds)
    }

    /// Overlays operational knobs from a TOML file on top of the
    /// environment-loaded settings. Never touches credentials: the
    /// overlay only carries concurrency and window tuning, so a config
    /// file can be checked in without risk of leaking secrets.
    pub fn apply_overlay(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
        let overlay: ConfigOverlay = toml::from_str(&contents)
            .map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))?;

        if let Some(v) = overlay.concurrency_transcribe {
            self.concurrency_transcribe = v;
        }
        if let Some(v) = overlay.concurrency_persist {
            self.concurrency_persist = v;
        }
        if let Some(v) = overlay.window_days {
            self.window_days = v;
        }
        Ok(())
    }
}

/// Operational-knob overlay, layered on top of `Settings::from_env` by the
/// CLI's `--config` flag.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverlay {
    pub concurrency_transcribe: Option<usize>,
    pub concurrency_persist: Option<usize>,
    pub window_days: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_minimal_env() {
        env::set_var("PROVIDER_BASE_URL", "https://example.invalid");
        env::set_var("PROVIDER_CLIENT_ID", "id");
        env::set_var("PROVIDER_CLIENT_SECRET", "secret");
        env::set_var("ASR_API_KEY", "key");
        env::set_var("FILESTORE_CREDENTIALS_PATH", "/tmp/creds.json");
        env::set_var("FILESTORE_ROOT_FOLDER_ID", "root");
        env::set_var("DB_URL", "postgres://localhost/test");
        env::set_var("STAGE_DIR", "/tmp/stage");
    }

    #[test]
    fn missing_required_key_errors() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("PROVIDER_BASE_URL");
        env::remove_var("PROVIDER_CLIENT_ID");
        env::remove_var("PROVIDER_CLIENT_SECRET");
        env::remove_var("ASR_API_KEY");
        env::remove_var("FILESTORE_CREDENTIALS_PATH");
        env::remove_var("FILESTORE_ROOT_FOLDER_ID");
        env::remove_var("DB_URL");
        env::remove_var("STAGE_DIR");

        assert!(Settings::from_env().is_err());
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_minimal_env();
        env::remove_var("ASR_LANGUAGE");
        env::remove_var("ASR_MAX_WAIT_SECONDS");
        env::remove_var("CONCURRENCY_TRANSCRIBE");
        env::remove_var("WINDOW_DAYS");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.asr_language, "en-US");
        assert_eq!(settings.asr_max_wait_seconds, 3600);
        assert_eq!(settings.concurrency_transcribe, 3);
        assert_eq!(settings.window_days, 1);
    }

    #[test]
    fn overrides_are_respected() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_minimal_env();
        env::set_var("CONCURRENCY_TRANSCRIBE", "7");
        env::set_var("ASR_MAX_WAIT_SECONDS", "120");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.concurrency_transcribe, 7);
        assert_eq!(settings.asr_max_wait(), Duration::from_secs(120));

        env::remove_var("CONCURRENCY_TRANSCRIBE");
        env::remove_var("ASR_MAX_WAIT_SECONDS");
    }

    #[test]
    fn overlay_file_tunes_concurrency_without_touching_credentials() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_minimal_env();
        env::remove_var("CONCURRENCY_TRANSCRIBE");

        let dir = tempfile::tempdir().unwrap();
        let overlay_path = dir.path().join("archivist.toml");
        fs::write(&overlay_path, "concurrency_transcribe = 9\nwindow_days = 3\n").unwrap();

        let mut settings = Settings::from_env().unwrap();
        settings.apply_overlay(&overlay_path).unwrap();

        assert_eq!(settings.concurrency_transcribe, 9);
        assert_eq!(settings.window_days, 3);
        assert_eq!(settings.concurrency_persist, 3, "unset overlay keys keep their env/default value");
        assert_eq!(settings.provider_client_secret, "secret", "overlay never touches credentials");
    }

    #[test]
    fn overlay_rejects_a_malformed_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_minimal_env();

        let dir = tempfile::tempdir().unwrap();
        let overlay_path = dir.path().join("archivist.toml");
        fs::write(&overlay_path, "concurrency_transcribe = \"not a number\"").unwrap();

        let mut settings = Settings::from_env().unwrap();
        assert!(settings.apply_overlay(&overlay_path).is_err());
    }
}
