use crate::defaults;
use crate::error::{CallError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub vad: VadSection,
    pub playback: PlaybackSection,
    pub call: CallSection,
    pub service: ServiceSection,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSection {
    pub speech_threshold: f32,
    pub silence_duration_ms: u32,
    pub min_speech_ms: u32,
    /// Force an endpoint after this much unbroken speech. Unset never forces one.
    pub max_speech_ms: Option<u32>,
    pub frame_interval_ms: u64,
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSection {
    pub fade_in_ms: u32,
    pub fade_in_steps: u32,
}

/// Call lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallSection {
    pub language: String,
    pub quiet_period_ms: u64,
    pub recognition_settle_ms: u64,
    pub error_display_ms: u64,
    pub re_engagement_prompt: String,
}

/// Remote dialogue service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceSection {
    pub base_url: String,
    pub api_key: Option<String>,
    /// `0` waits for a reply indefinitely.
    pub reply_timeout_ms: u64,
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            max_speech_ms: None,
            frame_interval_ms: defaults::FRAME_INTERVAL_MS,
        }
    }
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            fade_in_ms: defaults::FADE_IN_MS,
            fade_in_steps: defaults::FADE_IN_STEPS,
        }
    }
}

impl Default for CallSection {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            quiet_period_ms: defaults::QUIET_PERIOD_MS,
            recognition_settle_ms: defaults::RECOGNITION_SETTLE_MS,
            error_display_ms: defaults::ERROR_DISPLAY_MS,
            re_engagement_prompt: defaults::RE_ENGAGEMENT_PROMPT.to_string(),
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: defaults::DEFAULT_SERVICE_URL.to_string(),
            api_key: None,
            reply_timeout_ms: defaults::REPLY_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                CallError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(CallError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CALLVOX_SERVICE_URL → service.base_url
    /// - CALLVOX_API_KEY → service.api_key
    /// - CALLVOX_LANGUAGE → call.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CALLVOX_SERVICE_URL")
            && !url.is_empty()
        {
            self.service.base_url = url;
        }

        if let Ok(key) = std::env::var("CALLVOX_API_KEY")
            && !key.is_empty()
        {
            self.service.api_key = Some(key);
        }

        if let Ok(language) = std::env::var("CALLVOX_LANGUAGE")
            && !language.is_empty()
        {
            self.call.language = language;
        }

        self
    }

    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad.speech_threshold) {
            return Err(invalid(
                "vad.speech_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.vad.silence_duration_ms == 0 {
            return Err(invalid("vad.silence_duration_ms", "must be positive"));
        }
        if self.vad.frame_interval_ms == 0 {
            return Err(invalid("vad.frame_interval_ms", "must be positive"));
        }
        if let Some(max) = self.vad.max_speech_ms
            && max <= self.vad.min_speech_ms
        {
            return Err(invalid(
                "vad.max_speech_ms",
                "must be greater than vad.min_speech_ms",
            ));
        }
        if self.playback.fade_in_ms > 0 && self.playback.fade_in_steps == 0 {
            return Err(invalid(
                "playback.fade_in_steps",
                "must be positive when fade_in_ms is set",
            ));
        }
        if self.call.language.trim().is_empty() {
            return Err(invalid("call.language", "must not be empty"));
        }
        if self.call.quiet_period_ms == 0 {
            return Err(invalid("call.quiet_period_ms", "must be positive"));
        }
        if self.service.base_url.trim().is_empty() {
            return Err(invalid("service.base_url", "must not be empty"));
        }
        Ok(())
    }

    /// Serialize to pretty TOML (used by `callvox config init`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CallError::Other(e.to_string()))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callvox/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("callvox").join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> CallError {
    CallError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_callvox_env() {
        remove_env("CALLVOX_SERVICE_URL");
        remove_env("CALLVOX_API_KEY");
        remove_env("CALLVOX_LANGUAGE");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.vad.speech_threshold, 0.02);
        assert_eq!(config.vad.silence_duration_ms, 600);
        assert_eq!(config.vad.min_speech_ms, 200);
        assert_eq!(config.vad.max_speech_ms, None);

        assert_eq!(config.playback.fade_in_ms, 300);
        assert_eq!(config.playback.fade_in_steps, 10);

        assert_eq!(config.call.language, "en-US");
        assert_eq!(config.call.quiet_period_ms, 8000);
        assert_eq!(config.call.recognition_settle_ms, 300);

        assert_eq!(config.service.reply_timeout_ms, 30_000);
        assert_eq!(config.service.api_key, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [vad]
            speech_threshold = 0.05
            silence_duration_ms = 800
            min_speech_ms = 250
            max_speech_ms = 30000

            [playback]
            fade_in_ms = 200
            fade_in_steps = 4

            [call]
            language = "de-DE"
            quiet_period_ms = 12000

            [service]
            base_url = "https://voice.example.com/api"
            api_key = "secret"
            reply_timeout_ms = 0
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.vad.speech_threshold, 0.05);
        assert_eq!(config.vad.silence_duration_ms, 800);
        assert_eq!(config.vad.min_speech_ms, 250);
        assert_eq!(config.vad.max_speech_ms, Some(30000));
        assert_eq!(config.playback.fade_in_ms, 200);
        assert_eq!(config.playback.fade_in_steps, 4);
        assert_eq!(config.call.language, "de-DE");
        assert_eq!(config.call.quiet_period_ms, 12000);
        assert_eq!(config.service.base_url, "https://voice.example.com/api");
        assert_eq!(config.service.api_key.as_deref(), Some("secret"));
        assert_eq!(config.service.reply_timeout_ms, 0);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [call]
            language = "fr-FR"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.call.language, "fr-FR");
        assert_eq!(config.vad, VadSection::default());
        assert_eq!(config.playback, PlaybackSection::default());
        assert_eq!(config.service, ServiceSection::default());
        assert_eq!(config.call.quiet_period_ms, 8000);
    }

    #[test]
    fn test_load_rejects_out_of_range_threshold() {
        let temp_file = write_temp(
            r#"
            [vad]
            speech_threshold = 1.5
        "#,
        );

        match Config::load(temp_file.path()) {
            Err(CallError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "vad.speech_threshold");
            }
            other => panic!("expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_max_speech_below_min() {
        let mut config = Config::default();
        config.vad.max_speech_ms = Some(100);
        assert!(config.validate().is_err());

        config.vad.max_speech_ms = Some(10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_service_url_and_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_callvox_env();

        set_env("CALLVOX_SERVICE_URL", "https://staging.example.com/voice");
        set_env("CALLVOX_API_KEY", "k-123");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.service.base_url, "https://staging.example.com/voice");
        assert_eq!(config.service.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.call.language, "en-US");

        clear_callvox_env();
    }

    #[test]
    fn test_env_override_language() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_callvox_env();

        set_env("CALLVOX_LANGUAGE", "es-ES");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.call.language, "es-ES");

        clear_callvox_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_callvox_env();

        set_env("CALLVOX_SERVICE_URL", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.service.base_url, defaults::DEFAULT_SERVICE_URL);

        clear_callvox_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [vad
            speech_threshold = "broken
        "#,
        );

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(CallError::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_callvox_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_temp("[call\nlanguage = ");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_to_toml_roundtrips_through_load() {
        let mut config = Config::default();
        config.call.language = "it-IT".to_string();
        config.vad.max_speech_ms = Some(45_000);

        let temp_file = write_temp(&config.to_toml().unwrap());
        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Some(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("callvox"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
