use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::error::SettingsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub model: ModelSettings,
    pub performance: PerformanceSettings,
    pub detection: DetectionSettings,
    pub languages: Vec<String>,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    Auto,
    Accelerated,
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    None,
    Int8,
    Int4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model_id: String,
    pub device: DevicePreference,
    pub quantization: Quantization,
    /// Below this much free memory the loader quantizes on its own.
    pub auto_quantize_below_mb: u64,
    pub max_new_tokens: usize,
    pub repetition_penalty: f32,
    pub no_repeat_ngram_size: usize,
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub max_text_length: usize,
    pub debounce_ms: u64,
    pub max_concurrency: usize,
    pub shutdown_timeout_ms: u64,
    /// Per-inference deadline. `None` lets a call run until the engine returns.
    pub inference_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub confidence_threshold: f64,
    pub cache_capacity: usize,
    pub prefix_chars: usize,
    pub min_text_chars: usize,
    pub fallback_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: "yanolja/YanoljaNEXT-Rosetta-4B".to_string(),
            device: DevicePreference::Auto,
            quantization: Quantization::None,
            auto_quantize_below_mb: 4096,
            max_new_tokens: 512,
            repetition_penalty: 1.2,
            no_repeat_ngram_size: 3,
            load_timeout_ms: 30_000,
        }
    }
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_text_length: 2000,
            debounce_ms: 500,
            max_concurrency: 2,
            shutdown_timeout_ms: 5000,
            inference_timeout_ms: None,
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            cache_capacity: 256,
            prefix_chars: 100,
            min_text_chars: 3,
            fallback_language: "en".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            performance: PerformanceSettings::default(),
            detection: DetectionSettings::default(),
            languages: ["ko", "en", "ja", "zh", "es", "fr", "de", "ru", "pt", "it"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            logging: LogSettings::default(),
        }
    }
}

impl ModelSettings {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl PerformanceSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}

impl ServiceSettings {
    pub fn get_settings_path() -> Result<PathBuf, SettingsError> {
        ProjectDirs::from("com", "localtranslate", "LocalTranslate")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Load from the platform config dir, writing defaults on first run.
    pub async fn load() -> Result<Self, SettingsError> {
        let path = Self::get_settings_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            let settings = Self::default();
            settings.save_to(path).await?;
            return Ok(settings);
        }

        let content = fs::read_to_string(path).await?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn save(&self) -> Result<(), SettingsError> {
        let path = Self::get_settings_path()?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: &str| Err(SettingsError::Invalid(msg.to_string()));

        if self.performance.max_concurrency == 0 {
            return invalid("performance.max_concurrency must be at least 1");
        }
        if self.performance.max_text_length == 0 {
            return invalid("performance.max_text_length must be at least 1");
        }
        if self.detection.cache_capacity == 0 {
            return invalid("detection.cache_capacity must be at least 1");
        }
        if self.detection.prefix_chars == 0 {
            return invalid("detection.prefix_chars must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return invalid("detection.confidence_threshold must be within [0, 1]");
        }
        if self.languages.is_empty() {
            return invalid("languages must not be empty");
        }
        if !self.languages.contains(&self.detection.fallback_language) {
            return invalid("detection.fallback_language must be a supported language");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ServiceSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.performance.max_concurrency, 2);
        assert_eq!(settings.performance.debounce(), Duration::from_millis(500));
        assert_eq!(settings.languages.len(), 10);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut settings = ServiceSettings::default();
        settings.performance.max_concurrency = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut settings = ServiceSettings::default();
        settings.detection.confidence_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: ServiceSettings =
            serde_json::from_str(r#"{ "performance": { "debounce_ms": 250 } }"#).unwrap();
        assert_eq!(settings.performance.debounce_ms, 250);
        assert_eq!(settings.performance.max_text_length, 2000);
        assert_eq!(settings.model.quantization, Quantization::None);
    }

    #[tokio::test]
    async fn test_load_from_creates_defaults_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let first = ServiceSettings::load_from(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(first, ServiceSettings::default());

        let mut changed = first.clone();
        changed.performance.max_concurrency = 4;
        changed.save_to(&path).await.unwrap();

        let reloaded = ServiceSettings::load_from(&path).await.unwrap();
        assert_eq!(reloaded.performance.max_concurrency, 4);
    }

    #[tokio::test]
    async fn test_load_from_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{ "languages": [] }"#).await.unwrap();

        let err = ServiceSettings::load_from(&path).await.unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }
}
