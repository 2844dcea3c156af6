//! Supported language table and code validation.

use isolang::Language;
use serde::Serialize;

use super::error::ValidationError;

pub const AUTO: &str = "auto";

/// Display entry for a language picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageEntry {
    pub code: String,
    pub name: String,
    pub native_name: String,
}

fn native_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "ko" => "한국어",
        "en" => "English",
        "ja" => "日本語",
        "zh" => "中文",
        "es" => "Español",
        "fr" => "Français",
        "de" => "Deutsch",
        "ru" => "Русский",
        "pt" => "Português",
        "it" => "Italiano",
        _ => return None,
    };
    Some(name)
}

/// English name of an ISO 639-1 code, as used in the generation prompt.
pub fn language_name(code: &str) -> Option<&'static str> {
    Language::from_639_1(code).map(|lang| lang.to_name())
}

/// Validated view over the configured language list.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    codes: Vec<String>,
}

impl LanguageTable {
    /// Keeps only codes that are real ISO 639-1 codes; unknown entries are
    /// dropped with a warning.
    pub fn new(codes: &[String]) -> Self {
        let codes = codes
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| {
                let known = Language::from_639_1(c).is_some();
                if !known {
                    tracing::warn!("[Languages] Ignoring unknown language code in settings: {}", c);
                }
                known
            })
            .collect();
        Self { codes }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn is_supported(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    pub fn validate_source(&self, code: &str) -> Result<(), ValidationError> {
        if code == AUTO || self.is_supported(code) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedLanguage(code.to_string()))
        }
    }

    pub fn validate_target(&self, code: &str) -> Result<(), ValidationError> {
        if code == AUTO {
            return Err(ValidationError::AutoTarget);
        }
        if self.is_supported(code) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedLanguage(code.to_string()))
        }
    }

    /// Picker entries, with "Auto Detect" first unless `exclude_auto`.
    pub fn supported_languages(&self, exclude_auto: bool) -> Vec<LanguageEntry> {
        let mut entries = Vec::with_capacity(self.codes.len() + 1);
        if !exclude_auto {
            entries.push(LanguageEntry {
                code: AUTO.to_string(),
                name: "Auto Detect".to_string(),
                native_name: "Auto Detect".to_string(),
            });
        }
        for code in &self.codes {
            let name = language_name(code).unwrap_or(code.as_str()).to_string();
            let native = native_name(code).map(str::to_string).unwrap_or_else(|| name.clone());
            entries.push(LanguageEntry {
                code: code.clone(),
                name,
                native_name: native,
            });
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::settings::ServiceSettings;

    fn table() -> LanguageTable {
        LanguageTable::new(&ServiceSettings::default().languages)
    }

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("ko"), Some("Korean"));
        assert_eq!(language_name("en"), Some("English"));
        assert_eq!(language_name("xx"), None);
    }

    #[test]
    fn test_auto_only_valid_as_source() {
        let table = table();
        assert!(table.validate_source("auto").is_ok());
        assert_eq!(table.validate_target("auto"), Err(ValidationError::AutoTarget));
    }

    #[test]
    fn test_rejects_unknown_and_unconfigured_codes() {
        let table = table();
        assert_eq!(
            table.validate_source("xx"),
            Err(ValidationError::UnsupportedLanguage("xx".to_string()))
        );
        // Real ISO code, just not in the configured set
        assert!(table.validate_target("nl").is_err());
        assert!(table.validate_target("ko").is_ok());
    }

    #[test]
    fn test_unknown_codes_dropped_from_table() {
        let table = LanguageTable::new(&["en".to_string(), "zz".to_string(), " KO ".to_string()]);
        assert_eq!(table.codes(), &["en".to_string(), "ko".to_string()]);
    }

    #[test]
    fn test_supported_languages_entries() {
        let entries = table().supported_languages(false);
        assert_eq!(entries[0].code, "auto");
        let korean = entries.iter().find(|e| e.code == "ko").unwrap();
        assert_eq!(korean.name, "Korean");
        assert_eq!(korean.native_name, "한국어");
        assert_eq!(table().supported_languages(true).len(), 10);
    }
}
