use crate::core::tasks::SessionId;
use crate::shared::error::ValidationError;
use crate::shared::languages::LanguageTable;

/// What a caller hands to `TranslationService::submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub debounce: bool,
    pub session: SessionId,
}

impl SubmitRequest {
    /// Immediate request in the default session.
    pub fn new(text: impl Into<String>, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            debounce: false,
            session: SessionId::default(),
        }
    }

    pub fn debounce(mut self, debounce: bool) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn session(mut self, session: impl Into<SessionId>) -> Self {
        self.session = session.into();
        self
    }

    /// Checked synchronously in `submit`; a failing request never becomes a task.
    pub fn validate(&self, languages: &LanguageTable, max_text_length: usize) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let length = self.text.chars().count();
        if length > max_text_length {
            return Err(ValidationError::TextTooLong {
                length,
                max: max_text_length,
            });
        }
        languages.validate_source(&self.source_lang)?;
        languages.validate_target(&self.target_lang)?;
        Ok(())
    }
}
