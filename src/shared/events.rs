use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::error::ErrorKind;

/// Everything the core reports outward. Emission is one-way: listeners
/// cannot influence a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "payload")] // Tagged enum for easier frontend parsing
#[ts(export, export_to = "events.ts")]
pub enum TranslationEvent {
    #[serde(rename = "translation://started")]
    Started { task_id: String },

    #[serde(rename = "translation://progress")]
    Progress {
        task_id: String,
        percent: u8,
        message: String,
    },

    #[serde(rename = "translation://result")]
    Result {
        task_id: String,
        translated_text: String,
        resolved_source_lang: String,
        #[ts(type = "number")]
        duration_ms: u64,
    },

    #[serde(rename = "translation://error")]
    Error {
        task_id: String,
        kind: ErrorKind,
        message: String,
    },

    #[serde(rename = "translation://cancelled")]
    Cancelled { task_id: String },

    #[serde(rename = "model://progress")]
    ModelProgress { percent: u8, message: String },

    #[serde(rename = "model://ready")]
    ModelReady,

    #[serde(rename = "model://failed")]
    ModelFailed { kind: ErrorKind, message: String },
}

impl TranslationEvent {
    /// Channel name used when forwarding to a frontend.
    pub fn channel(&self) -> &'static str {
        match self {
            TranslationEvent::Started { .. } => "translation://started",
            TranslationEvent::Progress { .. } => "translation://progress",
            TranslationEvent::Result { .. } => "translation://result",
            TranslationEvent::Error { .. } => "translation://error",
            TranslationEvent::Cancelled { .. } => "translation://cancelled",
            TranslationEvent::ModelProgress { .. } => "model://progress",
            TranslationEvent::ModelReady => "model://ready",
            TranslationEvent::ModelFailed { .. } => "model://failed",
        }
    }

    /// Task the event belongs to, `None` for model lifecycle events.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TranslationEvent::Started { task_id }
            | TranslationEvent::Progress { task_id, .. }
            | TranslationEvent::Result { task_id, .. }
            | TranslationEvent::Error { task_id, .. }
            | TranslationEvent::Cancelled { task_id } => Some(task_id),
            _ => None,
        }
    }

    /// True for the last event a task ever produces.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranslationEvent::Result { .. }
                | TranslationEvent::Error { .. }
                | TranslationEvent::Cancelled { .. }
        )
    }
}
