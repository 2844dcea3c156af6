use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::core::model::ModelState;

/// Input rejected by `submit` before any task exists.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum ValidationError {
    #[error("Text cannot be empty")]
    EmptyText,

    #[error("Text too long: {length} chars (max {max})")]
    TextTooLong { length: usize, max: usize },

    #[error("Unsupported language code: {0}")]
    UnsupportedLanguage(String),

    #[error("Target language cannot be 'auto'")]
    AutoTarget,
}

/// Failure of `ModelLifecycle::load`. Leaves the lifecycle in `Error`
/// (except `InvalidState`, which leaves it untouched).
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum ModelLoadError {
    #[error("Model load timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Out of memory while loading model: {0}")]
    OutOfMemory(String),

    #[error("Model download failed: {0}")]
    DownloadFailure(String),

    #[error("Cannot load model while {0}")]
    InvalidState(ModelState),

    #[error("Model load aborted by unload")]
    Aborted,

    #[error("Model load failed: {0}")]
    Unknown(String),
}

/// Failure inside a single inference call. Never changes the model state.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum InferenceError {
    #[error("Model not loaded (state: {0})")]
    NotReady(ModelState),

    #[error("Inference failed: {0}")]
    Engine(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Best-effort diagnostics read failure. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticsError {
    #[error("Memory statistics not supported by engine")]
    Unsupported,

    #[error("Engine busy with inference")]
    EngineBusy,

    #[error("Failed to read runtime statistics: {0}")]
    Read(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Umbrella error returned by the public service surface.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Model not ready (state: {0})")]
    ModelNotReady(ModelState),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Inference(InferenceError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Translation service is shutting down")]
    ShuttingDown,

    #[error("Shutdown did not finish within {timeout_ms}ms")]
    ShutdownTimedOut { timeout_ms: u64 },

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<InferenceError> for TranslateError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::NotReady(state) => TranslateError::ModelNotReady(state),
            other => TranslateError::Inference(other),
        }
    }
}

impl From<tokio::task::JoinError> for TranslateError {
    fn from(err: tokio::task::JoinError) -> Self {
        TranslateError::Runtime(err.to_string())
    }
}

impl TranslateError {
    /// The kind the UI renders for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::Validation(_) => ErrorKind::Validation,
            TranslateError::ModelNotReady(_) => ErrorKind::ModelNotReady,
            TranslateError::ModelLoad(err) => err.kind(),
            TranslateError::Inference(InferenceError::Timeout { .. }) => ErrorKind::Timeout,
            TranslateError::Inference(InferenceError::NotReady(_)) => ErrorKind::ModelNotReady,
            TranslateError::Inference(InferenceError::Engine(msg)) => match ErrorKind::classify(msg) {
                ErrorKind::Unknown => ErrorKind::Inference,
                kind => kind,
            },
            TranslateError::Inference(InferenceError::Tokenizer(_)) => ErrorKind::Inference,
            TranslateError::Settings(_) => ErrorKind::Validation,
            TranslateError::ShuttingDown | TranslateError::ShutdownTimedOut { .. } => ErrorKind::Unknown,
            TranslateError::Runtime(msg) => ErrorKind::classify(msg),
        }
    }
}

impl ModelLoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelLoadError::Timeout { .. } => ErrorKind::Timeout,
            ModelLoadError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            ModelLoadError::DownloadFailure(_) => ErrorKind::Network,
            ModelLoadError::InvalidState(_) | ModelLoadError::Aborted => ErrorKind::ModelLoad,
            ModelLoadError::Unknown(msg) => match ErrorKind::classify(msg) {
                ErrorKind::Unknown => ErrorKind::ModelLoad,
                kind => kind,
            },
        }
    }
}

/// Failure category carried on every error event.
///
/// The frontend maps these to user-facing text; the core never produces
/// friendly messages itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "events.ts")]
pub enum ErrorKind {
    Validation,
    ModelNotReady,
    ModelLoad,
    Timeout,
    OutOfMemory,
    Network,
    Inference,
    Unknown,
}

const TIMEOUT_PATTERNS: &[&str] = &[r"timed? ?out", r"timeout", r"deadline exceeded"];
const MEMORY_PATTERNS: &[&str] = &[
    r"out of memory",
    r"\bOOM\b",
    r"MemoryError",
    r"cannot allocate",
    r"allocation failed",
];
const NETWORK_PATTERNS: &[&str] = &[
    r"connection",
    r"network",
    r"socket",
    r"dns",
    r"download",
];
const MODEL_PATTERNS: &[&str] = &[
    r"model not loaded",
    r"model.*not.*initiali[sz]ed",
    r"failed to load.*model",
    r"model.*failed",
];

struct Classifier {
    timeout: Regex,
    memory: Regex,
    network: Regex,
    model: Regex,
}

fn compile(patterns: &[&str]) -> Regex {
    Regex::new(&format!("(?i){}", patterns.join("|"))).expect("valid error classification regex")
}

fn classifier() -> &'static Classifier {
    static CLASSIFIER: OnceLock<Classifier> = OnceLock::new();
    CLASSIFIER.get_or_init(|| Classifier {
        timeout: compile(TIMEOUT_PATTERNS),
        memory: compile(MEMORY_PATTERNS),
        network: compile(NETWORK_PATTERNS),
        model: compile(MODEL_PATTERNS),
    })
}

impl ErrorKind {
    /// Classify an opaque engine message. Timeout wins over memory, memory
    /// over network, network over model.
    pub fn classify(message: &str) -> ErrorKind {
        let c = classifier();
        if c.timeout.is_match(message) {
            ErrorKind::Timeout
        } else if c.memory.is_match(message) {
            ErrorKind::OutOfMemory
        } else if c.network.is_match(message) {
            ErrorKind::Network
        } else if c.model.is_match(message) {
            ErrorKind::ModelLoad
        } else {
            ErrorKind::Unknown
        }
    }

    /// Whether trying the same request again can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::OutOfMemory
                | ErrorKind::Network
                | ErrorKind::Unknown
                | ErrorKind::ModelNotReady
        )
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;
