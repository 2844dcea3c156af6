//! Capability traits for the opaque model runtime.
//!
//! The core never runs a forward pass itself. A backend turns a `LoadPlan`
//! into a `LoadedModel`; the lifecycle owns the result and serializes every
//! call into it.

use std::sync::Arc;

use thiserror::Error;

use super::device::ComputeDevice;
use crate::shared::error::{DiagnosticsError, ErrorKind, InferenceError, ModelLoadError};
use crate::shared::settings::{ModelSettings, Quantization};

/// Lower bound on the generation budget for very short inputs.
pub const MIN_NEW_TOKENS: usize = 50;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("tokenizer: {0}")]
    Tokenizer(String),

    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for ModelLoadError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OutOfMemory(msg) => ModelLoadError::OutOfMemory(msg),
            EngineError::Download(msg) => ModelLoadError::DownloadFailure(msg),
            EngineError::Tokenizer(msg) => ModelLoadError::Unknown(format!("tokenizer: {}", msg)),
            // Backends often only have a message; recover what we can from it
            EngineError::Other(msg) => match ErrorKind::classify(&msg) {
                ErrorKind::OutOfMemory => ModelLoadError::OutOfMemory(msg),
                ErrorKind::Network => ModelLoadError::DownloadFailure(msg),
                _ => ModelLoadError::Unknown(msg),
            },
        }
    }
}

impl From<EngineError> for InferenceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Tokenizer(msg) => InferenceError::Tokenizer(msg),
            other => InferenceError::Engine(other.to_string()),
        }
    }
}

/// Load step reported by a backend, mapped to a fixed progress milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    TokenizerReady,
    WeightsStaged,
    DevicePlaced,
    Quantized,
    WarmedUp,
}

impl LoadPhase {
    pub fn percent(self) -> u8 {
        match self {
            LoadPhase::TokenizerReady => 10,
            LoadPhase::WeightsStaged => 30,
            LoadPhase::DevicePlaced => 60,
            LoadPhase::Quantized => 90,
            LoadPhase::WarmedUp => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            LoadPhase::TokenizerReady => "Tokenizer loaded",
            LoadPhase::WeightsStaged => "Model weights staged",
            LoadPhase::DevicePlaced => "Model placed on device",
            LoadPhase::Quantized => "Quantization applied",
            LoadPhase::WarmedUp => "Model ready!",
        }
    }
}

/// What the lifecycle asks a backend to load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub model_id: String,
    pub device: ComputeDevice,
    pub quantization: Quantization,
}

/// Greedy decoding parameters for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub repetition_penalty: f32,
    pub no_repeat_ngram_size: usize,
    pub do_sample: bool,
}

impl GenerationParams {
    /// Budget scales with the prompt: three new tokens per input token,
    /// clamped to `[MIN_NEW_TOKENS, settings.max_new_tokens]`.
    pub fn for_input(input_tokens: usize, settings: &ModelSettings) -> Self {
        let scaled = input_tokens.saturating_mul(3).min(settings.max_new_tokens);
        Self {
            max_new_tokens: scaled.max(MIN_NEW_TOKENS),
            repetition_penalty: settings.repetition_penalty,
            no_repeat_ngram_size: settings.no_repeat_ngram_size,
            do_sample: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineMemory {
    pub allocated_mb: f64,
    pub reserved_mb: f64,
}

/// Stateless and reentrant.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError>;

    /// Render a system + user turn in the model's chat format. Models
    /// without a template get the two parts separated by a blank line.
    fn apply_chat_template(&self, system: &str, user: &str) -> String {
        format!("{}\n\n{}", system, user)
    }
}

/// A loaded model. Not assumed safe for concurrent use, hence `&mut self`
/// and no `Sync` bound.
pub trait InferenceEngine: Send {
    /// Returns only the newly generated tokens.
    fn infer(&mut self, tokens: &[u32], params: &GenerationParams) -> Result<Vec<u32>, EngineError>;

    fn memory_stats(&self) -> Result<EngineMemory, DiagnosticsError> {
        Err(DiagnosticsError::Unsupported)
    }

    /// Free device memory. Called once, on unload.
    fn release(&mut self) {}
}

pub struct LoadedModel {
    pub engine: Box<dyn InferenceEngine>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

pub trait EngineBackend: Send + Sync {
    /// Blocking. Implementations call `progress` as each phase completes.
    fn load(&self, plan: &LoadPlan, progress: &dyn Fn(LoadPhase)) -> Result<LoadedModel, EngineError>;
}
