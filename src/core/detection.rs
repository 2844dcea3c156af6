//! Language detection with a bounded prefix cache.

pub mod cache;
pub mod detectors;

pub use cache::{normalize_key, DetectionCache, DetectionResult, DetectionStats};
pub use detectors::{BuiltinDetector, Detection, LanguageDetector, ScriptDetector, WhatlangDetector};
