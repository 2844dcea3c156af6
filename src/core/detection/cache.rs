use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::detectors::LanguageDetector;
use crate::shared::settings::DetectionSettings;

/// Misses slower than this are logged.
const SLOW_DETECTION: Duration = Duration::from_millis(100);

/// Outcome of a detection. A low-confidence result still carries the best
/// guess; the caller decides whether to use it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub language: Option<String>,
    pub confidence: f64,
    pub low_confidence: bool,
}

impl DetectionResult {
    pub fn undetermined() -> Self {
        Self {
            language: None,
            confidence: 0.0,
            low_confidence: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, DetectionResult>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Trim, collapse whitespace runs, lowercase, then keep the first
/// `prefix_chars` code points.
pub fn normalize_key(text: &str, prefix_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(prefix_chars)
        .collect()
}

/// Bounded prefix cache in front of a detector. Evicts oldest-inserted.
pub struct DetectionCache {
    detector: Arc<dyn LanguageDetector>,
    settings: DetectionSettings,
    state: Mutex<CacheState>,
}

impl DetectionCache {
    pub fn new(detector: Arc<dyn LanguageDetector>, settings: DetectionSettings) -> Self {
        Self {
            detector,
            settings,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("[DetectionCache] Cache mutex poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Detect the language of `text`. Identical inputs (after
    /// normalization) give identical results, and only the first reaches
    /// the detector.
    pub fn detect(&self, text: &str) -> DetectionResult {
        let key = normalize_key(text, self.settings.prefix_chars);
        if key.chars().count() < self.settings.min_text_chars {
            tracing::debug!("[DetectionCache] Text too short for reliable detection");
            return DetectionResult::undetermined();
        }

        {
            let mut state = self.lock_state();
            if let Some(hit) = state.entries.get(&key).cloned() {
                state.hits += 1;
                return hit;
            }
        }

        let started = Instant::now();
        let result = match self.detector.detect(&key) {
            Some(detection) => DetectionResult {
                low_confidence: detection.confidence < self.settings.confidence_threshold,
                language: Some(detection.language),
                confidence: detection.confidence,
            },
            None => DetectionResult::undetermined(),
        };
        let elapsed = started.elapsed();
        if elapsed > SLOW_DETECTION {
            tracing::warn!(
                "[DetectionCache] {} detector took {}ms on cache miss",
                self.detector.name(),
                elapsed.as_millis()
            );
        }

        let mut state = self.lock_state();
        state.misses += 1;
        // Another thread may have stored this key while we were detecting
        if let Some(existing) = state.entries.get(&key) {
            return existing.clone();
        }
        while state.entries.len() >= self.settings.cache_capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, result.clone());
        result
    }

    /// True if `text` is `expected` with at least `threshold` confidence.
    pub fn is_language(&self, text: &str, expected: &str, threshold: f64) -> bool {
        let result = self.detect(text);
        let matches = result.language.as_deref() == Some(expected) && result.confidence >= threshold;
        if !matches {
            tracing::debug!(
                "[DetectionCache] Language mismatch: expected {}, detected {:?} ({:.2})",
                expected,
                result.language,
                result.confidence
            );
        }
        matches
    }

    pub fn stats(&self) -> DetectionStats {
        let state = self.lock_state();
        DetectionStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.order.clear();
    }
}
