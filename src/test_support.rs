//! Fakes and helpers shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::detection::{Detection, LanguageDetector};
use crate::core::model::{
    ComputeDevice, DeviceInfoProvider, EngineBackend, EngineError, EngineMemory, GenerationParams,
    InferenceEngine, LoadPhase, LoadPlan, LoadedModel, Tokenizer,
};
use crate::core::tasks::TaskId;
use crate::shared::error::DiagnosticsError;
use crate::shared::events::TranslationEvent;

/// One token per `char`.
pub struct FakeTokenizer;

impl Tokenizer for FakeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        Ok(text.chars().map(|c| c as u32).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError> {
        tokens
            .iter()
            .map(|&t| char::from_u32(t).ok_or_else(|| EngineError::Tokenizer(format!("bad token {}", t))))
            .collect()
    }
}

#[derive(Default)]
struct Shared {
    infer_delay: Mutex<Duration>,
    fail_next_infer: Mutex<Option<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    infer_calls: AtomicUsize,
    released: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    memory_mb: Mutex<Option<f64>>,
}

/// Instrumented backend. Its engine answers `translated:<user text>` and
/// records how many `infer` calls ever overlapped.
#[derive(Default)]
pub struct FakeBackend {
    load_delay: Mutex<Duration>,
    fail_next_load: Mutex<Option<EngineError>>,
    load_calls: AtomicUsize,
    active_loads: AtomicUsize,
    max_active_loads: AtomicUsize,
    shared: Arc<Shared>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(self, delay: Duration) -> Self {
        self.set_load_delay(delay);
        self
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = delay;
    }

    pub fn with_infer_delay(self, delay: Duration) -> Self {
        self.set_infer_delay(delay);
        self
    }

    pub fn set_infer_delay(&self, delay: Duration) {
        *self.shared.infer_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_load(&self, err: EngineError) {
        *self.fail_next_load.lock().unwrap() = Some(err);
    }

    pub fn fail_next_infer(&self, message: &str) {
        *self.shared.fail_next_infer.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_memory(&self, allocated_mb: Option<f64>) {
        *self.shared.memory_mb.lock().unwrap() = allocated_mb;
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.max_active_loads.load(Ordering::SeqCst)
    }

    pub fn infer_calls(&self) -> usize {
        self.shared.infer_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_infers(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.shared.last_prompt.lock().unwrap().clone()
    }
}

impl EngineBackend for FakeBackend {
    fn load(&self, _plan: &LoadPlan, progress: &dyn Fn(LoadPhase)) -> Result<LoadedModel, EngineError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_loads.fetch_max(now_active, Ordering::SeqCst);
        let result = self.run_load(progress);
        self.active_loads.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeBackend {
    fn run_load(&self, progress: &dyn Fn(LoadPhase)) -> Result<LoadedModel, EngineError> {
        if let Some(err) = self.fail_next_load.lock().unwrap().take() {
            return Err(err);
        }
        let step = *self.load_delay.lock().unwrap() / 5;
        for phase in [
            LoadPhase::TokenizerReady,
            LoadPhase::WeightsStaged,
            LoadPhase::DevicePlaced,
            LoadPhase::Quantized,
            LoadPhase::WarmedUp,
        ] {
            std::thread::sleep(step);
            progress(phase);
        }
        Ok(LoadedModel {
            engine: Box::new(FakeEngine {
                shared: self.shared.clone(),
            }),
            tokenizer: Arc::new(FakeTokenizer),
        })
    }
}

struct FakeEngine {
    shared: Arc<Shared>,
}

impl InferenceEngine for FakeEngine {
    fn infer(&mut self, tokens: &[u32], _params: &GenerationParams) -> Result<Vec<u32>, EngineError> {
        let shared = &self.shared;
        shared.infer_calls.fetch_add(1, Ordering::SeqCst);
        let now_active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *shared.infer_delay.lock().unwrap();
        std::thread::sleep(delay);

        let failure = shared.fail_next_infer.lock().unwrap().take();
        let decoded = FakeTokenizer.decode(tokens);
        shared.active.fetch_sub(1, Ordering::SeqCst);
        let prompt = decoded?;
        *shared.last_prompt.lock().unwrap() = Some(prompt.clone());

        if let Some(message) = failure {
            return Err(EngineError::Other(message));
        }
        let user = prompt.split_once("\n\n").map(|(_, user)| user).unwrap_or(&prompt);
        FakeTokenizer.encode(&format!("translated:{}", user))
    }

    fn memory_stats(&self) -> Result<EngineMemory, DiagnosticsError> {
        match *self.shared.memory_mb.lock().unwrap() {
            Some(allocated_mb) => Ok(EngineMemory {
                allocated_mb,
                reserved_mb: 0.0,
            }),
            None => Err(DiagnosticsError::Read("runtime counters unavailable".to_string())),
        }
    }

    fn release(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeDevices {
    pub devices: Vec<ComputeDevice>,
    pub memory_mb: Option<u64>,
}

impl Default for FakeDevices {
    fn default() -> Self {
        Self {
            devices: vec![ComputeDevice::Cpu, ComputeDevice::Gpu, ComputeDevice::Accelerated],
            memory_mb: Some(16_000),
        }
    }
}

impl DeviceInfoProvider for FakeDevices {
    fn available_devices(&self) -> Vec<ComputeDevice> {
        self.devices.clone()
    }

    fn available_memory_mb(&self) -> Option<u64> {
        self.memory_mb
    }
}

/// Always gives the same answer and counts how often it was asked.
pub struct CountingDetector {
    answer: Option<Detection>,
    calls: AtomicUsize,
}

impl CountingDetector {
    pub fn new(language: &str, confidence: f64) -> Self {
        Self {
            answer: Some(Detection {
                language: language.to_string(),
                confidence,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn undetermined() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageDetector for CountingDetector {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn detect(&self, _text: &str) -> Option<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// Everything currently queued on `rx`.
pub fn drain_events(rx: &mut UnboundedReceiver<TranslationEvent>) -> Vec<TranslationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Accumulates events from a subscription so tests can wait on one task
/// and still inspect everything seen so far.
pub struct EventLog {
    rx: UnboundedReceiver<TranslationEvent>,
    seen: Vec<TranslationEvent>,
}

impl EventLog {
    pub fn new(rx: UnboundedReceiver<TranslationEvent>) -> Self {
        Self { rx, seen: Vec::new() }
    }

    /// Wait (up to 5s) for the terminal event of `id`.
    pub async fn wait_terminal(&mut self, id: &TaskId) -> TranslationEvent {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(event) = self
                .seen
                .iter()
                .find(|e| e.is_terminal() && e.task_id() == Some(id.as_str()))
            {
                return event.clone();
            }
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => self.seen.push(event),
                Ok(None) => panic!("event stream closed before {} finished", id),
                Err(_) => panic!("timed out waiting for {} to finish; saw {:?}", id, self.seen),
            }
        }
    }

    /// Wait (up to 5s) until `id` emits `Started`.
    pub async fn wait_started(&mut self, id: &TaskId) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self
            .seen
            .iter()
            .any(|e| matches!(e, TranslationEvent::Started { task_id } if task_id == id.as_str()))
        {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => self.seen.push(event),
                _ => panic!("{} never started; saw {:?}", id, self.seen),
            }
        }
    }

    /// Pick up anything emitted since the last wait.
    pub fn sync(&mut self) {
        let fresh = drain_events(&mut self.rx);
        self.seen.extend(fresh);
    }

    pub fn for_task(&self, id: &TaskId) -> Vec<TranslationEvent> {
        self.seen
            .iter()
            .filter(|e| e.task_id() == Some(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[TranslationEvent] {
        &self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::settings::{ModelSettings, Quantization};

    #[test]
    fn test_failed_decode_does_not_count_as_overlap() {
        let backend = FakeBackend::new();
        let plan = LoadPlan {
            model_id: "fake".to_string(),
            device: ComputeDevice::Cpu,
            quantization: Quantization::None,
        };
        let mut model = backend.load(&plan, &|_| {}).unwrap();
        let params = GenerationParams::for_input(1, &ModelSettings::default());

        // Lone surrogate: not a valid char
        assert!(model.engine.infer(&[0xD800], &params).is_err());
        model.engine.infer(&FakeTokenizer.encode("Hi").unwrap(), &params).unwrap();

        assert_eq!(backend.infer_calls(), 2);
        assert_eq!(backend.max_concurrent_infers(), 1);
    }
}
