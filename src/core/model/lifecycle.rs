use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use super::device::{choose_quantization, select_device, ComputeDevice, DeviceInfoProvider};
use super::engine::{EngineBackend, GenerationParams, InferenceEngine, LoadPlan, LoadPhase, Tokenizer};
use crate::shared::emit::EventHub;
use crate::shared::error::{DiagnosticsError, InferenceError, ModelLoadError};
use crate::shared::events::TranslationEvent;
use crate::shared::languages::language_name;
use crate::shared::settings::ModelSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
    Error,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
            ModelState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Best-effort memory snapshot. Zeroes mean "unknown".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub device: Option<ComputeDevice>,
    pub state: ModelState,
    pub is_loaded: bool,
    pub allocated_mb: f64,
    pub reserved_mb: f64,
}

struct EngineSlot {
    epoch: u64,
    engine: Box<dyn InferenceEngine>,
}

struct Inner {
    state: ModelState,
    device: Option<ComputeDevice>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    last_error: Option<ModelLoadError>,
}

/// Forwards backend phases as monotonic `ModelProgress` events until the
/// load it belongs to is superseded.
struct ProgressForwarder {
    events: Arc<EventHub>,
    epoch: Arc<AtomicU64>,
    load_epoch: u64,
    highest: AtomicU8,
}

impl ProgressForwarder {
    fn report(&self, percent: u8, message: &str) {
        if self.epoch.load(Ordering::SeqCst) != self.load_epoch {
            return;
        }
        let previous = self.highest.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            tracing::info!("[ModelLifecycle] Model loading: {}% - {}", percent, message);
            self.events.emit(TranslationEvent::ModelProgress {
                percent,
                message: message.to_string(),
            });
        }
    }
}

/// Chat prompt for one translation request.
pub fn build_prompt(tokenizer: &dyn Tokenizer, text: &str, target_language: &str) -> String {
    let system = format!(
        "Translate the user's text to {}. Output only the final translation.",
        target_language
    );
    tokenizer.apply_chat_template(&system, text)
}

/// Owns the model state machine and the engine handle.
///
/// Every engine call goes through one async mutex, so at most one `infer`
/// runs at a time no matter how many workers are waiting. The state lives
/// behind a separate sync mutex so readers never wait on inference.
pub struct ModelLifecycle {
    settings: ModelSettings,
    backend: Arc<dyn EngineBackend>,
    devices: Arc<dyn DeviceInfoProvider>,
    events: Arc<EventHub>,
    inner: Mutex<Inner>,
    epoch: Arc<AtomicU64>,
    engine: Arc<AsyncMutex<Option<EngineSlot>>>,
    // Held by the blocking backend call itself, so a load that timed out or
    // was aborted still keeps the next one waiting until the backend returns.
    load_gate: Arc<AsyncMutex<()>>,
}

impl ModelLifecycle {
    pub fn new(
        settings: ModelSettings,
        backend: Arc<dyn EngineBackend>,
        devices: Arc<dyn DeviceInfoProvider>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            settings,
            backend,
            devices,
            events,
            inner: Mutex::new(Inner {
                state: ModelState::Unloaded,
                device: None,
                tokenizer: None,
                last_error: None,
            }),
            epoch: Arc::new(AtomicU64::new(0)),
            engine: Arc::new(AsyncMutex::new(None)),
            load_gate: Arc::new(AsyncMutex::new(())),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("[ModelLifecycle] State mutex poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }

    pub fn state(&self) -> ModelState {
        self.lock_inner().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    pub fn device(&self) -> Option<ComputeDevice> {
        self.lock_inner().device
    }

    /// Failure of the most recent load, cleared when a new load starts.
    pub fn last_error(&self) -> Option<ModelLoadError> {
        self.lock_inner().last_error.clone()
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Load the model. Allowed from `Unloaded` or `Error`; a second
    /// concurrent call gets `InvalidState(Loading)`. Never retries.
    ///
    /// At most one backend load runs at a time. If an earlier attempt gave
    /// up while its backend call kept running, this one waits for it within
    /// its own timeout.
    pub async fn load(&self) -> Result<(), ModelLoadError> {
        let load_epoch = {
            let mut inner = self.lock_inner();
            match inner.state {
                ModelState::Unloaded | ModelState::Error => {}
                state => return Err(ModelLoadError::InvalidState(state)),
            }
            inner.state = ModelState::Loading;
            inner.last_error = None;
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        let available = self.devices.available_devices();
        let device = select_device(self.settings.device, &available);
        let quantization = choose_quantization(&self.settings, self.devices.available_memory_mb());
        let plan = LoadPlan {
            model_id: self.settings.model_id.clone(),
            device,
            quantization,
        };
        tracing::info!(
            "[ModelLifecycle] Loading {} on {} (quantization: {:?})",
            plan.model_id,
            plan.device,
            plan.quantization
        );

        let forwarder = Arc::new(ProgressForwarder {
            events: self.events.clone(),
            epoch: self.epoch.clone(),
            load_epoch,
            highest: AtomicU8::new(0),
        });

        let timeout = self.settings.load_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let timed_out = ModelLoadError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };

        let outcome = match tokio::time::timeout_at(deadline, self.load_gate.clone().lock_owned()).await {
            Err(_) => {
                tracing::warn!("[ModelLifecycle] Previous backend load still running");
                Err(timed_out)
            }
            Ok(gate) => {
                let backend = self.backend.clone();
                let phase_sink = forwarder.clone();
                let mut handle = tokio::task::spawn_blocking(move || {
                    let _gate = gate;
                    backend.load(&plan, &|phase: LoadPhase| phase_sink.report(phase.percent(), phase.message()))
                });

                let waited = tokio::time::timeout_at(deadline, &mut handle).await;
                match waited {
                    Ok(Ok(Ok(model))) => Ok(model),
                    Ok(Ok(Err(e))) => Err(ModelLoadError::from(e)),
                    Ok(Err(join_err)) => Err(ModelLoadError::Unknown(format!("load task failed: {}", join_err))),
                    Err(_) => {
                        // The backend keeps running; release whatever it eventually produces.
                        tokio::spawn(async move {
                            if let Ok(Ok(mut model)) = handle.await {
                                tracing::debug!("[ModelLifecycle] Releasing model from timed-out load");
                                let _ = tokio::task::spawn_blocking(move || model.engine.release()).await;
                            }
                        });
                        Err(timed_out)
                    }
                }
            }
        };

        match outcome {
            Ok(model) => {
                let (discarded, replaced) = {
                    let mut slot = self.engine.lock().await;
                    let mut inner = self.lock_inner();
                    if self.epoch.load(Ordering::SeqCst) != load_epoch {
                        (Some(model.engine), None)
                    } else {
                        let replaced = slot.replace(EngineSlot {
                            epoch: load_epoch,
                            engine: model.engine,
                        });
                        inner.state = ModelState::Loaded;
                        inner.device = Some(device);
                        inner.tokenizer = Some(model.tokenizer);
                        (None, replaced)
                    }
                };

                if let Some(mut previous) = replaced {
                    tracing::warn!("[ModelLifecycle] Releasing engine left over from an earlier load");
                    let _ = tokio::task::spawn_blocking(move || previous.engine.release()).await;
                }

                if let Some(mut engine) = discarded {
                    tracing::info!("[ModelLifecycle] Load superseded by unload, discarding model");
                    let _ = tokio::task::spawn_blocking(move || engine.release()).await;
                    return Err(ModelLoadError::Aborted);
                }

                forwarder.report(LoadPhase::WarmedUp.percent(), LoadPhase::WarmedUp.message());
                tracing::info!("[ModelLifecycle] Model initialization complete. Device: {}", device);
                self.events.emit(TranslationEvent::ModelReady);
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.lock_inner();
                    if self.epoch.load(Ordering::SeqCst) != load_epoch {
                        return Err(ModelLoadError::Aborted);
                    }
                    // Silence any late progress from a backend still running
                    self.epoch.fetch_add(1, Ordering::SeqCst);
                    inner.state = ModelState::Error;
                    inner.last_error = Some(err.clone());
                }
                tracing::error!("[ModelLifecycle] Model initialization failed: {}", err);
                self.events.emit(TranslationEvent::ModelFailed {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Release the engine and return to `Unloaded`. Idempotent. An in-flight
    /// load is aborted; an in-flight inference finishes first.
    ///
    /// The release runs on its own task, so it still happens if the caller
    /// stops waiting (e.g. a shutdown deadline passing mid-inference).
    pub async fn unload(&self) {
        let (previous, unload_epoch) = {
            let mut inner = self.lock_inner();
            let previous = inner.state;
            inner.state = ModelState::Unloaded;
            inner.tokenizer = None;
            inner.device = None;
            (previous, self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let engine = self.engine.clone();
        let release = tokio::spawn(async move {
            let released = {
                let mut slot = engine.lock().await;
                // A newer load may have installed its engine while we waited
                let stale = slot.as_ref().is_some_and(|current| current.epoch < unload_epoch);
                if stale {
                    slot.take()
                } else {
                    None
                }
            };
            match released {
                Some(mut slot) => {
                    let _ = tokio::task::spawn_blocking(move || slot.engine.release()).await;
                    tracing::info!("[ModelLifecycle] Model unloaded and memory cleared");
                    true
                }
                None => false,
            }
        });

        let released = release.await.unwrap_or(false);
        if !released && previous != ModelState::Unloaded {
            tracing::info!("[ModelLifecycle] Unloaded from {} state", previous);
        }
    }

    /// Run one exclusive engine call. Callers queue on the engine lock
    /// rather than fail when another call is running.
    pub async fn infer(
        &self,
        tokens: Vec<u32>,
        params: GenerationParams,
    ) -> Result<Vec<u32>, InferenceError> {
        let state = self.state();
        if state != ModelState::Loaded {
            return Err(InferenceError::NotReady(state));
        }

        let mut guard = self.engine.clone().lock_owned().await;

        // Unloaded while we were queued
        let state = self.state();
        if state != ModelState::Loaded {
            return Err(InferenceError::NotReady(state));
        }

        // The guard moves into the blocking call so the lock is held until
        // the engine returns, even if this future is dropped.
        let result = tokio::task::spawn_blocking(move || match guard.as_mut() {
            Some(slot) => slot.engine.infer(&tokens, &params).map_err(InferenceError::from),
            None => Err(InferenceError::NotReady(ModelState::Unloaded)),
        })
        .await;

        match result {
            Ok(output) => output,
            Err(join_err) => Err(InferenceError::Engine(format!("inference task failed: {}", join_err))),
        }
    }

    /// Tokenize, infer and decode one request, reporting 30/50/90/100.
    pub async fn translate<F>(&self, text: &str, target_lang: &str, progress: F) -> Result<String, InferenceError>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        let tokenizer = {
            let inner = self.lock_inner();
            match (&inner.tokenizer, inner.state) {
                (Some(tokenizer), ModelState::Loaded) => tokenizer.clone(),
                (_, state) => return Err(InferenceError::NotReady(state)),
            }
        };

        let target_name = language_name(target_lang).unwrap_or(target_lang);
        let prompt = build_prompt(tokenizer.as_ref(), text, target_name);

        progress(30, "Tokenizing input...");
        let tokens = tokenizer.encode(&prompt)?;
        let params = GenerationParams::for_input(tokens.len(), &self.settings);

        progress(50, "Translating...");
        let output = self.infer(tokens, params).await?;

        progress(90, "Decoding output...");
        let translation = tokenizer.decode(&output)?;

        progress(100, "Translation complete!");
        Ok(translation.trim().to_string())
    }

    /// Never fails and never waits behind an inference call. Read failures
    /// are logged and reported as zeroes.
    pub fn memory_usage(&self) -> MemoryUsage {
        let (state, device) = {
            let inner = self.lock_inner();
            (inner.state, inner.device)
        };

        let stats = match self.engine.try_lock() {
            Ok(slot) => match slot.as_ref() {
                Some(slot) => slot.engine.memory_stats(),
                None => Ok(Default::default()),
            },
            Err(_) => Err(DiagnosticsError::EngineBusy),
        };

        let stats = match stats {
            Ok(stats) => stats,
            Err(DiagnosticsError::Unsupported) => {
                tracing::debug!("[ModelLifecycle] Memory stats unavailable for this engine");
                Default::default()
            }
            Err(e) => {
                tracing::warn!("[ModelLifecycle] Failed to read memory usage: {}", e);
                Default::default()
            }
        };

        MemoryUsage {
            device,
            state,
            is_loaded: state == ModelState::Loaded,
            allocated_mb: stats.allocated_mb,
            reserved_mb: stats.reserved_mb,
        }
    }
}
