pub mod core;
pub mod shared;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::runtime::Handle;

pub use crate::core::detection::{
    BuiltinDetector, DetectionCache, DetectionResult, LanguageDetector, ScriptDetector, WhatlangDetector,
};
pub use crate::core::model::{
    ComputeDevice, DeviceInfoProvider, EngineBackend, InferenceEngine, ModelLifecycle, ModelState,
    SystemDeviceInfo, Tokenizer,
};
pub use crate::core::tasks::{CancelOutcome, SessionId, TaskId, TaskStatus};
pub use crate::core::translator::{SubmitRequest, TranslationService};
pub use crate::shared::emit::{EventHub, EventSink};
pub use crate::shared::events::TranslationEvent;
pub use crate::shared::settings::ServiceSettings;
pub use crate::shared::{ErrorKind, TranslateError, TranslateResult};

use crate::shared::error::ModelLoadError;
use crate::shared::logging::init_logging;

/// Assembles one translator: settings, event hub, model lifecycle,
/// detection cache and the service on top. Replaces process-wide
/// singletons; drop it after `shutdown`.
pub struct TranslatorContext {
    settings: ServiceSettings,
    events: Arc<EventHub>,
    lifecycle: Arc<ModelLifecycle>,
    detection: Arc<DetectionCache>,
    service: TranslationService,
}

pub struct ContextBuilder {
    settings: ServiceSettings,
    backend: Arc<dyn EngineBackend>,
    devices: Option<Arc<dyn DeviceInfoProvider>>,
    detector: Option<Arc<dyn LanguageDetector>>,
    runtime: Option<Handle>,
}

impl ContextBuilder {
    /// Host info provider. Defaults to `SystemDeviceInfo`.
    pub fn devices(mut self, devices: Arc<dyn DeviceInfoProvider>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Language detector. Defaults to whatlang restricted to the
    /// configured languages.
    pub fn detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Runtime that timers and workers run on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> TranslateResult<TranslatorContext> {
        let settings = self.settings;
        settings.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| TranslateError::Runtime(e.to_string()))?,
        };
        let devices = self.devices.unwrap_or_else(|| Arc::new(SystemDeviceInfo));
        let detector = self.detector.unwrap_or_else(|| {
            Arc::new(BuiltinDetector::from(WhatlangDetector::new(&settings.languages)))
        });

        let events = Arc::new(EventHub::new());
        let lifecycle = Arc::new(ModelLifecycle::new(
            settings.model.clone(),
            self.backend,
            devices,
            events.clone(),
        ));
        let detection = Arc::new(DetectionCache::new(detector, settings.detection.clone()));
        let service = TranslationService::new(
            &settings,
            lifecycle.clone(),
            detection.clone(),
            events.clone(),
            runtime,
        );

        Ok(TranslatorContext {
            settings,
            events,
            lifecycle,
            detection,
            service,
        })
    }
}

impl TranslatorContext {
    pub fn builder(settings: ServiceSettings, backend: Arc<dyn EngineBackend>) -> ContextBuilder {
        ContextBuilder {
            settings,
            backend,
            devices: None,
            detector: None,
            runtime: None,
        }
    }

    /// Load settings from the config dir, install logging and build with
    /// defaults. Falls back to default settings if the file is unusable.
    pub async fn from_config(backend: Arc<dyn EngineBackend>) -> TranslateResult<Self> {
        let settings = ServiceSettings::load().await.unwrap_or_else(|e| {
            eprintln!("Failed to load settings: {}", e);
            ServiceSettings::default()
        });
        init_logging(&settings.logging);
        Self::builder(settings, backend).build()
    }

    pub async fn load_model(&self) -> Result<(), ModelLoadError> {
        self.lifecycle.load().await
    }

    pub fn service(&self) -> &TranslationService {
        &self.service
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    pub fn detection(&self) -> &Arc<DetectionCache> {
        &self.detection
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Forward every event to the app's windows.
    #[cfg(feature = "tauri")]
    pub fn forward_to_tauri<R: tauri::Runtime>(&self, app: tauri::AppHandle<R>) {
        self.events.add_sink(Arc::new(shared::emit::TauriSink::new(app)));
    }

    pub async fn shutdown(&self) -> TranslateResult<()> {
        self.service.shutdown().await
    }
}
