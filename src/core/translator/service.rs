use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::request::SubmitRequest;
use crate::core::detection::DetectionCache;
use crate::core::model::{ModelLifecycle, ModelState};
use crate::core::tasks::{
    CancelOutcome, CancelToken, SessionId, TaskId, TaskRegistry, TaskStatus, TranslationRequest,
};
use crate::shared::emit::EventHub;
use crate::shared::error::{InferenceError, TranslateError, TranslateResult};
use crate::shared::events::TranslationEvent;
use crate::shared::languages::{LanguageTable, AUTO};
use crate::shared::settings::{PerformanceSettings, ServiceSettings};

struct DebounceTimer {
    task_id: TaskId,
    handle: JoinHandle<()>,
}

/// Everything that "start timer", "cancel on new input" and "timer fires"
/// touch. One lock, so those three never interleave.
#[derive(Default)]
struct Coordinator {
    registry: TaskRegistry,
    timers: HashMap<SessionId, DebounceTimer>,
    shutting_down: bool,
}

enum Start {
    Skip,
    NotReady(ModelState),
    Run(Arc<TranslationRequest>, CancelToken),
}

enum Outcome {
    Translated { text: String, source_lang: String },
    Cancelled,
    Failed(TranslateError),
}

struct ServiceInner {
    performance: PerformanceSettings,
    fallback_language: String,
    languages: LanguageTable,
    lifecycle: Arc<ModelLifecycle>,
    detection: Arc<DetectionCache>,
    events: Arc<EventHub>,
    workers: Arc<Semaphore>,
    coordinator: Mutex<Coordinator>,
    runtime: Handle,
}

/// Debounces, dispatches and cancels translation work.
///
/// `submit` and `cancel` are synchronous and never wait on a worker.
/// Workers run on the captured runtime, bounded by a semaphore of
/// `max_concurrency` permits; inference itself is further serialized by
/// the model lifecycle. Results only ever leave through the event hub.
#[derive(Clone)]
pub struct TranslationService {
    inner: Arc<ServiceInner>,
}

impl TranslationService {
    pub fn new(
        settings: &ServiceSettings,
        lifecycle: Arc<ModelLifecycle>,
        detection: Arc<DetectionCache>,
        events: Arc<EventHub>,
        runtime: Handle,
    ) -> Self {
        let performance = settings.performance.clone();
        tracing::info!(
            "[TranslationService] Initialized with {}ms debounce, {} max workers",
            performance.debounce_ms,
            performance.max_concurrency
        );
        Self {
            inner: Arc::new(ServiceInner {
                workers: Arc::new(Semaphore::new(performance.max_concurrency)),
                performance,
                fallback_language: settings.detection.fallback_language.clone(),
                languages: LanguageTable::new(&settings.languages),
                lifecycle,
                detection,
                events,
                coordinator: Mutex::new(Coordinator::default()),
                runtime,
            }),
        }
    }

    /// Validate and enqueue a request.
    ///
    /// Invalid input fails here and never becomes a task. A debounced
    /// request replaces the session's previous debounced one; an immediate
    /// request cancels every not-yet-running task of its session first.
    pub fn submit(&self, request: SubmitRequest) -> TranslateResult<TaskId> {
        let inner = &self.inner;
        request.validate(&inner.languages, inner.performance.max_text_length)?;

        let SubmitRequest {
            text,
            source_lang,
            target_lang,
            debounce,
            session,
        } = request;
        let task_id = TaskId::new();

        let cancelled = {
            let mut coord = inner.lock_coordinator();
            if coord.shutting_down {
                return Err(TranslateError::ShuttingDown);
            }

            let cancelled = if debounce {
                match coord.timers.remove(&session) {
                    Some(timer) => {
                        timer.handle.abort();
                        match coord.registry.cancel(&timer.task_id) {
                            CancelOutcome::Cancelled => vec![timer.task_id],
                            _ => Vec::new(),
                        }
                    }
                    None => Vec::new(),
                }
            } else {
                if let Some(timer) = coord.timers.remove(&session) {
                    timer.handle.abort();
                }
                coord.registry.cancel_pending_in_session(&session, None)
            };

            coord.registry.insert(TranslationRequest {
                task_id: task_id.clone(),
                session: session.clone(),
                source_text: text,
                source_lang,
                target_lang,
                submitted_at: Instant::now(),
                debounce,
            });

            if debounce {
                let handle = inner.runtime.spawn(inner.clone().fire_after(
                    session.clone(),
                    task_id.clone(),
                    inner.performance.debounce(),
                ));
                coord.timers.insert(
                    session,
                    DebounceTimer {
                        task_id: task_id.clone(),
                        handle,
                    },
                );
            } else {
                inner.dispatch(task_id.clone());
            }
            cancelled
        };

        tracing::debug!(
            "[TranslationService] Submitted {} (debounce: {}, superseded: {})",
            task_id,
            debounce,
            cancelled.len()
        );
        inner.emit_cancelled(&cancelled);
        Ok(task_id)
    }

    /// Cancel one task. Pending tasks end immediately; a running task is
    /// flagged and its output discarded when the engine returns.
    pub fn cancel(&self, task_id: &TaskId) -> CancelOutcome {
        let outcome = {
            let mut coord = self.inner.lock_coordinator();
            let outcome = coord.registry.cancel(task_id);
            if outcome == CancelOutcome::Cancelled {
                coord.timers.retain(|_, timer| {
                    if timer.task_id == *task_id {
                        timer.handle.abort();
                        false
                    } else {
                        true
                    }
                });
            }
            outcome
        };

        tracing::debug!("[TranslationService] Cancel {}: {:?}", task_id, outcome);
        if outcome == CancelOutcome::Cancelled {
            self.inner.emit_cancelled(std::slice::from_ref(task_id));
        }
        outcome
    }

    /// Cancel every live task. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let (live, cancelled) = {
            let mut coord = self.inner.lock_coordinator();
            for (_, timer) in coord.timers.drain() {
                timer.handle.abort();
            }
            let live = coord.registry.len();
            (live, coord.registry.cancel_all())
        };

        if live > 0 {
            tracing::info!("[TranslationService] Cancelled {} active tasks", live);
        }
        self.inner.emit_cancelled(&cancelled);
        live
    }

    /// Stop accepting work, cancel everything, wait for workers and any
    /// in-flight inference, then unload the model. Bounded by
    /// `shutdown_timeout_ms`. A second call returns immediately.
    pub async fn shutdown(&self) -> TranslateResult<()> {
        {
            let mut coord = self.inner.lock_coordinator();
            if coord.shutting_down {
                return Ok(());
            }
            coord.shutting_down = true;
        }
        tracing::info!("[TranslationService] Shutting down...");

        self.cancel_all();

        let limit = self.inner.performance.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + limit;
        let max = u32::try_from(self.inner.performance.max_concurrency).unwrap_or(u32::MAX);

        let drained = tokio::time::timeout_at(deadline, self.inner.workers.acquire_many(max)).await;
        let mut timed_out = drained.is_err();
        self.inner.workers.close();
        drop(drained);

        if tokio::time::timeout_at(deadline, self.inner.lifecycle.unload()).await.is_err() {
            timed_out = true;
        }

        if timed_out {
            tracing::warn!(
                "[TranslationService] Shutdown did not finish within {}ms",
                limit.as_millis()
            );
            return Err(TranslateError::ShutdownTimedOut {
                timeout_ms: limit.as_millis() as u64,
            });
        }
        tracing::info!("[TranslationService] Shutdown complete");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock_coordinator().shutting_down
    }

    /// Current or recent status. `None` for unknown or long-forgotten ids.
    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.inner.lock_coordinator().registry.status(task_id)
    }

    pub fn active_tasks(&self) -> Vec<(TaskId, TaskStatus)> {
        self.inner.lock_coordinator().registry.active()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TranslationEvent> {
        self.inner.events.subscribe()
    }

    /// Register a listener. It runs on its own task and cannot stall workers.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(TranslationEvent) + Send + 'static,
    {
        self.inner.events.on_event(&self.inner.runtime, callback);
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.inner.lifecycle
    }
}

impl ServiceInner {
    fn lock_coordinator(&self) -> MutexGuard<'_, Coordinator> {
        match self.coordinator.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("[TranslationService] Coordinator mutex poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }

    fn emit_cancelled(&self, ids: &[TaskId]) {
        for id in ids {
            self.events.emit(TranslationEvent::Cancelled {
                task_id: id.to_string(),
            });
        }
    }

    fn dispatch(self: &Arc<Self>, task_id: TaskId) {
        self.runtime.spawn(self.clone().run_task(task_id));
    }

    async fn fire_after(self: Arc<Self>, session: SessionId, task_id: TaskId, delay: Duration) {
        tokio::time::sleep(delay).await;

        let cancelled = {
            let mut coord = self.lock_coordinator();
            match coord.timers.get(&session) {
                Some(timer) if timer.task_id == task_id => {}
                // Superseded between the sleep ending and taking the lock
                _ => return,
            }
            coord.timers.remove(&session);
            if coord.shutting_down || !coord.registry.is_pending(&task_id) {
                return;
            }
            let cancelled = coord.registry.cancel_pending_in_session(&session, Some(&task_id));
            self.dispatch(task_id.clone());
            cancelled
        };

        tracing::debug!("[TranslationService] Debounce fired for {}", task_id);
        self.emit_cancelled(&cancelled);
    }

    async fn run_task(self: Arc<Self>, task_id: TaskId) {
        let _permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let cancelled = {
                    let mut coord = self.lock_coordinator();
                    coord.registry.is_pending(&task_id) && coord.registry.finish(&task_id, TaskStatus::Cancelled)
                };
                if cancelled {
                    self.emit_cancelled(std::slice::from_ref(&task_id));
                }
                return;
            }
        };

        let start = {
            let mut coord = self.lock_coordinator();
            if !coord.registry.is_pending(&task_id) {
                Start::Skip
            } else {
                match self.lifecycle.state() {
                    ModelState::Loaded => {
                        let request = coord.registry.request(&task_id);
                        let token = coord.registry.token(&task_id);
                        match (request, token) {
                            (Some(request), Some(token)) if coord.registry.mark_running(&task_id) => {
                                Start::Run(request, token)
                            }
                            _ => Start::Skip,
                        }
                    }
                    state => {
                        coord.registry.finish(&task_id, TaskStatus::Failed);
                        Start::NotReady(state)
                    }
                }
            }
        };

        let (request, token) = match start {
            Start::Skip => return,
            Start::NotReady(state) => {
                let err = TranslateError::ModelNotReady(state);
                tracing::warn!("[TranslationService] Task {} rejected: {}", task_id, err);
                self.events.emit(TranslationEvent::Error {
                    task_id: task_id.to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                return;
            }
            Start::Run(request, token) => (request, token),
        };

        self.events.emit(TranslationEvent::Started {
            task_id: task_id.to_string(),
        });
        let started = Instant::now();
        let outcome = self.execute(&request, &token).await;
        self.complete(&request, started, outcome);
    }

    async fn execute(&self, request: &TranslationRequest, token: &CancelToken) -> Outcome {
        let report = |percent: u8, message: &str| {
            if !token.is_cancelled() {
                self.events.emit(TranslationEvent::Progress {
                    task_id: request.task_id.to_string(),
                    percent,
                    message: message.to_string(),
                });
            }
        };

        let source_lang = if request.source_lang == AUTO {
            report(10, "Detecting language...");
            self.resolve_source(&request.source_text).await
        } else {
            request.source_lang.clone()
        };

        // Last checkpoint; past here the engine call runs to completion
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }

        report(20, "Translating...");
        let translation = self
            .lifecycle
            .translate(&request.source_text, &request.target_lang, |p, m| report(p, m));

        let result = match self.performance.inference_timeout() {
            Some(limit) => match tokio::time::timeout(limit, translation).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => translation.await,
        };

        match result {
            Ok(text) => Outcome::Translated { text, source_lang },
            Err(err) => Outcome::Failed(err.into()),
        }
    }

    /// Detected language, or the fallback when detection cannot name a
    /// supported one. Low-confidence guesses are still used.
    async fn resolve_source(&self, text: &str) -> String {
        let detection = self.detection.clone();
        let text = text.to_string();
        match tokio::task::spawn_blocking(move || detection.detect(&text)).await {
            Ok(result) => match result.language {
                Some(lang) if self.languages.is_supported(&lang) => {
                    if result.low_confidence {
                        tracing::debug!(
                            "[TranslationService] Low confidence detection {} ({:.2}), using best guess",
                            lang,
                            result.confidence
                        );
                    }
                    lang
                }
                other => {
                    tracing::info!(
                        "[TranslationService] Could not detect a supported language ({:?}), using {}",
                        other,
                        self.fallback_language
                    );
                    self.fallback_language.clone()
                }
            },
            Err(e) => {
                tracing::warn!("[TranslationService] Language detection task failed: {}", e);
                self.fallback_language.clone()
            }
        }
    }

    fn complete(&self, request: &TranslationRequest, started: Instant, outcome: Outcome) {
        let task_id = &request.task_id;

        // Decided under the lock so a concurrent cancel either lands before
        // (and suppresses the output) or finds the task already terminal.
        let outcome = {
            let mut coord = self.lock_coordinator();
            let cancelled = coord.registry.token(task_id).is_some_and(|t| t.is_cancelled());
            let outcome = if cancelled { Outcome::Cancelled } else { outcome };
            let status = match &outcome {
                Outcome::Translated { .. } => TaskStatus::Completed,
                Outcome::Cancelled => TaskStatus::Cancelled,
                Outcome::Failed(_) => TaskStatus::Failed,
            };
            coord.registry.finish(task_id, status);
            outcome
        };

        match outcome {
            Outcome::Translated { text, source_lang } => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    "[TranslationService] Task {} completed in {}ms ({} -> {})",
                    task_id,
                    duration_ms,
                    source_lang,
                    request.target_lang
                );
                self.events.emit(TranslationEvent::Result {
                    task_id: task_id.to_string(),
                    translated_text: text,
                    resolved_source_lang: source_lang,
                    duration_ms,
                });
            }
            Outcome::Cancelled => {
                tracing::debug!("[TranslationService] Task {} cancelled, output discarded", task_id);
                self.emit_cancelled(std::slice::from_ref(task_id));
            }
            Outcome::Failed(err) => {
                tracing::error!("[TranslationService] Task {} failed: {}", task_id, err);
                self.events.emit(TranslationEvent::Error {
                    task_id: task_id.to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
    }
}
