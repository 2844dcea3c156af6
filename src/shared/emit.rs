use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::events::TranslationEvent;

/// Receives events synchronously on the emitting thread. Implementations
/// must return promptly; anything slow belongs behind `EventHub::subscribe`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TranslationEvent);
}

/// Fan-out point for all events produced by the core.
///
/// Subscribers get an unbounded channel so emission never waits on a slow
/// listener. Closed subscribers are pruned on the next emit.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<UnboundedSender<TranslationEvent>>>,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

fn recover<'a, T>(lock: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("[EventHub] {} mutex poisoned, recovering...", what);
            poisoned.into_inner()
        }
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// New receiver that sees every event emitted from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<TranslationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        recover(&self.subscribers, "Subscribers").push(tx);
        rx
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        recover(&self.sinks, "Sinks").push(sink);
    }

    /// Run `callback` for every event on a forwarding task owned by `runtime`,
    /// off the worker path.
    pub fn on_event<F>(&self, runtime: &Handle, callback: F)
    where
        F: Fn(TranslationEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                callback(event);
            }
        });
    }

    pub fn emit(&self, event: TranslationEvent) {
        tracing::trace!(channel = event.channel(), "[EventHub] emit");

        let sinks: Vec<Arc<dyn EventSink>> = recover(&self.sinks, "Sinks").clone();
        for sink in sinks {
            sink.emit(&event);
        }

        let mut subscribers = recover(&self.subscribers, "Subscribers");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        recover(&self.subscribers, "Subscribers").len()
    }
}

/// Forwards events to every window of a Tauri app, one channel per event kind.
#[cfg(feature = "tauri")]
pub struct TauriSink<R: tauri::Runtime> {
    app: tauri::AppHandle<R>,
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> TauriSink<R> {
    pub fn new(app: tauri::AppHandle<R>) -> Self {
        Self { app }
    }
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> EventSink for TauriSink<R> {
    fn emit(&self, event: &TranslationEvent) {
        use tauri::Emitter;

        if let Err(e) = self.app.emit(event.channel(), event) {
            tracing::error!("[TauriSink] Failed to emit {}: {}", event.channel(), e);
        }
    }
}
