//! Engine notifications
//!
//! The engine reports transitions, completions and background errors to any
//! number of observers. Observers are optional: with none attached every
//! notification is dropped and the engine behaves identically.

use std::sync::Arc;

use crate::engine::monitor::MonitorLatency;
use crate::engine::track::{TrackId, TrackState};
use crate::engine::transport::TransportState;

/// Something observable happened inside the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TrackAdded {
        id: TrackId,
        name: String,
    },
    TrackStateChanged {
        id: TrackId,
        from: TrackState,
        to: TrackState,
        muted: bool,
    },
    TrackRenamed {
        id: TrackId,
        name: String,
    },
    TrackRemoved {
        id: TrackId,
    },
    /// A player reached the end of its file
    PlaybackCompleted {
        id: TrackId,
    },
    TransportChanged {
        from: TransportState,
        to: TransportState,
    },
    MonitorChanged {
        enabled: bool,
        latency: MonitorLatency,
    },
    /// A failure that happened outside any command's return path
    Error {
        context: String,
        message: String,
    },
}

/// Observer of engine events
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn notify(&self, event: &EngineEvent) {
        self(event)
    }
}

/// Fan-out to every attached sink
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.notify(&event);
        }
    }

    pub fn error(&self, context: impl Into<String>, message: impl Into<String>) {
        self.emit(EngineEvent::Error {
            context: context.into(),
            message: message.into(),
        });
    }
}

/// Sink that keeps every event, for tests and scripted front-ends
#[derive(Debug, Default)]
pub struct EventLog {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl EventSink for EventLog {
    fn notify(&self, event: &EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}
