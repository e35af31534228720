//! Bus d'événements du control point.
//!
//! Pas d'héritage d'un event-emitter : une liste explicite de subscribers et
//! un `emit` qui élague les receivers morts, comme pour les autres bus du
//! projet.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use uuid::Uuid;

/// Événements émis par la découverte et les sessions device.
#[derive(Clone, Debug)]
pub enum ControlPointEvent {
    DeviceDiscovered {
        session_id: Uuid,
        urn: String,
        name: String,
        xaddrs: Vec<String>,
    },
    ProbeCompleted {
        session_id: Uuid,
        devices: usize,
    },
    SessionReady {
        url: String,
    },
    ProfilesLoaded {
        url: String,
        count: usize,
    },
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<ControlPointEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<ControlPointEvent> {
        let (tx, rx) = unbounded::<ControlPointEvent>();
        {
            let mut subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
            subscribers.push(tx);
        }
        rx
    }

    pub fn emit(&self, event: ControlPointEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
