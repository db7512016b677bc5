use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::PluginState;
use crate::violation::ViolationKind;

/// Events emitted by the plugin host as plugins move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Plugin lifecycle ───────────────────────────────────────
    StateChanged {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },
    PluginLoaded {
        plugin: String,
        version: String,
    },
    PluginUnloaded {
        plugin: String,
    },
    PluginError {
        plugin: String,
        error: String,
    },

    // ── Sandbox ────────────────────────────────────────────────
    ViolationRecorded {
        plugin: String,
        violation: ViolationKind,
    },

    // ── Governance ─────────────────────────────────────────────
    PluginFrozen {
        plugin: String,
        reason: String,
    },
    PluginUnfrozen {
        plugin: String,
        actor: String,
    },
    PluginRolledBack {
        plugin: String,
        from_version: String,
        to_version: String,
    },

    // ── System ─────────────────────────────────────────────────
    HealthChecked {
        timestamp: DateTime<Utc>,
        healthy: usize,
        unhealthy: usize,
    },
    Shutdown,
}

/// A broadcast-based event bus for lifecycle notifications.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
