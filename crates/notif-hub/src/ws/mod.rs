/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! WebSocket subscription engine.
//!
//! Each connection owns a reader task and a writer task joined by a bounded
//! send channel, plus one bus-consumer task per subscription. The hub tracks
//! live sessions for health and metrics.

pub mod protocol;
pub mod session;

use std::collections::HashMap;
use std::sync::Mutex;

use notif_utils::logging::prelude::*;

use crate::metrics;

pub use session::{SessionConfig, WsSession};

/// Registry of live WebSocket sessions.
#[derive(Default)]
pub struct WsHub {
    /// client_id → org_id
    sessions: Mutex<HashMap<String, String>>,
}

impl WsHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session.
    pub fn register(&self, client_id: &str, org_id: &str) {
        let mut sessions = self.sessions.lock().expect("ws hub lock poisoned");
        sessions.insert(client_id.to_string(), org_id.to_string());
        metrics::WEBSOCKET_SESSIONS.set(sessions.len() as i64);
        debug!("WS session {} registered (org '{}')", client_id, org_id);
    }

    /// Unregisters a session.
    pub fn unregister(&self, client_id: &str) {
        let mut sessions = self.sessions.lock().expect("ws hub lock poisoned");
        if sessions.remove(client_id).is_some() {
            metrics::WEBSOCKET_SESSIONS.set(sessions.len() as i64);
            debug!("WS session {} unregistered", client_id);
        }
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.lock().expect("ws hub lock poisoned").len()
    }

    /// Number of live sessions for one org.
    pub fn count_for_org(&self, org_id: &str) -> usize {
        self.sessions
            .lock()
            .expect("ws hub lock poisoned")
            .values()
            .filter(|org| org.as_str() == org_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let hub = WsHub::new();
        assert_eq!(hub.count(), 0);

        hub.register("c1", "acme");
        hub.register("c2", "acme");
        hub.register("c3", "globex");

        assert_eq!(hub.count(), 3);
        assert_eq!(hub.count_for_org("acme"), 2);
        assert_eq!(hub.count_for_org("globex"), 1);

        hub.unregister("c2");
        assert_eq!(hub.count_for_org("acme"), 1);

        // Unregistering twice is harmless
        hub.unregister("c2");
        assert_eq!(hub.count(), 2);
    }
}
