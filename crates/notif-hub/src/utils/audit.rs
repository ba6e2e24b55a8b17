/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Dual-sink audit logger.
//!
//! Every entry is written twice: a structured log line on the synchronous
//! path (never dropped) and a database row on the asynchronous path through a
//! bounded channel (dropped with a warning when the buffer is full). `close`
//! is idempotent and shares a mutex with `log`, so a logger can be shut down
//! while other tasks are still logging; post-close entries keep the sync path
//! and skip the channel.

use crate::dal::DAL;
use notif_models::models::audit_logs::NewAuditLog;
use notif_utils::logging::prelude::*;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default channel buffer size for audit entries.
const DEFAULT_CHANNEL_SIZE: usize = 10000;

/// Global audit logger storage.
static AUDIT_LOGGER: OnceCell<Arc<AuditLogger>> = OnceCell::new();

/// Destination of the asynchronous audit path.
pub enum AuditSink {
    /// Sync log line only; async entries are discarded after draining.
    Structured,
    /// Entries become rows in the audit table.
    Persisted(DAL),
    /// Entries are dropped. Used in tests.
    Null,
}

impl AuditSink {
    fn write(&self, entry: &NewAuditLog) {
        match self {
            AuditSink::Structured | AuditSink::Null => {}
            AuditSink::Persisted(dal) => {
                if let Err(e) = dal.audit_logs().create(entry) {
                    error!("Failed to persist audit entry '{}': {:?}", entry.action, e);
                }
            }
        }
    }
}

/// The dual-sink audit logger.
pub struct AuditLogger {
    /// Channel to the drain task; None once closed.
    sender: Mutex<Option<mpsc::Sender<NewAuditLog>>>,
    /// Drain task handle, joined on close.
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Creates an audit logger with the default buffer size.
    pub fn new(sink: AuditSink) -> Self {
        Self::with_buffer(sink, DEFAULT_CHANNEL_SIZE)
    }

    /// Creates an audit logger with a custom bounded buffer.
    ///
    /// # Panics
    /// Panics if `buffer` is zero.
    pub fn with_buffer(sink: AuditSink, buffer: usize) -> Self {
        assert!(buffer >= 1, "audit buffer must be at least 1");

        let (sender, mut receiver) = mpsc::channel::<NewAuditLog>(buffer);

        let drain = tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                sink.write(&entry);
            }
            debug!("Audit drain stopped");
        });

        info!("Audit logger started (buffer: {})", buffer);

        Self {
            sender: Mutex::new(Some(sender)),
            drain: Mutex::new(Some(drain)),
        }
    }

    /// Records an audit entry.
    ///
    /// The sync path always completes; the async path drops the entry with a
    /// warning when the buffer is full or the logger is closed.
    pub fn log(&self, entry: NewAuditLog) {
        log_line(&entry);

        let sender = self.sender.lock().expect("audit sender lock poisoned");
        match sender.as_ref() {
            Some(sender) => match sender.try_send(entry) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(entry)) => {
                    warn!("Audit buffer full, dropping entry '{}'", entry.action);
                }
                Err(mpsc::error::TrySendError::Closed(entry)) => {
                    warn!("Audit channel closed, dropping entry '{}'", entry.action);
                }
            },
            None => {
                // Closed: sync line above is the record of last resort
            }
        }
    }

    /// Closes the async path and waits for the drain to finish.
    ///
    /// Idempotent; concurrent `log` calls are safe and keep their sync path.
    pub async fn close(&self) {
        let drain = {
            let mut sender = self.sender.lock().expect("audit sender lock poisoned");
            if sender.take().is_none() {
                return;
            }
            self.drain
                .lock()
                .expect("audit drain lock poisoned")
                .take()
        };

        if let Some(handle) = drain {
            if let Err(e) = handle.await {
                error!("Audit drain task failed: {}", e);
            }
        }

        info!("Audit logger closed");
    }
}

/// Writes the synchronous structured log line for an entry.
fn log_line(entry: &NewAuditLog) {
    info!(
        "audit actor_type={} actor_id={} action={} org={} resource={}:{} ip={} details={}",
        entry.actor_type,
        entry
            .actor_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        entry.action,
        entry.org_id.as_deref().unwrap_or("-"),
        entry.resource_type,
        entry.resource_id.as_deref().unwrap_or("-"),
        entry.ip_address.as_deref().unwrap_or("-"),
        entry
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
}

/// Initializes the global audit logger.
///
/// This should be called once during hub startup.
pub fn init_audit_logger(dal: DAL, buffer: usize) -> Result<(), String> {
    let logger = AuditLogger::with_buffer(AuditSink::Persisted(dal), buffer);
    AUDIT_LOGGER
        .set(Arc::new(logger))
        .map_err(|_| "Audit logger already initialized".to_string())
}

/// Gets the global audit logger.
pub fn get_audit_logger() -> Option<Arc<AuditLogger>> {
    AUDIT_LOGGER.get().cloned()
}

/// Logs an audit entry to the global audit logger.
///
/// Entries recorded before initialization fall back to the sync line only.
pub fn log(entry: NewAuditLog) {
    match get_audit_logger() {
        Some(logger) => logger.log(entry),
        None => log_line(&entry),
    }
}

/// Closes the global audit logger.
pub async fn close() {
    if let Some(logger) = get_audit_logger() {
        logger.close().await;
    }
}

/// Helper to create and log an audit entry in one call.
///
/// # Arguments
/// * `actor_type` - Type of actor (admin, api_key, system).
/// * `actor_id` - ID of the actor.
/// * `action` - The action performed.
/// * `resource_type` - Type of resource affected.
/// * `resource_id` - ID of the affected resource.
/// * `details` - Optional additional details.
/// * `ip_address` - Optional client IP address.
#[allow(clippy::too_many_arguments)]
pub fn log_action(
    actor_type: &str,
    actor_id: Option<uuid::Uuid>,
    action: &str,
    resource_type: &str,
    resource_id: Option<String>,
    details: Option<serde_json::Value>,
    ip_address: Option<String>,
) {
    match NewAuditLog::new(actor_type, actor_id, action, resource_type, resource_id) {
        Ok(mut entry) => {
            if let Some(d) = details {
                entry = entry.with_details(d);
            }
            if let Some(ip) = ip_address {
                entry = entry.with_ip_address(ip);
            }
            log(entry);
        }
        Err(e) => {
            error!("Failed to create audit entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notif_models::models::audit_logs::{
        ACTION_EVENT_EMIT, ACTOR_TYPE_SYSTEM, RESOURCE_TYPE_EVENT,
    };

    fn entry(n: usize) -> NewAuditLog {
        NewAuditLog::new(
            ACTOR_TYPE_SYSTEM,
            None,
            ACTION_EVENT_EMIT,
            RESOURCE_TYPE_EVENT,
            Some(format!("evt-{}", n)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_log_and_close() {
        let logger = AuditLogger::with_buffer(AuditSink::Null, 16);

        for i in 0..8 {
            logger.log(entry(i));
        }

        logger.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let logger = AuditLogger::with_buffer(AuditSink::Null, 4);
        logger.close().await;
        logger.close().await;
        logger.close().await;
    }

    #[tokio::test]
    async fn test_log_after_close_completes() {
        let logger = AuditLogger::with_buffer(AuditSink::Null, 4);
        logger.close().await;

        // Sync path only; must not panic
        logger.log(entry(0));
        logger.log(entry(1));
    }

    #[tokio::test]
    async fn test_concurrent_log_and_close() {
        // Property: for any interleaving of N concurrent logs and one close,
        // the process never panics and every log returns normally.
        for _ in 0..20 {
            let logger = Arc::new(AuditLogger::with_buffer(AuditSink::Null, 8));

            let mut handles = Vec::new();
            for task in 0..4 {
                let logger = Arc::clone(&logger);
                handles.push(tokio::spawn(async move {
                    for i in 0..50 {
                        logger.log(entry(task * 100 + i));
                    }
                }));
            }

            let closer = {
                let logger = Arc::clone(&logger);
                tokio::spawn(async move {
                    logger.close().await;
                })
            };

            for handle in handles {
                handle.await.unwrap();
            }
            closer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_buffer_overflow_drops_without_blocking() {
        // Buffer of 1 and no drain progress guarantee: logs must return
        let logger = AuditLogger::with_buffer(AuditSink::Null, 1);
        for i in 0..100 {
            logger.log(entry(i));
        }
        logger.close().await;
    }

    #[test]
    #[should_panic]
    fn test_zero_buffer_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let _ = AuditLogger::with_buffer(AuditSink::Null, 0);
    }
}
