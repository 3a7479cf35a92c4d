//! Audit sink — every gating decision the validator makes leaves a trace.
//!
//! Entries carry codes and ids only. No key material, no ciphertext, no
//! plaintext ever reaches the sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

/// One audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// e.g. "key_exchange_init", "message_store", "session_expired"
    pub event_type: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Outcome description: "accepted" or the stable rejection code.
    pub details: String,
    pub ip: String,
    /// Milliseconds since epoch, from the validator's clock.
    pub timestamp: i64,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits audit entries as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "ql_relay::audit",
            event_type = %event.event_type,
            session_id = event.session_id.as_deref().unwrap_or("-"),
            user_id = event.user_id.as_deref().unwrap_or("-"),
            details = %event.details,
            ip = %event.ip,
            timestamp = event.timestamp,
            "audit"
        );
    }
}

/// Collects entries in memory so tests can assert on them.
#[derive(Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
