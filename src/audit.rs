//! Structured audit trail for every authentication event, resource access,
//! scope violation, and upstream error (spec §3.1.7, §4.9).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::sanitize::sanitize_query_params;

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Ok,
    Denied,
    Error,
}

/// Audit event kinds (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    AuthSuccess,
    AuthFailure,
    AuthRefresh,
    ResourceList,
    ResourceRead,
    ScopeViolation,
    UpstreamError,
    ProcessStart,
    ProcessStop,
}

/// A single audit record (spec §3.1.7). `message` and any free-form string
/// already had [`sanitize_map`] applied by the time it reaches here —
/// [`AuditHandle::emit`] re-applies it defensively so no caller can bypass
/// the contract by constructing an `AuditEvent` directly.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub corr_id: String,
    pub event: AuditEventKind,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    pub fn new(corr_id: impl Into<String>, event: AuditEventKind, outcome: AuditOutcome) -> Self {
        Self {
            ts: Utc::now(),
            corr_id: corr_id.into(),
            event,
            outcome,
            user_id: None,
            resource_uri: None,
            error_kind: None,
            message: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource_uri(mut self, uri: impl Into<String>) -> Self {
        self.resource_uri = Some(uri.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Anything that can durably record a line of audit output. The core's
/// responsibility ends at emission; format/retention of the sink itself is
/// an external-collaborator concern (spec §6.4).
pub trait AuditSink: Send + Sync + 'static {
    fn write_line(&self, line: String);
}

/// Default sink: newline-delimited JSON on stderr (stdout is reserved for
/// JSON-RPC frames, spec §6.1.1).
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn write_line(&self, line: String) {
        eprintln!("{line}");
    }
}

/// Cheap, cloneable handle for submitting audit events. This is the
/// injected capability other components hold instead of the full
/// `AuditEmitter` (spec §9.1): it breaks what would otherwise be a reverse
/// dependency edge from e.g. `AuthManager` back onto the audit component.
///
/// Backed by a `Mutex`-guarded ring buffer rather than a `tokio::sync::mpsc`
/// channel: the overflow policy (spec §4.9) requires evicting an
/// already-queued event from the producer side, which a bounded mpsc
/// channel has no way to do — `try_send` can only accept or reject the new
/// item, never reach back into the queue to drop an older one.
#[derive(Clone)]
pub struct AuditHandle {
    buffer: Arc<Mutex<VecDeque<AuditEvent>>>,
    notify: Arc<Notify>,
    capacity: usize,
    sink: Arc<dyn AuditSink>,
}

impl AuditHandle {
    /// Best-effort, non-blocking submission (spec §4.9: the dispatcher
    /// never blocks on audit write-back).
    ///
    /// Overflow policy: the oldest non-`scope.violation` event is evicted
    /// to make room. If every buffered event is itself a `scope.violation`
    /// (the buffer is saturated with the one kind this policy protects),
    /// a `scope.violation` event is written synchronously and bypasses the
    /// buffer entirely rather than being silently dropped; any other kind
    /// of event is dropped with a synchronous "audit drop" stderr line.
    pub fn emit(&self, mut event: AuditEvent) {
        if let Some(message) = event.message.take() {
            event.message = Some(sanitize_query_params(&message));
        }
        if let Some(uri) = event.resource_uri.take() {
            event.resource_uri = Some(sanitize_query_params(&uri));
        }

        let mut buffer = self.buffer.lock().expect("audit buffer mutex poisoned");
        if buffer.len() >= self.capacity {
            let victim = buffer
                .iter()
                .position(|queued| queued.event != AuditEventKind::ScopeViolation);

            match victim {
                Some(pos) => {
                    let dropped = buffer.remove(pos).expect("position came from this deque");
                    tracing::warn!(
                        event = ?dropped.event,
                        corr_id = %dropped.corr_id,
                        "audit buffer full; dropped oldest non-scope-violation event"
                    );
                }
                None if event.event == AuditEventKind::ScopeViolation => {
                    drop(buffer);
                    eprintln!(
                        "{{\"audit_drop\":\"buffer saturated with scope_violation events; \
                         writing synchronously to avoid silent drop\",\"corr_id\":{:?}}}",
                        event.corr_id
                    );
                    let line = serde_json::to_string(&event)
                        .unwrap_or_else(|e| format!("{{\"audit_serialize_error\":\"{e}\"}}"));
                    self.sink.write_line(line);
                    return;
                }
                None => {
                    drop(buffer);
                    eprintln!(
                        "{{\"audit_drop\":\"buffer saturated with scope_violation events; \
                         new non-scope-violation event discarded\",\"event\":{:?},\"corr_id\":{:?}}}",
                        event.event, event.corr_id
                    );
                    return;
                }
            }
        }

        buffer.push_back(event);
        drop(buffer);
        self.notify.notify_one();
    }

    /// Whether every buffered event has reached the sink. Used by shutdown
    /// to poll for drain completion within a bounded grace period (spec
    /// §5.4) instead of sleeping a fixed duration.
    pub fn is_drained(&self) -> bool {
        self.buffer
            .lock()
            .expect("audit buffer mutex poisoned")
            .is_empty()
    }
}

/// Bounded-buffer audit writer (spec §4.9). On overflow, the oldest
/// non-`scope.violation` events are dropped first; a sustained overflow
/// that would drop a `scope.violation` event instead writes it
/// synchronously to stderr rather than dropping it.
pub struct AuditEmitter {
    handle: AuditHandle,
}

impl AuditEmitter {
    /// Spawn the background consumer task and return the handle producers
    /// use. `capacity` bounds the in-memory buffer (spec default: a few
    /// thousand events is plenty for a synchronous-per-request server).
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let buffer = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let notify = Arc::new(Notify::new());

        let task_buffer = buffer.clone();
        let task_notify = notify.clone();
        let task_sink = sink.clone();

        tokio::spawn(async move {
            loop {
                task_notify.notified().await;
                loop {
                    let next = {
                        let mut buf = task_buffer.lock().expect("audit buffer mutex poisoned");
                        buf.pop_front()
                    };
                    let Some(event) = next else { break };
                    let line = serde_json::to_string(&event)
                        .unwrap_or_else(|e| format!("{{\"audit_serialize_error\":\"{e}\"}}"));
                    task_sink.write_line(line);
                }
            }
        });

        Self {
            handle: AuditHandle {
                buffer,
                notify,
                capacity,
                sink,
            },
        }
    }

    pub fn handle(&self) -> AuditHandle {
        self.handle.clone()
    }
}
