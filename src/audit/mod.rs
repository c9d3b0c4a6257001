use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{EntityType, Timestamp};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Scored {
        at: Timestamp,
        agent_handle: String,
        entity_count: usize,
        compatibility: f64,
        offline: bool,
        fidelity_path: String,
    },
    EntitySkipped {
        at: Timestamp,
        entity_id: String,
        entity_type: EntityType,
        reason: String,
    },
    Failed {
        at: Timestamp,
        operation: String,
        error: String,
        detail: String,
    },
    GroupScored {
        at: Timestamp,
        session_handle: String,
        member_count: usize,
        venue_count: usize,
        best_group_compatibility: Option<f64>,
    },
}

impl AuditEvent {
    pub fn scored(
        at: Timestamp,
        agent_handle: impl Into<String>,
        entity_count: usize,
        compatibility: f64,
        offline: bool,
        fidelity_path: impl Into<String>,
    ) -> Self {
        Self::Scored {
            at,
            agent_handle: agent_handle.into(),
            entity_count,
            compatibility,
            offline,
            fidelity_path: fidelity_path.into(),
        }
    }

    pub fn entity_skipped(
        at: Timestamp,
        entity_id: impl Into<String>,
        entity_type: EntityType,
        reason: impl Into<String>,
    ) -> Self {
        Self::EntitySkipped {
            at,
            entity_id: entity_id.into(),
            entity_type,
            reason: reason.into(),
        }
    }

    pub fn failed(at: Timestamp, operation: &str, error: &str, detail: impl Into<String>) -> Self {
        Self::Failed {
            at,
            operation: operation.to_string(),
            error: error.to_string(),
            detail: detail.into(),
        }
    }

    pub fn group_scored(
        at: Timestamp,
        session_handle: impl Into<String>,
        member_count: usize,
        venue_count: usize,
        best_group_compatibility: Option<f64>,
    ) -> Self {
        Self::GroupScored {
            at,
            session_handle: session_handle.into(),
            member_count,
            venue_count,
            best_group_compatibility,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Scored { .. } => "scored",
            AuditEvent::EntitySkipped { .. } => "entity_skipped",
            AuditEvent::Failed { .. } => "failed",
            AuditEvent::GroupScored { .. } => "group_scored",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// No-op audit sink (the engine default).
#[derive(Clone, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fan-out sink for emitting to multiple audit backends.
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for CompositeAuditSink {
    fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        for sink in &self.sinks {
            sink.emit(event.clone())?;
        }
        Ok(())
    }
}

/// Keeps events in memory; handy for tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Writes each event as one JSON line through `tracing` (target `audit`).
#[derive(Clone, Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&event)?;
        tracing::info!(target: "audit", kind = event.kind(), event = %line);
        Ok(())
    }
}
