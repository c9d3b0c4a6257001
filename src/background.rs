use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};

/// Runs `task` on the current runtime without waiting for it. The join handle
/// is dropped; failures are logged inside the task and go nowhere else.
pub(crate) fn spawn_detached<F>(label: &'static str, task: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = task.await {
                    warn!(task = label, error = %e, "background task failed");
                }
            });
        }
        Err(_) => warn!(task = label, "no async runtime available; background task dropped"),
    }
}

pub(crate) fn emit_audit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    let sink = Arc::clone(sink);
    spawn_detached("audit", async move { sink.emit(event) });
}
