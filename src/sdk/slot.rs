use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lazy_static::lazy_static;
use tokio::sync::Mutex;
use tracing::debug;

use super::ClientReconciler;
use super::ReconcilerBuilder;
use crate::Result;

lazy_static! {
    static ref DEFAULT_SLOT: ReconcilerSlot = ReconcilerSlot::new();
}

/// Holds at most one [`ClientReconciler`].
///
/// The first successful start wins; later starts return the winner without
/// touching their builder. Starts are serialized, so racing callers wait for
/// the one bootstrap in flight. A failed start leaves the slot empty.
#[derive(Default)]
pub struct ReconcilerSlot {
    current: ArcSwapOption<ClientReconciler>,
    starting: Mutex<()>,
}

impl ReconcilerSlot {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            starting: Mutex::new(()),
        }
    }

    /// Process-wide slot for embedders without a place to keep their own.
    pub fn global() -> &'static ReconcilerSlot {
        &DEFAULT_SLOT
    }

    pub fn get(&self) -> Option<Arc<ClientReconciler>> {
        self.current.load_full()
    }

    pub async fn get_or_start(
        &self,
        builder: ReconcilerBuilder,
    ) -> Result<Arc<ClientReconciler>> {
        if let Some(existing) = self.get() {
            debug!("reconciler already running, start skipped");
            return Ok(existing);
        }

        let _starting = self.starting.lock().await;
        if let Some(existing) = self.get() {
            debug!("reconciler started while waiting, start skipped");
            return Ok(existing);
        }

        let started = Arc::new(builder.start().await?);
        self.current.store(Some(started.clone()));
        Ok(started)
    }
}
