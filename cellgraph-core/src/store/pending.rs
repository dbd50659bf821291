//! Async evaluation.
//!
//! An async compute function returns a future. The store spawns it on a tokio
//! runtime and records the in-flight evaluation on the atom's record together
//! with its generation. When the future finishes, the result is accepted only
//! if that generation is still the record's current evaluation; anything else
//! was superseded and is dropped.
//!
//! Readers that want to wait use [`Store::get_async`]. Each in-flight
//! evaluation publishes its settlement on a `watch` channel so any number of
//! readers can wait on it without holding the store lock.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::read::ReadOutcome;
use super::Store;
use crate::atom::{AnyValue, Atom, AtomDef, AtomId, Value};
use crate::error::AtomError;
use crate::graph::{PendingEval, Settlement, Slot};

impl Store {
    /// Wait for an atom's value, suspending while it (or anything it reads)
    /// is pending.
    ///
    /// A superseded evaluation is not an error: the read is simply repeated
    /// against the newer one. A rejected evaluation fails every caller
    /// waiting on it.
    pub async fn get_async<T: Value>(&self, atom: &Atom<T>) -> Result<T, AtomError> {
        loop {
            let waiting = match self.get(atom) {
                Err(AtomError::Pending { atom: waiting }) => waiting,
                other => return other,
            };
            let Some(mut settled) = self.pending_receiver(waiting) else {
                // Settled between the read and the lookup
                tokio::task::yield_now().await;
                continue;
            };
            let settlement = settled
                .wait_for(|settlement| !matches!(settlement, Settlement::Pending))
                .await
                .map(|settlement| settlement.clone());
            if let Ok(Settlement::Failed(err)) = settlement {
                return Err(err);
            }
        }
    }

    fn pending_receiver(&self, atom: AtomId) -> Option<watch::Receiver<Settlement>> {
        self.with_state(|state| match &state.scheduler.record(atom)?.slot {
            Slot::Pending(pending) => Some(pending.subscribe()),
            _ => None,
        })
    }

    fn runtime(&self) -> Option<Handle> {
        self.inner
            .config
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Record an in-flight evaluation and spawn the task that drives it.
    pub(crate) fn begin_async(
        &self,
        def: &Arc<AtomDef>,
        generation: u64,
        token: CancellationToken,
        future: BoxFuture<'static, Result<AnyValue, AtomError>>,
    ) -> ReadOutcome {
        let atom = def.id;
        let Some(runtime) = self.runtime() else {
            token.cancel();
            return self.with_state(|state| {
                let record = state.scheduler.ensure(def);
                record.stale = true;
                (Err(AtomError::NoRuntime { atom }), record.epoch)
            });
        };

        let epoch = self.with_state(|state| {
            let record = state.scheduler.ensure(def);
            record.begin_pending(PendingEval::new(generation, token));
            record.epoch
        });

        let store = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            let outcome = future.await;
            if let Some(inner) = store.upgrade() {
                Store::from_inner(inner).settle(atom, generation, outcome);
            }
        });

        (Err(AtomError::Pending { atom }), epoch)
    }

    /// Accept the result of an async evaluation if it is still current.
    pub(crate) fn settle(
        &self,
        atom: AtomId,
        generation: u64,
        outcome: Result<AnyValue, AtomError>,
    ) {
        let _guard = self.lock();
        let settled = self.with_state(|state| {
            let record = state.scheduler.record_mut(atom)?;
            let pending = record.take_pending(generation)?;
            record.epoch += 1;
            let settlement = match outcome {
                Ok(value) => {
                    record.slot = Slot::Ready(Arc::clone(&value));
                    Settlement::Resolved(value)
                }
                Err(err) => {
                    record.slot = Slot::Failed(err.clone());
                    Settlement::Failed(err)
                }
            };
            state.propagate(atom);
            Some((pending, settlement))
        });

        let Some((pending, settlement)) = settled else {
            tracing::debug!(
                store = %self.label(),
                %atom,
                generation,
                "discarding superseded async result"
            );
            return;
        };
        tracing::trace!(store = %self.label(), %atom, generation, "async evaluation settled");
        pending.settle(settlement);
        self.flush();
    }
}
