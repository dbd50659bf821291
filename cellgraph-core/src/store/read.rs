//! Lazy evaluation.
//!
//! A read serves the cached outcome while the record is fresh and otherwise
//! re-runs the compute function, replacing the record's dependency edges
//! with the ones observed during that run.
//!
//! While a write function has staged values, anything downstream of them is
//! evaluated against the staged values and the result is not cached.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{Getter, ReadOptions, SetSelf, Store};
use crate::atom::{AnyValue, AtomDef, AtomId, Evaluated, Source};
use crate::error::AtomError;

/// Outcome of a read together with the record's epoch after it.
pub(crate) type ReadOutcome = (Result<AnyValue, AtomError>, u64);

enum Lookup {
    Hit(ReadOutcome),
    Evaluate,
    Speculate,
}

impl Store {
    /// Tracked read, as performed by a [`Getter`].
    ///
    /// A failed async evaluation stays cached until something it depends on
    /// changes.
    pub(crate) fn read_atom(&self, def: &Arc<AtomDef>) -> ReadOutcome {
        self.read(def, false)
    }

    /// Top-level read. A failed async evaluation is retried.
    pub(crate) fn read_root(&self, def: &Arc<AtomDef>) -> ReadOutcome {
        self.read(def, true)
    }

    fn read(&self, def: &Arc<AtomDef>, retry_failed: bool) -> ReadOutcome {
        let _guard = self.lock();
        let lookup = self.with_state(|state| {
            let epoch = state.scheduler.ensure(def).epoch;
            if state.evaluating.contains(&def.id) {
                return Lookup::Hit((Err(AtomError::Cycle { atom: def.id }), epoch));
            }
            if let Some(value) = state.batch.staged(def.id) {
                return Lookup::Hit((Ok(value), epoch));
            }
            let staging = state.batch.is_staging();
            let cacheable = state.scheduler.is_fresh(def.id)
                && !(staging && state.affected_by_staged().contains(&def.id));
            if cacheable {
                if let Some(record) = state.scheduler.record(def.id) {
                    if !(retry_failed && record.is_failed()) {
                        return Lookup::Hit((record.outcome(), record.epoch));
                    }
                }
            }
            if staging {
                Lookup::Speculate
            } else {
                Lookup::Evaluate
            }
        });
        match lookup {
            Lookup::Hit(hit) => hit,
            Lookup::Evaluate => self.evaluate(def),
            Lookup::Speculate => self.speculate(def),
        }
    }

    /// Run a compute function against staged values. The record is left
    /// untouched since the enclosing write may still fail.
    fn speculate(&self, def: &Arc<AtomDef>) -> ReadOutcome {
        let Source::Derived(read) = &def.source else {
            return self.with_state(|state| {
                let record = state.scheduler.ensure(def);
                (record.outcome(), record.epoch)
            });
        };

        let epoch = self.with_state(|state| {
            state.evaluating.insert(def.id);
            state.scheduler.ensure(def).epoch
        });
        tracing::trace!(store = %self.label(), atom = %def, "evaluating against staged writes");

        let token = CancellationToken::new();
        let options = ReadOptions::new(token.clone(), SetSelf::new(self, def));
        let evaluated = read(&mut Getter::new(self, def.id), &options);
        self.with_state(|state| {
            state.evaluating.remove(&def.id);
        });

        match evaluated {
            Ok(Evaluated::Ready(value)) => (Ok(value), epoch),
            // Not spawned: the staged values it saw may never be committed
            Ok(Evaluated::Pending(_)) => {
                token.cancel();
                (Err(AtomError::Pending { atom: def.id }), epoch)
            }
            Err(err) => {
                token.cancel();
                (Err(err), epoch)
            }
        }
    }

    fn evaluate(&self, def: &Arc<AtomDef>) -> ReadOutcome {
        let Source::Derived(read) = &def.source else {
            // Primitive records are always fresh
            return self.with_state(|state| {
                let record = state.scheduler.ensure(def);
                (record.outcome(), record.epoch)
            });
        };

        let generation = self.with_state(|state| {
            state.evaluating.insert(def.id);
            let record = state.scheduler.ensure(def);
            record.stale = false;
            record.generation += 1;
            record.generation
        });
        tracing::trace!(store = %self.label(), atom = %def, generation, "evaluating");

        let token = CancellationToken::new();
        let options = ReadOptions::new(token.clone(), SetSelf::new(self, def));
        let mut getter = Getter::new(self, def.id);
        let evaluated = read(&mut getter, &options);

        let dependencies = getter.into_dependencies();
        let delta = self.with_state(|state| {
            state.evaluating.remove(&def.id);
            state.scheduler.replace_dependencies(def.id, dependencies)
        });
        self.remount_dependencies(def, delta);

        match evaluated {
            Ok(Evaluated::Ready(value)) => self.with_state(|state| {
                let record = state.scheduler.ensure(def);
                record.store_value(Arc::clone(&value));
                (Ok(value), record.epoch)
            }),
            Ok(Evaluated::Pending(future)) => self.begin_async(def, generation, token, future),
            Err(err) => {
                token.cancel();
                tracing::trace!(
                    store = %self.label(),
                    atom = %def,
                    error = %err,
                    "evaluation failed"
                );
                self.with_state(|state| {
                    // Keep the previous value but force the next read to retry
                    let record = state.scheduler.ensure(def);
                    record.stale = true;
                    (Err(err), record.epoch)
                })
            }
        }
    }

    /// Look up the definition behind a record.
    pub(crate) fn definition(&self, atom: AtomId) -> Option<Arc<AtomDef>> {
        self.with_state(|state| {
            state
                .scheduler
                .record(atom)
                .map(|record| Arc::clone(&record.def))
        })
    }
}
