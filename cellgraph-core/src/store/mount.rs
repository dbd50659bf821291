//! Mount lifecycle.
//!
//! An atom is mounted while something observes it: a listener, or a mounted
//! atom that read it during its latest evaluation. Mounting runs the atom's
//! mount hook once; the teardown it returns runs when the last observer
//! leaves. Mounting an atom mounts everything it reads, so a hook on a deep
//! dependency fires as soon as anything downstream of it is subscribed.

use std::sync::Arc;

use super::{SetSelf, Store};
use crate::atom::{AtomDef, AtomId};
use crate::graph::{EdgeDelta, Mounted};

impl Store {
    /// Mount an atom and, transitively, its dependencies.
    pub(crate) fn mount(&self, def: &Arc<AtomDef>) {
        let _guard = self.lock();
        if self.with_state(|state| state.scheduler.ensure(def).is_mounted()) {
            return;
        }

        // Evaluate first so the dependency edges are known. A failing atom is
        // still mounted; its listeners hear about it when it recovers.
        let _ = self.read_atom(def);

        let dependencies = self.with_state(|state| {
            let record = state.scheduler.ensure(def);
            record.mounted = Some(Mounted::default());
            let ids: Vec<AtomId> = record.dependencies.iter().map(|d| d.atom).collect();
            ids.into_iter()
                .filter_map(|id| state.scheduler.record(id))
                .map(|record| Arc::clone(&record.def))
                .collect::<Vec<_>>()
        });
        tracing::debug!(store = %self.label(), atom = %def, "mounted");

        for dependency in &dependencies {
            self.mount_dependency(dependency, def.id);
        }

        let Some(on_mount) = def.on_mount.get() else {
            return;
        };
        let Some(teardown) = on_mount(SetSelf::new(self, def)) else {
            return;
        };
        // The hook may have unsubscribed everything already
        let orphaned = self.with_state(|state| {
            match state.scheduler.record_mut(def.id).and_then(|r| r.mounted.as_mut()) {
                Some(mounted) => {
                    mounted.teardown = Some(teardown);
                    None
                }
                None => Some(teardown),
            }
        });
        if let Some(teardown) = orphaned {
            teardown();
        }
    }

    /// Mount `dependency` on behalf of the mounted atom `dependent`.
    fn mount_dependency(&self, dependency: &Arc<AtomDef>, dependent: AtomId) {
        self.mount(dependency);
        self.with_state(|state| {
            if let Some(mounted) = state
                .scheduler
                .record_mut(dependency.id)
                .and_then(|record| record.mounted.as_mut())
            {
                mounted.dependents.insert(dependent);
            }
        });
    }

    /// Unmount an atom if nothing observes it anymore, then reconsider the
    /// atoms it read.
    pub(crate) fn maybe_unmount(&self, atom: AtomId) {
        let _guard = self.lock();
        let unmounted = self.with_state(|state| {
            let record = state.scheduler.record_mut(atom)?;
            let mounted = record.mounted.as_ref()?;
            if !record.listeners.is_empty() || !mounted.dependents.is_empty() {
                return None;
            }
            let mounted = record.mounted.take()?;
            let dependencies: Vec<AtomId> = record.dependencies.iter().map(|d| d.atom).collect();
            Some((mounted.teardown, dependencies))
        });
        let Some((teardown, dependencies)) = unmounted else {
            return;
        };
        tracing::debug!(store = %self.label(), %atom, "unmounted");

        if let Some(teardown) = teardown {
            teardown();
        }
        for dependency in dependencies {
            self.release_dependency(dependency, atom);
        }
    }

    fn release_dependency(&self, dependency: AtomId, dependent: AtomId) {
        self.with_state(|state| {
            if let Some(mounted) = state
                .scheduler
                .record_mut(dependency)
                .and_then(|record| record.mounted.as_mut())
            {
                mounted.dependents.remove(&dependent);
            }
        });
        self.maybe_unmount(dependency);
    }

    /// Keep mount state in line with the edges a re-evaluation produced.
    pub(crate) fn remount_dependencies(&self, def: &Arc<AtomDef>, delta: EdgeDelta) {
        if delta.added.is_empty() && delta.removed.is_empty() {
            return;
        }
        let mounted = self.with_state(|state| {
            state
                .scheduler
                .record(def.id)
                .is_some_and(|record| record.is_mounted())
        });
        if !mounted {
            return;
        }

        for added in delta.added {
            if let Some(dependency) = self.definition(added) {
                self.mount_dependency(&dependency, def.id);
            }
        }
        for removed in delta.removed {
            self.release_dependency(removed, def.id);
        }
    }

    /// Atoms currently mounted in this store, in ID order.
    pub fn mounted_atoms(&self) -> Vec<AtomId> {
        let mut mounted: Vec<AtomId> = self.with_state(|state| {
            state
                .scheduler
                .records()
                .filter(|record| record.is_mounted())
                .map(|record| record.id())
                .collect()
        });
        mounted.sort();
        mounted
    }
}
