//! Integration Tests for the Atom Store
//!
//! These tests verify that atoms, stores, listeners and mount hooks work
//! together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use cellgraph_core::{
    atom, default_store, derived, store_or_default, writable, write_only, Atom, AtomError,
    OnUnmount, SetAtom, SetStateAction, Store,
};

/// Counts how often a closure ran.
fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// The canonical count/doubled walkthrough.
#[test]
fn count_and_doubled_scenario() {
    let store = Store::new();
    let count = atom(1);
    let doubled = {
        let count = count.clone();
        derived(move |get| Ok(get.get(&count)? * 2))
    };

    assert_eq!(store.get(&doubled).unwrap(), 2);

    store.set(&count, 5).unwrap();
    assert_eq!(store.get(&doubled).unwrap(), 10);

    store
        .set(&count, SetStateAction::update(|prev: &i32| prev + 1))
        .unwrap();
    assert_eq!(store.get(&count).unwrap(), 6);
    assert_eq!(store.get(&doubled).unwrap(), 12);
}

/// Reading a settled atom twice does not re-run its compute function.
#[test]
fn reads_are_idempotent() {
    let store = Store::new();
    let runs = counter();
    let count = atom(3);

    let squared = {
        let (runs, count) = (runs.clone(), count.clone());
        derived(move |get| {
            runs.fetch_add(1, Ordering::SeqCst);
            let n = get.get(&count)?;
            Ok(n * n)
        })
    };

    assert_eq!(store.get(&squared).unwrap(), 9);
    assert_eq!(store.get(&squared).unwrap(), 9);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// A branch the compute function no longer takes stops invalidating it.
#[test]
fn unread_branches_are_pruned() {
    let store = Store::new();
    let runs = counter();
    let flag = atom(true);
    let a = atom(1);
    let b = atom(2);

    let pick = {
        let (runs, flag, a, b) = (runs.clone(), flag.clone(), a.clone(), b.clone());
        derived(move |get| {
            runs.fetch_add(1, Ordering::SeqCst);
            if get.get(&flag)? {
                get.get(&a)
            } else {
                get.get(&b)
            }
        })
    };

    assert_eq!(store.get(&pick).unwrap(), 1);
    store.set(&flag, false).unwrap();
    assert_eq!(store.get(&pick).unwrap(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    store.set(&a, 100).unwrap();
    let snapshot = store.snapshot();
    assert!(!snapshot.atom(pick.id()).unwrap().stale);
    assert!(!snapshot.atom(a.id()).unwrap().dependents.contains(&pick.id()));

    assert_eq!(store.get(&pick).unwrap(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Listeners on a chain fire upstream first, whatever the subscription order.
#[test]
fn listeners_fire_in_dependency_order() {
    let store = Store::new();
    let source = atom(1);
    let d1 = {
        let source = source.clone();
        derived(move |get| Ok(get.get(&source)? + 1))
    };
    let d2 = {
        let d1 = d1.clone();
        derived(move |get| Ok(get.get(&d1)? * 10))
    };

    let order = Arc::new(Mutex::new(Vec::new()));
    let _s2 = {
        let order = order.clone();
        store.subscribe(&d2, move || order.lock().unwrap().push("d2"))
    };
    let _s1 = {
        let order = order.clone();
        store.subscribe(&d1, move || order.lock().unwrap().push("d1"))
    };

    store.set(&source, 2).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["d1", "d2"]);
    assert_eq!(store.get(&d2).unwrap(), 30);
}

/// Diamond-shaped graphs recompute the bottom once per write.
#[test]
fn diamond_recomputes_once() {
    let store = Store::new();
    let runs = counter();
    let source = atom(1);
    let left = {
        let source = source.clone();
        derived(move |get| Ok(get.get(&source)? + 1))
    };
    let right = {
        let source = source.clone();
        derived(move |get| Ok(get.get(&source)? * 2))
    };
    let bottom = {
        let (runs, left, right) = (runs.clone(), left.clone(), right.clone());
        derived(move |get| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(get.get(&left)? + get.get(&right)?)
        })
    };

    assert_eq!(store.get(&bottom).unwrap(), 4);
    store.set(&source, 5).unwrap();
    assert_eq!(store.get(&bottom).unwrap(), 16);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A shared dependency mounts once and tears down once.
#[test]
fn mount_hook_runs_once_for_shared_dependency() {
    let store = Store::new();
    let mounts = counter();
    let unmounts = counter();

    let source = {
        let (mounts, unmounts) = (mounts.clone(), unmounts.clone());
        atom(0).with_on_mount(move |_set| {
            mounts.fetch_add(1, Ordering::SeqCst);
            let unmounts = unmounts.clone();
            let teardown: OnUnmount = Box::new(move || {
                unmounts.fetch_add(1, Ordering::SeqCst);
            });
            Some(teardown)
        })
    };
    let plus_one = {
        let source = source.clone();
        derived(move |get| Ok(get.get(&source)? + 1))
    };
    let minus_one = {
        let source = source.clone();
        derived(move |get| Ok(get.get(&source)? - 1))
    };

    let first = store.subscribe(&plus_one, || {});
    let second = store.subscribe(&minus_one, || {});
    assert_eq!(mounts.load(Ordering::SeqCst), 1);

    first.unsubscribe();
    assert_eq!(unmounts.load(Ordering::SeqCst), 0);
    assert!(store.mounted_atoms().contains(&source.id()));

    drop(second);
    assert_eq!(mounts.load(Ordering::SeqCst), 1);
    assert_eq!(unmounts.load(Ordering::SeqCst), 1);
    assert!(store.mounted_atoms().is_empty());
}

/// A mount hook can keep a setter and write through it later.
#[test]
fn mount_hook_setter_outlives_the_hook() {
    let store = Store::new();
    let stash: Arc<Mutex<Option<SetAtom<SetStateAction<i32>>>>> = Arc::default();

    let ticks = {
        let stash = stash.clone();
        atom(0).with_on_mount(move |set| {
            *stash.lock().unwrap() = Some(set);
            None
        })
    };

    let seen = counter();
    let _sub = {
        let seen = seen.clone();
        store.subscribe(&ticks, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    let set = stash.lock().unwrap().clone().unwrap();
    set.call(SetStateAction::update(|n: &i32| n + 1)).unwrap();
    set.call(SetStateAction::update(|n: &i32| n + 1)).unwrap();

    assert_eq!(store.get(&ticks).unwrap(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

/// A failing write restores everything it touched and notifies nobody.
#[test]
fn failed_write_rolls_back() {
    let store = Store::new();
    let a = atom(1);
    let b = atom(2);
    let calls = counter();

    let sum = {
        let (a, b) = (a.clone(), b.clone());
        derived(move |get| Ok(get.get(&a)? + get.get(&b)?))
    };
    let transfer = {
        let (a, b) = (a.clone(), b.clone());
        write_only((), move |set, amount: i32| {
            set.set(&a, SetStateAction::update(move |n: &i32| n - amount))?;
            let remaining = set.get(&a)?;
            if remaining < 0 {
                return Err(AtomError::msg("insufficient funds"));
            }
            set.set(&b, SetStateAction::update(move |n: &i32| n + amount))?;
            Ok(remaining)
        })
    };

    let _sub = {
        let calls = calls.clone();
        store.subscribe(&sum, move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    let err = store.set(&transfer, 5).unwrap_err();
    assert_eq!(err.to_string(), "insufficient funds");
    assert_eq!(store.get(&a).unwrap(), 1);
    assert_eq!(store.get(&b).unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(store.set(&transfer, 1).unwrap(), 0);
    assert_eq!(store.get(&a).unwrap(), 0);
    assert_eq!(store.get(&b).unwrap(), 3);
    assert_eq!(store.get(&sum).unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Writable derived atoms route writes to their sources.
#[test]
fn writable_atom_redirects_writes() {
    let store = Store::new();
    let celsius = atom(0.0_f64);
    let fahrenheit = {
        let (read_from, write_to) = (celsius.clone(), celsius.clone());
        writable(
            move |get, _options| Ok(get.get(&read_from)? * 9.0 / 5.0 + 32.0),
            move |set, f: f64| set.set(&write_to, (f - 32.0) * 5.0 / 9.0),
        )
    };

    assert_eq!(store.get(&fahrenheit).unwrap(), 32.0);
    store.set(&fahrenheit, 212.0).unwrap();
    assert_eq!(store.get(&celsius).unwrap(), 100.0);
    assert_eq!(store.get(&fahrenheit).unwrap(), 212.0);
}

/// Mutually dependent atoms report a cycle instead of recursing.
#[test]
fn cycles_are_detected() {
    let store = Store::new();
    let other: Arc<OnceLock<Atom<i32>>> = Arc::default();

    let ping = {
        let other = other.clone();
        derived(move |get| match other.get() {
            Some(pong) => Ok(get.get(pong)? + 1),
            None => Ok(0),
        })
    };
    let pong = {
        let ping = ping.clone();
        derived(move |get| Ok(get.get(&ping)? + 1))
    };
    let _ = other.set(pong.clone());

    assert!(matches!(store.get(&ping), Err(AtomError::Cycle { atom }) if atom == ping.id()));
}

/// Once a conditional cycle is broken, listeners on its atoms hear writes again.
#[test]
fn listeners_recover_after_a_cycle_is_broken() {
    let store = Store::new();
    let flag = atom(true);
    let other: Arc<OnceLock<Atom<i32>>> = Arc::default();
    let calls = counter();

    let ping = {
        let (flag, other) = (flag.clone(), other.clone());
        derived(move |get| {
            if !get.get(&flag)? {
                return Ok(0);
            }
            match other.get() {
                Some(pong) => Ok(get.get(pong)? + 1),
                None => Ok(0),
            }
        })
    };
    let pong = {
        let ping = ping.clone();
        derived(move |get| Ok(get.get(&ping)? + 1))
    };
    let _ = other.set(pong.clone());

    assert!(matches!(store.get(&ping), Err(AtomError::Cycle { .. })));

    let _sub = {
        let calls = calls.clone();
        store.subscribe(&ping, move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    store.set(&flag, false).unwrap();
    assert_eq!(store.get(&ping).unwrap(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&pong).unwrap(), 1);
}

/// A failed write leaves every cached dependent as it was.
#[test]
fn failed_write_does_not_recompute_dependents() {
    let store = Store::new();
    let a = atom(1);
    let runs = counter();
    let doubled = {
        let (a, runs) = (a.clone(), runs.clone());
        derived(move |get| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(get.get(&a)? * 2)
        })
    };
    let aborts = {
        let a = a.clone();
        write_only((), move |set, n: i32| {
            set.set(&a, n)?;
            Err::<(), _>(AtomError::msg("aborted"))
        })
    };

    assert_eq!(store.get(&doubled).unwrap(), 2);
    assert!(store.set(&aborts, 9).is_err());

    let snapshot = store.snapshot();
    assert!(!snapshot.atom(doubled.id()).unwrap().stale);
    assert_eq!(store.get(&doubled).unwrap(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Setting an atom's own value is refused on atoms that compute it.
#[test]
fn derived_atoms_refuse_self_writes() {
    let store = Store::new();
    let source = atom(1);
    let computed_writes = {
        let source = source.clone();
        writable(
            move |get, _options| get.get(&source),
            |set, value: i32| set.set_self_value(value),
        )
    };

    assert!(matches!(
        store.set(&computed_writes, 5),
        Err(AtomError::ReadOnly { atom }) if atom == computed_writes.id()
    ));
    assert_eq!(store.get(&source).unwrap(), 1);
}

/// Write arguments of the wrong type are rejected.
#[test]
fn self_setter_checks_argument_types() {
    let store = Store::new();
    let stash: Arc<Mutex<Option<SetAtom<String>>>> = Arc::default();

    let echo = {
        let stash = stash.clone();
        writable(
            move |_get, options| {
                *stash.lock().unwrap() = Some(options.set_self::<String, ()>());
                Ok(0)
            },
            |_set, _text: i32| Ok(()),
        )
    };
    store.get(&echo).unwrap();

    let set = stash.lock().unwrap().clone().unwrap();
    assert!(matches!(
        set.call("not a number".to_string()),
        Err(AtomError::ArgumentType { .. })
    ));
}

/// The default store is one store for the whole process.
#[test]
fn default_store_identity() {
    let count = atom(7);
    default_store().set(&count, 8).unwrap();

    assert!(default_store().ptr_eq(&store_or_default(None)));
    assert_eq!(store_or_default(None).get(&count).unwrap(), 8);

    let local = Store::new();
    assert_eq!(store_or_default(Some(&local)).get(&count).unwrap(), 7);
}

/// Snapshots describe the graph as JSON.
#[test]
fn snapshot_serializes_graph() {
    let store = Store::new();
    let count = atom(1).with_label("count");
    let doubled = {
        let count = count.clone();
        derived(move |get| Ok(get.get(&count)? * 2)).with_label("doubled")
    };
    let _sub = store.subscribe(&doubled, || {});

    let json: serde_json::Value =
        serde_json::from_str(&store.snapshot().to_json().unwrap()).unwrap();
    let atoms = json["atoms"].as_array().unwrap();
    assert_eq!(atoms.len(), 2);

    let doubled_json = atoms.iter().find(|a| a["label"] == "doubled").unwrap();
    assert_eq!(doubled_json["state"], "ready");
    assert_eq!(doubled_json["listeners"], 1);
    assert_eq!(doubled_json["mounted"], true);
    assert_eq!(doubled_json["dependencies"][0], count.id().raw());
}
