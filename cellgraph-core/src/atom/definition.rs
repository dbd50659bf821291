//! Atom Definitions
//!
//! An atom definition is an immutable descriptor: a compute function (or an
//! initial value for primitive atoms), an optional write function and an
//! optional mount hook. It carries no runtime state; every store keeps its
//! own record per definition.
//!
//! # Typed handles over erased definitions
//!
//! Stores hold definitions of many value types in one arena, so the
//! definition itself is type-erased (`AtomDef`). The public handles
//! [`Atom<T>`] and [`WritableAtom<T, A, R>`] carry the value, argument and
//! result types and downcast at the store boundary.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use futures_util::future::{BoxFuture, FutureExt};

use super::action::SetStateAction;
use super::id::AtomId;
use crate::error::AtomError;
use crate::store::{Getter, ReadOptions, SetAtom, SetSelf, Setter};

/// Bound shared by every value stored in an atom.
///
/// `PartialEq` lets the store skip writes and recomputations that leave the
/// value unchanged.
pub trait Value: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + PartialEq + Send + Sync + 'static {}

/// Teardown returned by a mount hook, run when the atom unmounts.
pub type OnUnmount = Box<dyn FnOnce() + Send>;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;
pub(crate) type AnyArgs = Box<dyn Any + Send>;
pub(crate) type AnyResult = Box<dyn Any + Send>;

/// Result of running a compute function once.
pub(crate) enum Evaluated {
    Ready(AnyValue),
    Pending(BoxFuture<'static, Result<AnyValue, AtomError>>),
}

pub(crate) type ReadFn =
    Box<dyn Fn(&mut Getter<'_>, &ReadOptions) -> Result<Evaluated, AtomError> + Send + Sync>;
pub(crate) type WriteFn =
    Box<dyn Fn(&Setter<'_>, AnyArgs) -> Result<AnyResult, AtomError> + Send + Sync>;
pub(crate) type MountFn = Box<dyn Fn(SetSelf) -> Option<OnUnmount> + Send + Sync>;

/// Where an atom's value comes from.
pub(crate) enum Source {
    /// Holds a value directly, seeded from the initial value.
    Primitive(AnyValue),
    /// Computed from other atoms.
    Derived(ReadFn),
}

/// The type-erased definition shared by all handles and stores.
pub(crate) struct AtomDef {
    pub(crate) id: AtomId,
    label: OnceLock<String>,
    pub(crate) source: Source,
    pub(crate) write: Option<WriteFn>,
    pub(crate) on_mount: OnceLock<MountFn>,
    pub(crate) eq: fn(&dyn Any, &dyn Any) -> bool,
}

impl AtomDef {
    fn new<T: Value>(source: Source, write: Option<WriteFn>) -> Self {
        Self {
            id: AtomId::new(),
            label: OnceLock::new(),
            source,
            write,
            on_mount: OnceLock::new(),
            eq: erased_eq::<T>,
        }
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }

    pub(crate) fn is_primitive(&self) -> bool {
        matches!(self.source, Source::Primitive(_))
    }
}

impl fmt::Display for AtomDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{}:{}", self.id, label),
            None => write!(f, "{}", self.id),
        }
    }
}

fn erased_eq<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn downcast_value<T: Value>(atom: AtomId, value: &AnyValue) -> Result<T, AtomError> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or(AtomError::TypeMismatch { atom })
}

pub(crate) fn downcast_result<R: 'static>(atom: AtomId, result: AnyResult) -> Result<R, AtomError> {
    result
        .downcast::<R>()
        .map(|result| *result)
        .map_err(|_| AtomError::TypeMismatch { atom })
}

fn downcast_args<A: 'static>(atom: AtomId, args: AnyArgs) -> Result<A, AtomError> {
    args.downcast::<A>()
        .map(|args| *args)
        .map_err(|_| AtomError::ArgumentType { atom })
}

/// A readable atom holding values of type `T`.
///
/// Handles are cheap to clone; clones share the same identity.
pub struct Atom<T> {
    pub(crate) def: Arc<AtomDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Atom<T> {
    fn from_def(def: AtomDef) -> Self {
        Self {
            def: Arc::new(def),
            _marker: PhantomData,
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    /// Get the debug label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.def.label()
    }

    /// Attach a debug label.
    ///
    /// Labels are set once; later calls are ignored.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        if let Err(label) = self.def.label.set(label.into()) {
            tracing::warn!(atom = %self.def, ignored = %label, "atom already has a label");
        }
        self
    }

    /// Returns true if the atom holds its value directly.
    pub fn is_primitive(&self) -> bool {
        self.def.is_primitive()
    }

    /// Returns true if the atom defines a write function.
    pub fn is_writable(&self) -> bool {
        self.def.write.is_some()
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Atom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.def.id == other.def.id
    }
}

impl<T> Eq for Atom<T> {}

impl<T> Hash for Atom<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.def.id.hash(state);
    }
}

impl<T> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.def.id)
            .field("label", &self.def.label())
            .field("primitive", &self.def.is_primitive())
            .field("writable", &self.def.write.is_some())
            .finish()
    }
}

impl<T> fmt::Display for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.def, f)
    }
}

/// An atom that also accepts writes with arguments `A`, returning `R`.
///
/// Dereferences to [`Atom<T>`] so it can be read wherever a plain atom can.
pub struct WritableAtom<T, A, R = ()> {
    atom: Atom<T>,
    _marker: PhantomData<fn(A) -> R>,
}

/// A primitive atom: holds a value and accepts [`SetStateAction`]s.
pub type PrimitiveAtom<T> = WritableAtom<T, SetStateAction<T>, ()>;

impl<T, A, R> WritableAtom<T, A, R> {
    fn from_def(def: AtomDef) -> Self {
        Self {
            atom: Atom::from_def(def),
            _marker: PhantomData,
        }
    }

    /// Borrow the readable view of this atom.
    pub fn as_atom(&self) -> &Atom<T> {
        &self.atom
    }

    /// Attach a debug label.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        Self {
            atom: self.atom.with_label(label),
            _marker: PhantomData,
        }
    }
}

impl<T, A, R> WritableAtom<T, A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Attach a mount hook.
    ///
    /// The hook runs once per store when the atom gains its first observer
    /// (a listener or a mounted dependent) and receives a setter bound to
    /// this atom. The returned teardown runs when the last observer leaves.
    /// Hooks are set once; later calls are ignored.
    pub fn with_on_mount<F>(self, on_mount: F) -> Self
    where
        F: Fn(SetAtom<A, R>) -> Option<OnUnmount> + Send + Sync + 'static,
    {
        let hook: MountFn = Box::new(move |set_self: SetSelf| on_mount(SetAtom::new(set_self)));
        if self.atom.def.on_mount.set(hook).is_err() {
            tracing::warn!(atom = %self.atom.def, "atom already has a mount hook");
        }
        self
    }
}

impl<T, A, R> Deref for WritableAtom<T, A, R> {
    type Target = Atom<T>;

    fn deref(&self) -> &Atom<T> {
        &self.atom
    }
}

impl<T, A, R> Clone for WritableAtom<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, A, R> fmt::Debug for WritableAtom<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.atom, f)
    }
}

impl<T, A, R> fmt::Display for WritableAtom<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.atom, f)
    }
}

// ----------------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------------

fn primitive_write<T: Value>() -> WriteFn {
    Box::new(|set: &Setter<'_>, args: AnyArgs| -> Result<AnyResult, AtomError> {
        let action = downcast_args::<SetStateAction<T>>(set.atom(), args)?;
        let current: T = set.self_value()?;
        set.set_self_value(action.apply(&current))?;
        Ok(Box::new(()) as AnyResult)
    })
}

fn erase_write<A, R, W>(write: W) -> WriteFn
where
    A: Send + 'static,
    R: Send + 'static,
    W: Fn(&Setter<'_>, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    Box::new(move |set: &Setter<'_>, args: AnyArgs| -> Result<AnyResult, AtomError> {
        let args = downcast_args::<A>(set.atom(), args)?;
        write(set, args).map(|result| Box::new(result) as AnyResult)
    })
}

fn erase_async<T, F, Fut>(read: F) -> ReadFn
where
    T: Value,
    F: Fn(&mut Getter<'_>, &ReadOptions) -> Result<Fut, AtomError> + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
{
    Box::new(move |get: &mut Getter<'_>, options: &ReadOptions| -> Result<Evaluated, AtomError> {
        let future = read(get, options)?;
        let erased = async move { future.await.map(|value| Arc::new(value) as AnyValue) };
        Ok(Evaluated::Pending(erased.boxed()))
    })
}

/// Create a primitive atom seeded with `initial`.
///
/// ```rust
/// use cellgraph_core::{atom, Store};
///
/// let count = atom(1);
/// let store = Store::new();
/// store.set(&count, 5).unwrap();
/// assert_eq!(store.get(&count).unwrap(), 5);
/// ```
pub fn atom<T: Value>(initial: T) -> PrimitiveAtom<T> {
    let source = Source::Primitive(Arc::new(initial));
    WritableAtom::from_def(AtomDef::new::<T>(source, Some(primitive_write::<T>())))
}

/// Create a read-only atom computed from other atoms.
pub fn derived<T, F>(read: F) -> Atom<T>
where
    T: Value,
    F: Fn(&mut Getter<'_>) -> Result<T, AtomError> + Send + Sync + 'static,
{
    let read: ReadFn = Box::new(
        move |get: &mut Getter<'_>, _options: &ReadOptions| -> Result<Evaluated, AtomError> {
            read(get).map(|value| Evaluated::Ready(Arc::new(value)))
        },
    );
    Atom::from_def(AtomDef::new::<T>(Source::Derived(read), None))
}

/// Create a read-only atom whose value is produced by a future.
///
/// The closure runs synchronously under dependency tracking and returns the
/// future; reads must happen before the future is built.
pub fn derived_async<T, F, Fut>(read: F) -> Atom<T>
where
    T: Value,
    F: Fn(&mut Getter<'_>, &ReadOptions) -> Result<Fut, AtomError> + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
{
    Atom::from_def(AtomDef::new::<T>(Source::Derived(erase_async(read)), None))
}

/// Create a derived atom that also accepts writes.
pub fn writable<T, A, R, F, W>(read: F, write: W) -> WritableAtom<T, A, R>
where
    T: Value,
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(&mut Getter<'_>, &ReadOptions) -> Result<T, AtomError> + Send + Sync + 'static,
    W: Fn(&Setter<'_>, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    let read: ReadFn = Box::new(
        move |get: &mut Getter<'_>, options: &ReadOptions| -> Result<Evaluated, AtomError> {
            read(get, options).map(|value| Evaluated::Ready(Arc::new(value)))
        },
    );
    let def = AtomDef::new::<T>(Source::Derived(read), Some(erase_write(write)));
    WritableAtom::from_def(def)
}

/// Create an async derived atom that also accepts writes.
pub fn writable_async<T, A, R, F, Fut, W>(read: F, write: W) -> WritableAtom<T, A, R>
where
    T: Value,
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(&mut Getter<'_>, &ReadOptions) -> Result<Fut, AtomError> + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
    W: Fn(&Setter<'_>, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    let def = AtomDef::new::<T>(Source::Derived(erase_async(read)), Some(erase_write(write)));
    WritableAtom::from_def(def)
}

/// Create an atom that holds `initial` but routes writes through `write`.
///
/// The write function may replace the atom's own value with
/// [`Setter::set_self_value`].
pub fn write_only<T, A, R, W>(initial: T, write: W) -> WritableAtom<T, A, R>
where
    T: Value,
    A: Send + 'static,
    R: Send + 'static,
    W: Fn(&Setter<'_>, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    let source = Source::Primitive(Arc::new(initial));
    WritableAtom::from_def(AtomDef::new::<T>(source, Some(erase_write(write))))
}
