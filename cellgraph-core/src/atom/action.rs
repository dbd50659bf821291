//! Arguments accepted by the default write of a primitive atom.

use std::fmt;

/// Either a replacement value or an updater applied to the current value.
pub enum SetStateAction<T> {
    /// Replace the current value.
    Value(T),
    /// Compute the next value from the current one.
    Update(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> SetStateAction<T> {
    /// Build an updater action.
    pub fn update<F>(f: F) -> Self
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Self::Update(Box::new(f))
    }

    /// Resolve the action against the current value.
    pub fn apply(self, current: &T) -> T {
        match self {
            Self::Value(value) => value,
            Self::Update(f) => f(current),
        }
    }
}

impl<T> From<T> for SetStateAction<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for SetStateAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Update(_) => f.write_str("Update(..)"),
        }
    }
}
