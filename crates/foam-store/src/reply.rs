//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Helper reply separating an unreachable store from an empty answer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Result of a helper call that distinguishes "store down" from an empty
/// answer. `Value(None)` is an absent key; `Unavailable` means the store
/// could not be reached.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// The store could not be reached.
    Unavailable,
    /// The store answered.
    Value(T),
}

impl<T> Reply<T> {
    /// True when the store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Reply::Unavailable)
    }

    /// The answer, if the store was reachable.
    pub fn value(self) -> Option<T> {
        match self {
            Reply::Unavailable => None,
            Reply::Value(value) => Some(value),
        }
    }

    /// Borrowing variant of [`Reply::value`].
    pub fn as_ref(&self) -> Reply<&T> {
        match self {
            Reply::Unavailable => Reply::Unavailable,
            Reply::Value(value) => Reply::Value(value),
        }
    }

    /// Transform the answer, keeping `Unavailable` as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Unavailable => Reply::Unavailable,
            Reply::Value(value) => Reply::Value(f(value)),
        }
    }

    /// The answer, or `default` when the store was down.
    pub fn unwrap_or(self, default: T) -> T {
        self.value().unwrap_or(default)
    }
}

impl<T> From<T> for Reply<T> {
    fn from(value: T) -> Self {
        Reply::Value(value)
    }
}
