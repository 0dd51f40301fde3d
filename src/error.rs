use thiserror::Error;

use crate::flag_value::FlagKind;

/// Error type returned by branch functions run through [crate::switch()] and [crate::experiment].
///
/// Any error that is `Send + Sync` converts into it with `?` or `.into()`, including
/// [crate::PanicError].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error describes a misconfiguration detected while registering flags or attaching overrides.
///
/// These are programming mistakes rather than runtime conditions. The panicking entry points
/// ([crate::Registry::register], [crate::Registry::with_values]) raise them as panics; the
/// `try_` variants return them instead.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// A flag was registered with an empty name.
    #[error("flag name must not be empty")]
    EmptyName,
    /// A flag with the same name is already registered with the registry.
    #[error("duplicate flag: {0}")]
    DuplicateFlag(String),
    /// An override referenced a flag that is not registered with the registry.
    #[error("flag {0:?} not found")]
    UnknownFlag(String),
    /// An override value does not have the kind the flag was registered with.
    #[error("invalid value kind for flag {name:?}: expected {expected}, got {actual}")]
    KindMismatch {
        /// Name of the flag.
        name: String,
        /// Kind the flag was registered with.
        expected: FlagKind,
        /// Kind of the rejected value.
        actual: FlagKind,
    },
}
