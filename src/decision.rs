use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Decision is the verdict a [crate::Strategy] reaches about a flag.
///
/// [Decision::NoDecision] means the strategy has no opinion and evaluation should move on to
/// the next source (see [crate::Flag::enabled]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No opinion; defer to the next strategy or to the flag's default.
    #[default]
    NoDecision,
    /// The flag is off.
    Disabled,
    /// The flag is on.
    Enabled,
}

impl Decision {
    /// Returns true if this is [Decision::Enabled].
    pub fn is_enabled(self) -> bool {
        self == Decision::Enabled
    }

    /// Returns true if this is not [Decision::NoDecision].
    pub fn is_decided(self) -> bool {
        self != Decision::NoDecision
    }

    /// Returns `self` if it is decided, otherwise `other`.
    pub fn or(self, other: Decision) -> Decision {
        if self.is_decided() {
            self
        } else {
            other
        }
    }

    /// Returns `self` if it is decided, otherwise the result of `f`.
    ///
    /// Unlike [Decision::or], `f` is only called when needed.
    pub fn or_else<F>(self, f: F) -> Decision
    where
        F: FnOnce() -> Decision,
    {
        if self.is_decided() {
            self
        } else {
            f()
        }
    }
}

impl From<bool> for Decision {
    fn from(enabled: bool) -> Self {
        if enabled {
            Decision::Enabled
        } else {
            Decision::Disabled
        }
    }
}

impl From<Option<bool>> for Decision {
    fn from(enabled: Option<bool>) -> Self {
        enabled.map_or(Decision::NoDecision, Decision::from)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::NoDecision => write!(f, "NoDecision"),
            Decision::Disabled => write!(f, "Disabled"),
            Decision::Enabled => write!(f, "Enabled"),
        }
    }
}

// Decision files written by hand are usually plain `name -> bool` maps, so accept booleans and
// null alongside the serialized variant names.
impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        enum Named {
            NoDecision,
            Disabled,
            Enabled,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Named(Named),
            Null(()),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bool(b) => b.into(),
            Repr::Named(Named::NoDecision) | Repr::Null(()) => Decision::NoDecision,
            Repr::Named(Named::Disabled) => Decision::Disabled,
            Repr::Named(Named::Enabled) => Decision::Enabled,
        })
    }
}
