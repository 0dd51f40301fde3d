use std::fmt;
use std::time::Duration;

use log::warn;
use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};

/// FlagKind is the type of value a flag was registered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Boolean flags, including every flag created with [crate::Registry::register].
    Bool,
    /// Signed integer flags.
    Int,
    /// Unsigned integer flags.
    Uint,
    /// Floating point flags.
    Float,
    /// String flags.
    String,
    /// Duration flags.
    Duration,
    /// Arbitrary JSON flags.
    Json,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlagKind::Bool => "bool",
            FlagKind::Int => "int",
            FlagKind::Uint => "uint",
            FlagKind::Float => "float",
            FlagKind::String => "string",
            FlagKind::Duration => "duration",
            FlagKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// FlagValue is a dynamically typed flag value, as carried by an [crate::Override].
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Duration(#[serde_as(as = "DurationSecondsWithFrac<f64>")] Duration),
    Json(serde_json::Value),
}

impl FlagValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> FlagKind {
        match self {
            FlagValue::Bool(_) => FlagKind::Bool,
            FlagValue::Int(_) => FlagKind::Int,
            FlagValue::Uint(_) => FlagKind::Uint,
            FlagValue::Float(_) => FlagKind::Float,
            FlagValue::Str(_) => FlagKind::String,
            FlagValue::Duration(_) => FlagKind::Duration,
            FlagValue::Json(_) => FlagKind::Json,
        }
    }

    /// Returns the value if it is a bool; logs a warning and returns None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("flag value is not bool but {:?}", self);
                None
            }
        }
    }

    /// Returns the value if it is a signed integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            _ => {
                warn!("flag value is not int but {:?}", self);
                None
            }
        }
    }

    /// Returns the value if it is an unsigned integer.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FlagValue::Uint(u) => Some(*u),
            _ => {
                warn!("flag value is not uint but {:?}", self);
                None
            }
        }
    }

    /// Returns the value if it is a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            _ => {
                warn!("flag value is not float but {:?}", self);
                None
            }
        }
    }

    /// Returns a copy of the value if it is a string.
    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("flag value is not str but {:?}", self);
                None
            }
        }
    }

    /// Returns the value if it is a duration.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            FlagValue::Duration(d) => Some(*d),
            _ => {
                warn!("flag value is not duration but {:?}", self);
                None
            }
        }
    }

    /// Returns the value as JSON. Every kind has a JSON form; durations become fractional seconds.
    pub fn as_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Value::from(*b),
            FlagValue::Int(i) => Value::from(*i),
            FlagValue::Uint(u) => Value::from(*u),
            FlagValue::Float(f) => Value::from(*f),
            FlagValue::Str(s) => Value::from(s.as_str()),
            FlagValue::Duration(d) => Value::from(d.as_secs_f64()),
            FlagValue::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> FlagValue {
        FlagValue::Int(i)
    }
}

impl From<u64> for FlagValue {
    fn from(u: u64) -> FlagValue {
        FlagValue::Uint(u)
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Float(f)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_owned())
    }
}

impl From<Duration> for FlagValue {
    fn from(d: Duration) -> FlagValue {
        FlagValue::Duration(d)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> FlagValue {
        FlagValue::Json(v)
    }
}

/// FlagType is implemented by every Rust type that can back a value flag (see
/// [crate::Registry::value]).
pub trait FlagType: Clone + Send + Sync + 'static {
    /// Kind flags of this type are registered with.
    const KIND: FlagKind;

    /// Extracts a value of this type, or None if `value` has a different kind.
    fn from_flag_value(value: &FlagValue) -> Option<Self>;

    /// Wraps this value.
    fn into_flag_value(self) -> FlagValue;
}

macro_rules! flag_type {
    ($t:ty, $kind:ident, $accessor:ident) => {
        impl FlagType for $t {
            const KIND: FlagKind = FlagKind::$kind;

            fn from_flag_value(value: &FlagValue) -> Option<Self> {
                value.$accessor()
            }

            fn into_flag_value(self) -> FlagValue {
                self.into()
            }
        }
    };
}

flag_type!(bool, Bool, as_bool);
flag_type!(i64, Int, as_int);
flag_type!(u64, Uint, as_uint);
flag_type!(f64, Float, as_float);
flag_type!(String, String, as_string);
flag_type!(Duration, Duration, as_duration);

impl FlagType for serde_json::Value {
    const KIND: FlagKind = FlagKind::Json;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Json(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Json(self)
    }
}
