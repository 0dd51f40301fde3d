//! Feature flags with pluggable decision strategies, request-scoped overrides and dual-path
//! execution.
//!
//! Flags are registered with a [Registry] (usually the global one through [register]). Whether a
//! flag is enabled for a request is decided by [Flag::enabled], which consults overrides attached
//! to the request's [Context], the flag's own [Strategy], the registry's strategy and finally the
//! flag's default decision. [switch] and [experiment] run code paths based on a flag, and a
//! [Tracer] can observe all of it.

mod context;
mod decision;
mod error;
mod flag;
mod flag_value;
mod overrides;
mod panic;
mod registry;
mod strategy;
mod switch;
mod test_common;
mod tracer;

pub use context::*;
pub use decision::*;
pub use error::*;
pub use flag::*;
pub use flag_value::*;
pub use overrides::*;
pub use panic::*;
pub use registry::*;
pub use strategy::*;
pub use switch::*;
pub use tracer::*;
