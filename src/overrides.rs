use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::context::{Context, Key};
use crate::error::Error;
use crate::flag::{Flag, FlagOptions};
use crate::flag_value::{FlagKind, FlagType, FlagValue};
use crate::registry::Registry;

type OverrideMap = HashMap<String, FlagValue>;

/// Override forces the value of a single flag for every evaluation made with a context it was
/// attached to (see [Registry::with_values]).
#[derive(Clone, Debug, PartialEq)]
pub struct Override {
    name: String,
    value: FlagValue,
}

impl Override {
    /// Creates an override for the flag named `name`. The value's kind must match the kind the
    /// flag was registered with; a plain boolean flag takes a `bool`.
    pub fn new(name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        Override {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the name of the overridden flag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value the flag is forced to.
    pub fn value(&self) -> &FlagValue {
        &self.value
    }
}

/// Returns the override for flag `name` of the registry identified by `registry_id`, if one is
/// attached to `ctx` and has the expected kind.
pub(crate) fn lookup_value<'a>(
    ctx: &'a Context,
    registry_id: u64,
    name: &str,
    kind: FlagKind,
) -> Option<&'a FlagValue> {
    ctx.lookup(Key::Overrides(registry_id))
        .and_then(|m| m.downcast_ref::<OverrideMap>())
        .and_then(|m| m.get(name))
        .filter(|v| v.kind() == kind)
}

impl Registry {
    /// Returns a new context based on `ctx` in which the given overrides take precedence over
    /// the strategies and defaults of this registry's flags.
    ///
    /// Overrides already attached to `ctx` are kept unless overridden again. Neither `ctx` nor
    /// any context derived from it earlier is affected.
    ///
    /// # Panics
    ///
    /// Panics if an override names a flag that is not registered, or if its value does not
    /// have the flag's kind. Use [Registry::try_with_values] to handle these cases as errors.
    pub fn with_values<I>(&self, ctx: &Context, overrides: I) -> Context
    where
        I: IntoIterator<Item = Override>,
    {
        match self.try_with_values(ctx, overrides) {
            Ok(ctx) => ctx,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [Registry::with_values] for a single override.
    pub fn with_value(&self, ctx: &Context, value: Override) -> Context {
        self.with_values(ctx, [value])
    }

    /// Like [Registry::with_values] but returns an error instead of panicking. Nothing is
    /// attached if any override is invalid.
    pub fn try_with_values<I>(&self, ctx: &Context, overrides: I) -> Result<Context, Error>
    where
        I: IntoIterator<Item = Override>,
    {
        let mut overrides = overrides.into_iter().peekable();
        if overrides.peek().is_none() {
            return Ok(ctx.clone());
        }

        let id = self.inner().id;
        let mut map: OverrideMap = ctx
            .lookup(Key::Overrides(id))
            .and_then(|m| m.downcast_ref::<OverrideMap>())
            .cloned()
            .unwrap_or_default();

        for Override { name, value } in overrides {
            let flag = self
                .inner()
                .get(&name)
                .ok_or_else(|| Error::UnknownFlag(name.clone()))?;

            if flag.kind() != value.kind() {
                return Err(Error::KindMismatch {
                    name,
                    expected: flag.kind(),
                    actual: value.kind(),
                });
            }

            debug!("overriding flag {} with {:?}", name, value);
            map.insert(name, value);
        }

        Ok(ctx.derive(Key::Overrides(id), Arc::new(map)))
    }

    /// Registers a flag holding a value of type `T`, with `default` as the value when no
    /// override applies.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or already registered; see [Registry::try_value].
    pub fn value<T>(
        &self,
        name: impl Into<String>,
        options: &FlagOptions,
        default: T,
    ) -> ValueFlag<T>
    where
        T: FlagType,
    {
        self.value_fn(name, options, move |_: &Context| default.clone())
    }

    /// Registers a flag holding a value of type `T` that is computed by `f` when no override
    /// applies.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or already registered; see [Registry::try_value_fn].
    pub fn value_fn<T, F>(
        &self,
        name: impl Into<String>,
        options: &FlagOptions,
        f: F,
    ) -> ValueFlag<T>
    where
        T: FlagType,
        F: Fn(&Context) -> T + Send + Sync + 'static,
    {
        match self.try_value_fn(name, options, f) {
            Ok(flag) => flag,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [Registry::value] but returns an error instead of panicking.
    pub fn try_value<T>(
        &self,
        name: impl Into<String>,
        options: &FlagOptions,
        default: T,
    ) -> Result<ValueFlag<T>, Error>
    where
        T: FlagType,
    {
        self.try_value_fn(name, options, move |_: &Context| default.clone())
    }

    /// Like [Registry::value_fn] but returns an error instead of panicking.
    pub fn try_value_fn<T, F>(
        &self,
        name: impl Into<String>,
        options: &FlagOptions,
        f: F,
    ) -> Result<ValueFlag<T>, Error>
    where
        T: FlagType,
        F: Fn(&Context) -> T + Send + Sync + 'static,
    {
        let flag = self.add(name.into(), T::KIND, options)?;
        Ok(ValueFlag {
            flag,
            default: Arc::new(f),
        })
    }
}

/// ValueFlag is a typed accessor for a flag registered with [Registry::value] or
/// [Registry::value_fn].
pub struct ValueFlag<T> {
    flag: Flag,
    default: Arc<dyn Fn(&Context) -> T + Send + Sync>,
}

impl<T: FlagType> ValueFlag<T> {
    /// Returns the flag's value for `ctx`: the override attached to `ctx` if there is one,
    /// otherwise the registered default.
    pub fn get(&self, ctx: &Context) -> T {
        lookup_value(ctx, self.flag.registry_id(), self.flag.name(), T::KIND)
            .and_then(T::from_flag_value)
            .unwrap_or_else(|| (self.default)(ctx))
    }

    /// Returns the underlying flag handle.
    pub fn flag(&self) -> &Flag {
        &self.flag
    }
}

impl<T> Clone for ValueFlag<T> {
    fn clone(&self) -> Self {
        ValueFlag {
            flag: self.flag.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T> fmt::Debug for ValueFlag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueFlag")
            .field("flag", &self.flag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::strategy::Fixed;
    use serde_json::json;
    use spectral::prelude::*;
    use std::thread;
    use std::time::Duration;
    use test_case::test_case;

    #[test]
    fn override_is_scoped_to_derived_context() {
        let registry = Registry::new();
        let flag = registry.register("f", FlagOptions::new().default_decision(false));

        let ctx1 = Context::background();
        let ctx2 = registry.with_values(&ctx1, [Override::new("f", true)]);

        assert_that!(flag.enabled(&ctx1)).is_false();
        assert_that!(flag.enabled(&ctx2)).is_true();

        let ctx3 = registry.with_values(&ctx2, [Override::new("f", false)]);
        assert_that!(flag.enabled(&ctx3)).is_false();
        assert_that!(flag.enabled(&ctx2)).is_true();
        assert_that!(flag.enabled(&ctx1)).is_false();
    }

    #[test]
    fn override_beats_strategies() {
        let registry = Registry::new();
        registry.set_strategy(Fixed::disabled());
        let flag = registry.register("f", FlagOptions::new().strategy(Fixed::disabled()));

        let ctx = registry.with_value(&Context::background(), Override::new("f", true));
        assert_that!(flag.decide(&ctx)).is_equal_to(Decision::Enabled);
    }

    #[test]
    fn later_overrides_keep_earlier_ones() {
        let registry = Registry::new();
        let a = registry.register("a", &FlagOptions::new());
        let limit = registry.value("limit", &FlagOptions::new(), 10i64);

        let ctx = registry.with_value(&Context::background(), Override::new("a", true));
        let ctx = registry.with_value(&ctx, Override::new("limit", 20i64));

        assert_that!(a.enabled(&ctx)).is_true();
        assert_that!(limit.get(&ctx)).is_equal_to(20);
    }

    #[test]
    fn siblings_do_not_see_each_other() {
        let registry = Registry::new();
        let name = registry.value("name", &FlagOptions::new(), String::from("default"));

        let parent = Context::background();
        let left = registry.with_value(&parent, Override::new("name", "left"));
        let right = registry.with_value(&parent, Override::new("name", "right"));

        assert_that!(name.get(&parent)).is_equal_to("default".to_string());
        assert_that!(name.get(&left)).is_equal_to("left".to_string());
        assert_that!(name.get(&right)).is_equal_to("right".to_string());
    }

    #[test]
    fn overrides_are_per_registry() {
        let a = Registry::new();
        let b = Registry::new();
        let fa = a.register("same", &FlagOptions::new());
        let fb = b.register("same", &FlagOptions::new());

        let ctx = a.with_value(&Context::background(), Override::new("same", true));

        assert_that!(fa.enabled(&ctx)).is_true();
        assert_that!(fb.enabled(&ctx)).is_false();
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let registry = Registry::new();
        registry.register("known", &FlagOptions::new());

        let result = registry.try_with_values(
            &Context::background(),
            [Override::new("known", true), Override::new("unknown", true)],
        );
        assert_that!(result.map(|_| ())).is_err_containing(Error::UnknownFlag("unknown".into()));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let registry = Registry::new();
        registry.value("timeout", &FlagOptions::new(), Duration::from_secs(1));

        let result =
            registry.try_with_values(&Context::background(), [Override::new("timeout", 5i64)]);
        assert_that!(result.map(|_| ())).is_err_containing(Error::KindMismatch {
            name: "timeout".into(),
            expected: FlagKind::Duration,
            actual: FlagKind::Int,
        });
    }

    #[test]
    fn invalid_override_panics() {
        let registry = Registry::new();
        registry.register("flag", &FlagOptions::new());

        let r = registry.clone();
        let joined = thread::spawn(move || {
            r.with_values(&Context::background(), [Override::new("flag", "yes")]);
        })
        .join();
        assert_that!(joined.is_err()).is_true();
    }

    #[test]
    fn empty_overrides_return_same_values() {
        let registry = Registry::new();
        let flag = registry.register("f", &FlagOptions::new());
        let ctx = registry.with_value(&Context::background(), Override::new("f", true));

        let same = registry.with_values(&ctx, Vec::new());
        assert_that!(flag.enabled(&same)).is_true();
    }

    #[test]
    fn value_fn_is_called_without_override() {
        struct Region(&'static str);

        let registry = Registry::new();
        let region = registry.value_fn("region", &FlagOptions::new(), |ctx: &Context| {
            ctx.value::<Region>().map_or("unknown", |r| r.0).to_string()
        });

        let eu = Context::background().with_value(Region("eu"));
        assert_that!(region.get(&Context::background())).is_equal_to("unknown".to_string());
        assert_that!(region.get(&eu)).is_equal_to("eu".to_string());

        let forced = registry.with_value(&eu, Override::new("region", "us"));
        assert_that!(region.get(&forced)).is_equal_to("us".to_string());
    }

    #[test_case(Override::new("b", true) ; "bool")]
    #[test_case(Override::new("i", -1i64) ; "int")]
    #[test_case(Override::new("u", 1u64) ; "uint")]
    #[test_case(Override::new("f", 1.5f64) ; "float")]
    #[test_case(Override::new("s", "str") ; "string")]
    #[test_case(Override::new("d", Duration::from_millis(5)) ; "duration")]
    #[test_case(Override::new("j", json!({"k": [1]})) ; "json")]
    fn every_kind_can_be_overridden(value: Override) {
        let registry = Registry::new();
        let options = FlagOptions::new();
        let b = registry.value("b", &options, false);
        let i = registry.value("i", &options, 0i64);
        let u = registry.value("u", &options, 0u64);
        let f = registry.value("f", &options, 0f64);
        let s = registry.value("s", &options, String::new());
        let d = registry.value("d", &options, Duration::ZERO);
        let j = registry.value("j", &options, serde_json::Value::Null);

        let ctx = registry.with_value(&Context::background(), value.clone());
        let got = match value.name() {
            "b" => b.get(&ctx).into_flag_value(),
            "i" => i.get(&ctx).into_flag_value(),
            "u" => u.get(&ctx).into_flag_value(),
            "f" => f.get(&ctx).into_flag_value(),
            "s" => s.get(&ctx).into_flag_value(),
            "d" => d.get(&ctx).into_flag_value(),
            _ => j.get(&ctx).into_flag_value(),
        };
        assert_that!(&got).is_equal_to(value.value());
    }

    #[test]
    fn concurrent_requests_see_their_own_values() {
        let registry = Registry::new();
        let user = registry.value("user", &FlagOptions::new(), 0u64);
        let shared = Context::background();

        thread::scope(|s| {
            for id in 1..=8u64 {
                let registry = &registry;
                let user = &user;
                let shared = &shared;
                s.spawn(move || {
                    let ctx = registry.with_value(shared, Override::new("user", id));
                    for _ in 0..100 {
                        assert_eq!(user.get(&ctx), id);
                    }
                });
            }
        });

        assert_that!(user.get(&shared)).is_equal_to(0);
    }
}
