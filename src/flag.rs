use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::context::Context;
use crate::decision::Decision;
use crate::flag_value::{FlagKind, FlagValue};
use crate::overrides;
use crate::registry::RegistryInner;
use crate::strategy::Strategy;
use crate::tracer::{guarded, Tracer};

/// Options used when registering a flag with a [crate::Registry].
///
/// All options are optional. If you do not change any values, the flag:
/// - has an empty description
/// - has no labels
/// - has a default decision of [Decision::NoDecision], which makes it disabled unless a strategy
///   enables it
/// - has no strategy of its own.
#[derive(Clone, Default)]
pub struct FlagOptions {
    description: String,
    labels: BTreeMap<String, serde_json::Value>,
    default_decision: Decision,
    strategy: Option<Arc<dyn Strategy>>,
}

impl FlagOptions {
    /// Creates options with every setting at its default; see [FlagOptions].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a human readable description of the flag.
    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Sets a single label. Setting the same key twice keeps the last value.
    pub fn label(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets several labels at once.
    pub fn labels<I, K, V>(&mut self, labels: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the decision used when neither the flag's strategy nor the registry's strategy
    /// decides.
    pub fn default_decision(&mut self, decision: impl Into<Decision>) -> &mut Self {
        self.default_decision = decision.into();
        self
    }

    /// Sets a strategy that is asked before the registry's strategy.
    pub fn strategy<S>(&mut self, strategy: S) -> &mut Self
    where
        S: Strategy + 'static,
    {
        self.strategy = Some(Arc::new(strategy));
        self
    }
}

pub(crate) struct FlagInner {
    pub(crate) name: String,
    pub(crate) kind: FlagKind,
    description: String,
    labels: BTreeMap<String, serde_json::Value>,
    default_decision: Decision,
    strategy: Option<Arc<dyn Strategy>>,
    pub(crate) registry_id: u64,
    registry: Weak<RegistryInner>,
}

/// Flag is a handle to a flag registered with a [crate::Registry].
///
/// Handles are cheap to clone and compare equal only to clones of themselves. A flag does not
/// keep its registry alive; evaluating a flag after its registry has been dropped behaves as if
/// the registry had no strategy and no tracer.
#[derive(Clone)]
pub struct Flag {
    inner: Arc<FlagInner>,
}

impl Flag {
    pub(crate) fn new(
        name: String,
        kind: FlagKind,
        options: &FlagOptions,
        registry_id: u64,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Flag {
            inner: Arc::new(FlagInner {
                name,
                kind,
                description: options.description.clone(),
                labels: options.labels.clone(),
                default_decision: options.default_decision,
                strategy: options.strategy.clone(),
                registry_id,
                registry,
            }),
        }
    }

    /// Returns the name the flag was registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the description, or an empty string if none was set.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Returns the kind of value the flag was registered with.
    pub fn kind(&self) -> FlagKind {
        self.inner.kind
    }

    /// Returns a copy of the flag's labels, sorted by key.
    pub fn labels(&self) -> BTreeMap<String, serde_json::Value> {
        self.inner.labels.clone()
    }

    /// Returns the label stored under `key`.
    pub fn label(&self, key: &str) -> Option<&serde_json::Value> {
        self.inner.labels.get(key)
    }

    /// Returns the decision used when no strategy decides.
    pub fn default_decision(&self) -> Decision {
        self.inner.default_decision
    }

    pub(crate) fn registry_id(&self) -> u64 {
        self.inner.registry_id
    }

    /// Reports whether the flag is enabled for `ctx`.
    ///
    /// The first decided value wins, in this order:
    /// 1. a boolean override attached to `ctx` with [crate::Registry::with_values]
    /// 2. the strategy given in the flag's [FlagOptions]
    /// 3. the registry's strategy
    /// 4. the flag's default decision.
    ///
    /// If none of them decides, the flag is disabled. The final decision is reported to the
    /// registry's [Tracer], if any.
    pub fn enabled(&self, ctx: &Context) -> bool {
        self.decide(ctx).is_enabled()
    }

    /// Like [Flag::enabled] but returns the resolved decision, which is never
    /// [Decision::NoDecision].
    pub fn decide(&self, ctx: &Context) -> Decision {
        let handle = self.tracer();
        self.decide_with(ctx, handle.as_deref().map(|t| &**t))
    }

    /// Like [Flag::decide] but reports to `tracer` instead of loading the registry's tracer.
    pub(crate) fn decide_with(&self, ctx: &Context, tracer: Option<&dyn Tracer>) -> Decision {
        let registry = self.inner.registry.upgrade();
        let decision = self.resolve(ctx, registry.as_deref());

        if let Some(tracer) = tracer {
            guarded("decision", self, || tracer.decision(ctx, self, decision));
        }

        decision
    }

    fn resolve(&self, ctx: &Context, registry: Option<&RegistryInner>) -> Decision {
        if self.inner.kind == FlagKind::Bool {
            if let Some(FlagValue::Bool(enabled)) =
                overrides::lookup_value(ctx, self.registry_id(), self.name(), FlagKind::Bool)
            {
                return Decision::from(*enabled);
            }
        }

        let flag_decision = match &self.inner.strategy {
            Some(strategy) => strategy.decide(ctx, self),
            None => Decision::NoDecision,
        };

        flag_decision
            .or_else(|| registry.map_or(Decision::NoDecision, |r| r.decide(ctx, self)))
            .or(self.inner.default_decision)
            .or(Decision::Disabled)
    }

    pub(crate) fn tracer(&self) -> Option<Arc<Box<dyn Tracer>>> {
        self.inner.registry.upgrade()?.tracer()
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Flag {}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("description", &self.inner.description)
            .field("labels", &self.inner.labels)
            .field("default_decision", &self.inner.default_decision)
            .finish()
    }
}
