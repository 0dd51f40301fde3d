use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lazy_static::lazy_static;
use log::debug;
use parking_lot::Mutex;

use crate::context::Context;
use crate::decision::Decision;
use crate::error::Error;
use crate::flag::{Flag, FlagOptions};
use crate::flag_value::FlagKind;
use crate::overrides::Override;
use crate::strategy::Strategy;
use crate::tracer::Tracer;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref GLOBAL: Registry = Registry::new();
}

pub(crate) struct RegistryInner {
    pub(crate) id: u64,
    flags: Mutex<BTreeMap<String, Flag>>,
    strategy: ArcSwapOption<Box<dyn Strategy>>,
    tracer: ArcSwapOption<Box<dyn Tracer>>,
}

impl RegistryInner {
    pub(crate) fn decide(&self, ctx: &Context, flag: &Flag) -> Decision {
        // Own the strategy while it runs so a concurrent swap never waits on a slow strategy.
        match self.strategy.load_full() {
            Some(strategy) => strategy.decide(ctx, flag),
            None => Decision::NoDecision,
        }
    }

    pub(crate) fn tracer(&self) -> Option<Arc<Box<dyn Tracer>>> {
        self.tracer.load_full()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Flag> {
        self.flags.lock().get(name).cloned()
    }
}

/// Registry is a set of uniquely named flags sharing one [Strategy] and one [Tracer].
///
/// A registry is a cheap handle; clones refer to the same set. Most programs use the process-wide
/// [Registry::global] through the free functions of this crate ([crate::register],
/// [crate::set_strategy], ...). Independent registries are useful to isolate tests or
/// subsystems.
///
/// The strategy and tracer can be replaced at any time, also while other threads evaluate flags.
/// An evaluation sees either the old or the new strategy, never a mix.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry with no strategy and no tracer.
    pub fn new() -> Self {
        Registry {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                flags: Mutex::new(BTreeMap::new()),
                strategy: ArcSwapOption::empty(),
                tracer: ArcSwapOption::empty(),
            }),
        }
    }

    /// Returns the process-wide default registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Registers a new boolean flag.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or a flag with the same name is already registered. Use
    /// [Registry::try_register] to handle these cases as errors.
    pub fn register(&self, name: impl Into<String>, options: &FlagOptions) -> Flag {
        match self.try_register(name, options) {
            Ok(flag) => flag,
            Err(err) => panic!("{}", err),
        }
    }

    /// Registers a new boolean flag, returning an error if `name` is empty or already taken.
    pub fn try_register(
        &self,
        name: impl Into<String>,
        options: &FlagOptions,
    ) -> Result<Flag, Error> {
        self.add(name.into(), FlagKind::Bool, options)
    }

    pub(crate) fn add(
        &self,
        name: String,
        kind: FlagKind,
        options: &FlagOptions,
    ) -> Result<Flag, Error> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let mut flags = self.inner.flags.lock();
        if flags.contains_key(&name) {
            return Err(Error::DuplicateFlag(name));
        }

        let flag = Flag::new(
            name.clone(),
            kind,
            options,
            self.inner.id,
            Arc::downgrade(&self.inner),
        );
        flags.insert(name, flag.clone());
        debug!("registered {} flag {}", kind, flag.name());

        Ok(flag)
    }

    /// Returns the flag named `name`, if registered.
    pub fn lookup(&self, name: &str) -> Option<Flag> {
        self.inner.get(name)
    }

    /// Returns all registered flags sorted by name.
    ///
    /// The iterator works on a snapshot taken when this method is called; flags registered
    /// afterwards are not included. Call again to observe them.
    pub fn flags(&self) -> impl Iterator<Item = Flag> {
        let snapshot: Vec<Flag> = self.inner.flags.lock().values().cloned().collect();
        snapshot.into_iter()
    }

    /// Returns the number of registered flags.
    pub fn len(&self) -> usize {
        self.inner.flags.lock().len()
    }

    /// Returns true if no flag is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the strategy used for all flags of this registry.
    pub fn set_strategy<S>(&self, strategy: S)
    where
        S: Strategy + 'static,
    {
        let strategy: Box<dyn Strategy> = Box::new(strategy);
        self.inner.strategy.store(Some(Arc::new(strategy)));
        debug!("strategy replaced on registry {}", self.inner.id);
    }

    /// Removes the strategy; flags fall back to their own strategies and default decisions.
    pub fn clear_strategy(&self) {
        self.inner.strategy.store(None);
        debug!("strategy cleared on registry {}", self.inner.id);
    }

    /// Replaces the tracer notified about evaluations and branch runs of this registry's flags.
    pub fn set_tracer<T>(&self, tracer: T)
    where
        T: Tracer + 'static,
    {
        let tracer: Box<dyn Tracer> = Box::new(tracer);
        self.inner.tracer.store(Some(Arc::new(tracer)));
        debug!("tracer replaced on registry {}", self.inner.id);
    }

    /// Removes the tracer.
    pub fn clear_tracer(&self) {
        self.inner.tracer.store(None);
        debug!("tracer cleared on registry {}", self.inner.id);
    }

    pub(crate) fn inner(&self) -> &RegistryInner {
        &self.inner
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.inner.id)
            .field("flags", &self.len())
            .finish()
    }
}

/// Registers a boolean flag with the global registry. See [Registry::register].
pub fn register(name: impl Into<String>, options: &FlagOptions) -> Flag {
    Registry::global().register(name, options)
}

/// Looks up a flag in the global registry. See [Registry::lookup].
pub fn lookup(name: &str) -> Option<Flag> {
    Registry::global().lookup(name)
}

/// Returns the flags of the global registry sorted by name. See [Registry::flags].
pub fn flags() -> impl Iterator<Item = Flag> {
    Registry::global().flags()
}

/// Sets the strategy of the global registry. See [Registry::set_strategy].
pub fn set_strategy<S>(strategy: S)
where
    S: Strategy + 'static,
{
    Registry::global().set_strategy(strategy)
}

/// Clears the strategy of the global registry.
pub fn clear_strategy() {
    Registry::global().clear_strategy()
}

/// Sets the tracer of the global registry. See [Registry::set_tracer].
pub fn set_tracer<T>(tracer: T)
where
    T: Tracer + 'static,
{
    Registry::global().set_tracer(tracer)
}

/// Clears the tracer of the global registry.
pub fn clear_tracer() {
    Registry::global().clear_tracer()
}

/// Attaches overrides for flags of the global registry. See [Registry::with_values].
pub fn with_values<I>(ctx: &Context, overrides: I) -> Context
where
    I: IntoIterator<Item = Override>,
{
    Registry::global().with_values(ctx, overrides)
}
