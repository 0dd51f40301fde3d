use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::decision::Decision;
use crate::flag::Flag;

/// Strategy decides whether a flag is enabled for a given [Context].
///
/// Strategies are shared between all threads evaluating flags of a [crate::Registry], so they
/// must be safe for concurrent use. The library treats them as pure functions of the context and
/// the flag; any side effects are up to the implementation.
///
/// A strategy has no way to report errors. Return [Decision::NoDecision] to defer to the next
/// strategy or the flag's default. A panic inside a strategy is not caught and propagates out of
/// [Flag::enabled].
pub trait Strategy: Send + Sync {
    /// Decide whether `flag` is enabled for `ctx`.
    fn decide(&self, ctx: &Context, flag: &Flag) -> Decision;
}

impl<S: Strategy + ?Sized> Strategy for Arc<S> {
    fn decide(&self, ctx: &Context, flag: &Flag) -> Decision {
        (**self).decide(ctx, flag)
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn decide(&self, ctx: &Context, flag: &Flag) -> Decision {
        (**self).decide(ctx, flag)
    }
}

/// Fixed returns the same decision for every flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fixed(pub Decision);

impl Fixed {
    /// A strategy that enables every flag.
    pub fn enabled() -> Self {
        Fixed(Decision::Enabled)
    }

    /// A strategy that disables every flag.
    pub fn disabled() -> Self {
        Fixed(Decision::Disabled)
    }
}

impl From<bool> for Fixed {
    fn from(enabled: bool) -> Self {
        Fixed(enabled.into())
    }
}

impl Strategy for Fixed {
    fn decide(&self, _: &Context, _: &Flag) -> Decision {
        self.0
    }
}

/// DecisionMap looks up the decision by flag name.
///
/// Flags that are not in the map get [Decision::NoDecision], so a map can be placed in front of
/// other strategies in a [Chain] and only override the flags it lists.
///
/// A DecisionMap deserializes from a JSON object whose values are booleans, `null` or one of
/// `"enabled"`, `"disabled"` and `"no_decision"`:
///
/// ```
/// # use flagswitch::{Decision, DecisionMap};
/// let map: DecisionMap = serde_json::from_str(r#"{"new-ui": true, "old-api": false}"#).unwrap();
/// assert_eq!(map.get("new-ui"), Decision::Enabled);
/// assert_eq!(map.get("unknown"), Decision::NoDecision);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DecisionMap(HashMap<String, Decision>);

impl DecisionMap {
    /// Creates an empty map, which decides no flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the decision for the flag named `name`.
    pub fn insert(&mut self, name: impl Into<String>, decision: impl Into<Decision>) -> &mut Self {
        self.0.insert(name.into(), decision.into());
        self
    }

    /// Returns the decision for `name`, or [Decision::NoDecision] if the name is not mapped.
    pub fn get(&self, name: &str) -> Decision {
        self.0.get(name).copied().unwrap_or_default()
    }

    /// Returns the number of mapped flag names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no flag name is mapped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, D> FromIterator<(K, D)> for DecisionMap
where
    K: Into<String>,
    D: Into<Decision>,
{
    fn from_iter<I: IntoIterator<Item = (K, D)>>(iter: I) -> Self {
        DecisionMap(
            iter.into_iter()
                .map(|(name, decision)| (name.into(), decision.into()))
                .collect(),
        )
    }
}

impl Strategy for DecisionMap {
    fn decide(&self, _: &Context, flag: &Flag) -> Decision {
        self.get(flag.name())
    }
}

/// StrategyFn adapts a closure into a [Strategy].
///
/// ```
/// # use flagswitch::{Context, Decision, StrategyFn};
/// let beta = StrategyFn::new(|_: &Context, flag: &flagswitch::Flag| {
///     Decision::from(flag.name().starts_with("beta-"))
/// });
/// # let _ = beta;
/// ```
#[derive(Clone, Copy)]
pub struct StrategyFn<F>(F);

impl<F> StrategyFn<F>
where
    F: Fn(&Context, &Flag) -> Decision + Send + Sync,
{
    /// Wraps `f` as a strategy.
    pub fn new(f: F) -> Self {
        StrategyFn(f)
    }
}

impl<F> Strategy for StrategyFn<F>
where
    F: Fn(&Context, &Flag) -> Decision + Send + Sync,
{
    fn decide(&self, ctx: &Context, flag: &Flag) -> Decision {
        (self.0)(ctx, flag)
    }
}

impl<F> fmt::Debug for StrategyFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StrategyFn")
    }
}

/// Chain asks its strategies in order and returns the first decision that is not
/// [Decision::NoDecision].
///
/// Strategies after the deciding one are not consulted. Empty slots are skipped. A chain in
/// which no strategy decides returns [Decision::NoDecision] itself.
#[derive(Clone, Default)]
pub struct Chain {
    strategies: Vec<Option<Arc<dyn Strategy>>>,
}

impl Chain {
    /// Creates an empty chain, which decides no flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `strategy` to the end of the chain.
    pub fn with<S>(mut self, strategy: S) -> Self
    where
        S: Strategy + 'static,
    {
        self.strategies.push(Some(Arc::new(strategy)));
        self
    }

    /// Appends a slot that may be empty.
    pub fn push(&mut self, strategy: Option<Arc<dyn Strategy>>) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    /// Returns the number of slots, including empty ones.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if the chain has no slots.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl FromIterator<Option<Arc<dyn Strategy>>> for Chain {
    fn from_iter<I: IntoIterator<Item = Option<Arc<dyn Strategy>>>>(iter: I) -> Self {
        Chain {
            strategies: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<Arc<dyn Strategy>> for Chain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Strategy>>>(iter: I) -> Self {
        iter.into_iter().map(Some).collect()
    }
}

impl Strategy for Chain {
    fn decide(&self, ctx: &Context, flag: &Flag) -> Decision {
        self.strategies
            .iter()
            .flatten()
            .map(|strategy| strategy.decide(ctx, flag))
            .find(|decision| decision.is_decided())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::test_common::SpyStrategy;
    use crate::FlagOptions;
    use maplit::hashmap;
    use proptest::prelude::{prop, prop_assert_eq, prop_oneof, proptest, Just};
    use spectral::prelude::*;
    use test_case::test_case;

    fn flag(name: &str) -> Flag {
        Registry::new().register(name, &FlagOptions::new())
    }

    #[test_case(Decision::Enabled)]
    #[test_case(Decision::Disabled)]
    #[test_case(Decision::NoDecision)]
    fn fixed_ignores_inputs(decision: Decision) {
        let ctx = Context::background();
        assert_that!(Fixed(decision).decide(&ctx, &flag("a"))).is_equal_to(decision);
        assert_that!(Fixed(decision).decide(&ctx, &flag("b"))).is_equal_to(decision);
    }

    #[test]
    fn decision_map_by_name() {
        let map: DecisionMap = [("Rob", true), ("Brad", false)].into_iter().collect();
        let ctx = Context::background();

        assert_that!(map.decide(&ctx, &flag("Rob"))).is_equal_to(Decision::Enabled);
        assert_that!(map.decide(&ctx, &flag("Brad"))).is_equal_to(Decision::Disabled);
        assert_that!(map.decide(&ctx, &flag("Ken"))).is_equal_to(Decision::NoDecision);
    }

    #[test]
    fn decision_map_from_json() {
        let map: DecisionMap = serde_json::from_str(
            r#"{"a": true, "b": false, "c": null, "d": "enabled", "e": "no_decision"}"#,
        )
        .unwrap();

        let expected: DecisionMap = hashmap! {
            "a" => Decision::Enabled,
            "b" => Decision::Disabled,
            "c" => Decision::NoDecision,
            "d" => Decision::Enabled,
            "e" => Decision::NoDecision,
        }
        .into_iter()
        .collect();
        assert_that!(map).is_equal_to(expected);
    }

    #[test]
    fn decision_map_insert_overwrites() {
        let mut map = DecisionMap::new();
        map.insert("x", true).insert("x", Decision::Disabled);
        assert_that!(map.len()).is_equal_to(1);
        assert_that!(map.get("x")).is_equal_to(Decision::Disabled);
    }

    #[test]
    fn strategy_fn_receives_flag() {
        let s = StrategyFn::new(|_: &Context, flag: &Flag| Decision::from(flag.name() == "Rob"));
        let ctx = Context::background();

        assert_that!(s.decide(&ctx, &flag("Brad"))).is_equal_to(Decision::Disabled);
        assert_that!(s.decide(&ctx, &flag("Rob"))).is_equal_to(Decision::Enabled);
    }

    #[test]
    fn strategy_fn_receives_context() {
        struct Tester;

        let s = StrategyFn::new(|ctx: &Context, _: &Flag| {
            Decision::from(ctx.value::<Tester>().is_some())
        });
        let f = flag("x");

        assert_that!(s.decide(&Context::background(), &f)).is_equal_to(Decision::Disabled);
        assert_that!(s.decide(&Context::background().with_value(Tester), &f))
            .is_equal_to(Decision::Enabled);
    }

    #[test]
    fn chain_stops_at_first_decision() {
        let first = Arc::new(SpyStrategy::new(Decision::NoDecision));
        let second = Arc::new(SpyStrategy::new(Decision::Enabled));
        let third = Arc::new(SpyStrategy::new(Decision::Disabled));

        let chain: Chain = vec![
            first.clone() as Arc<dyn Strategy>,
            second.clone() as Arc<dyn Strategy>,
            third.clone() as Arc<dyn Strategy>,
        ]
        .into_iter()
        .collect();

        assert_that!(chain.decide(&Context::background(), &flag("x")))
            .is_equal_to(Decision::Enabled);
        assert_that!(first.calls()).is_equal_to(1);
        assert_that!(second.calls()).is_equal_to(1);
        assert_that!(third.calls()).is_equal_to(0);
    }

    #[test]
    fn chain_skips_empty_slots() {
        let mut chain = Chain::new();
        chain.push(None).push(Some(Arc::new(Fixed::disabled())));

        assert_that!(chain.len()).is_equal_to(2);
        assert_that!(chain.decide(&Context::background(), &flag("x")))
            .is_equal_to(Decision::Disabled);
    }

    #[test]
    fn empty_chain_has_no_opinion() {
        assert_that!(Chain::new().decide(&Context::background(), &flag("x")))
            .is_equal_to(Decision::NoDecision);

        let undecided = Chain::new()
            .with(Fixed(Decision::NoDecision))
            .with(DecisionMap::new());
        assert_that!(undecided.decide(&Context::background(), &flag("x")))
            .is_equal_to(Decision::NoDecision);
    }

    fn any_decision() -> impl proptest::strategy::Strategy<Value = Decision> {
        prop_oneof![
            Just(Decision::NoDecision),
            Just(Decision::Disabled),
            Just(Decision::Enabled),
        ]
    }

    proptest! {
        #[test]
        fn chain_returns_first_decided(decisions in prop::collection::vec(any_decision(), 0..8)) {
            let spies: Vec<Arc<SpyStrategy>> =
                decisions.iter().map(|d| Arc::new(SpyStrategy::new(*d))).collect();
            let chain: Chain = spies.iter().map(|s| s.clone() as Arc<dyn Strategy>).collect();

            let got = chain.decide(&Context::background(), &flag("x"));

            let first = decisions.iter().position(|d| d.is_decided());
            let expected = first.map_or(Decision::NoDecision, |i| decisions[i]);
            prop_assert_eq!(got, expected);

            let consulted = first.map_or(decisions.len(), |i| i + 1);
            for (i, spy) in spies.iter().enumerate() {
                prop_assert_eq!(spy.calls(), usize::from(i < consulted));
            }
        }
    }
}
