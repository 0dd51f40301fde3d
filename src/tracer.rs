use std::any::Any;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::warn;

use crate::context::Context;
use crate::decision::Decision;
use crate::error::BoxError;
use crate::flag::Flag;
use crate::panic::{panic_message, PanicError};

/// Outcome is what a traced function produced: a reference to its result or to its error.
///
/// Results are passed as [Any] so a single tracer can observe flags of every result type;
/// downcast to inspect them.
pub type Outcome<'a> = Result<&'a (dyn Any + Send), &'a (dyn StdError + Send + Sync + 'static)>;

/// Called once a branch run by [crate::switch()] or [crate::experiment] has returned.
pub type BranchDone = Box<dyn for<'a> FnOnce(Outcome<'a>)>;

/// Called once [crate::switch()] has finished, with the decision that selected the branch.
pub type SwitchDone = Box<dyn for<'a> FnOnce(Decision, Outcome<'a>)>;

/// Called once [crate::experiment] has finished, with the decision that selected the returned
/// branch and whether both branches succeeded with equal results.
pub type ExperimentDone = Box<dyn for<'a> FnOnce(Decision, Outcome<'a>, bool)>;

/// Tracer observes flag evaluations and branch executions, e.g. to record spans and metrics.
///
/// Every method has a no-op default, so implementations only override the hooks they need. The
/// hooks that start a unit of work may return a replacement [Context], which is used for
/// everything nested inside that unit, and an optional callback that is invoked when the unit
/// is done.
///
/// A panic inside a hook or callback is caught and logged; it never affects the evaluation or
/// the branch being observed.
pub trait Tracer: Send + Sync {
    /// Called for every resolved decision, including the ones made by [crate::switch()] and
    /// [crate::experiment].
    fn decision(&self, _ctx: &Context, _flag: &Flag, _decision: Decision) {}

    /// Called before a single branch runs. `decision` is [Decision::Enabled] for the enabled or
    /// experimental branch and [Decision::Disabled] for the disabled or control branch.
    fn branch(
        &self,
        ctx: &Context,
        _flag: &Flag,
        _decision: Decision,
    ) -> (Context, Option<BranchDone>) {
        (ctx.clone(), None)
    }

    /// Called when a branch panicked, before its done callback sees the resulting error.
    fn branch_panicked(
        &self,
        _ctx: &Context,
        _flag: &Flag,
        _decision: Decision,
        _error: &PanicError,
    ) {
    }

    /// Called when [crate::experiment] starts.
    fn experiment(&self, ctx: &Context, _flag: &Flag) -> (Context, Option<ExperimentDone>) {
        (ctx.clone(), None)
    }

    /// Called when [crate::switch()] starts.
    fn switch(&self, ctx: &Context, _flag: &Flag) -> (Context, Option<SwitchDone>) {
        (ctx.clone(), None)
    }
}

impl<T: Tracer + ?Sized> Tracer for Arc<T> {
    fn decision(&self, ctx: &Context, flag: &Flag, decision: Decision) {
        (**self).decision(ctx, flag, decision)
    }

    fn branch(
        &self,
        ctx: &Context,
        flag: &Flag,
        decision: Decision,
    ) -> (Context, Option<BranchDone>) {
        (**self).branch(ctx, flag, decision)
    }

    fn branch_panicked(&self, ctx: &Context, flag: &Flag, decision: Decision, error: &PanicError) {
        (**self).branch_panicked(ctx, flag, decision, error)
    }

    fn experiment(&self, ctx: &Context, flag: &Flag) -> (Context, Option<ExperimentDone>) {
        (**self).experiment(ctx, flag)
    }

    fn switch(&self, ctx: &Context, flag: &Flag) -> (Context, Option<SwitchDone>) {
        (**self).switch(ctx, flag)
    }
}

/// Tracers forwards every hook to several tracers.
///
/// Start hooks run in order, each receiving the context returned by the previous one. Done
/// callbacks run in reverse order, so the first tracer's unit of work encloses the others.
#[derive(Clone, Default)]
pub struct Tracers {
    tracers: Vec<Arc<dyn Tracer>>,
}

impl Tracers {
    /// Creates an empty fan-out that observes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `tracer`; its start hooks run after those of the tracers added before it.
    pub fn with<T>(mut self, tracer: T) -> Self
    where
        T: Tracer + 'static,
    {
        self.tracers.push(Arc::new(tracer));
        self
    }

    fn start<D>(
        &self,
        ctx: &Context,
        mut start: impl FnMut(&dyn Tracer, &Context) -> (Context, Option<D>),
    ) -> (Context, Vec<D>) {
        let mut ctx = ctx.clone();
        let mut done = Vec::new();
        for tracer in &self.tracers {
            let (next, callback) = start(tracer.as_ref(), &ctx);
            ctx = next;
            done.extend(callback);
        }
        done.reverse();
        (ctx, done)
    }
}

impl FromIterator<Arc<dyn Tracer>> for Tracers {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tracer>>>(iter: I) -> Self {
        Tracers {
            tracers: iter.into_iter().collect(),
        }
    }
}

impl Tracer for Tracers {
    fn decision(&self, ctx: &Context, flag: &Flag, decision: Decision) {
        for tracer in &self.tracers {
            tracer.decision(ctx, flag, decision);
        }
    }

    fn branch(
        &self,
        ctx: &Context,
        flag: &Flag,
        decision: Decision,
    ) -> (Context, Option<BranchDone>) {
        let (ctx, done) = self.start(ctx, |t, ctx| t.branch(ctx, flag, decision));
        if done.is_empty() {
            return (ctx, None);
        }
        (
            ctx,
            Some(Box::new(move |outcome: Outcome<'_>| {
                for callback in done {
                    callback(outcome);
                }
            })),
        )
    }

    fn branch_panicked(&self, ctx: &Context, flag: &Flag, decision: Decision, error: &PanicError) {
        for tracer in &self.tracers {
            tracer.branch_panicked(ctx, flag, decision, error);
        }
    }

    fn experiment(&self, ctx: &Context, flag: &Flag) -> (Context, Option<ExperimentDone>) {
        let (ctx, done) = self.start(ctx, |t, ctx| t.experiment(ctx, flag));
        if done.is_empty() {
            return (ctx, None);
        }
        (
            ctx,
            Some(Box::new(move |decision: Decision, outcome: Outcome<'_>, success: bool| {
                for callback in done {
                    callback(decision, outcome, success);
                }
            })),
        )
    }

    fn switch(&self, ctx: &Context, flag: &Flag) -> (Context, Option<SwitchDone>) {
        let (ctx, done) = self.start(ctx, |t, ctx| t.switch(ctx, flag));
        if done.is_empty() {
            return (ctx, None);
        }
        (
            ctx,
            Some(Box::new(move |decision: Decision, outcome: Outcome<'_>| {
                for callback in done {
                    callback(decision, outcome);
                }
            })),
        )
    }
}

/// Runs a tracer hook, logging and dropping any panic it raises.
pub(crate) fn guarded<R>(hook: &str, flag: &Flag, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                "tracer hook {} for flag {} panicked: {}",
                hook,
                flag.name(),
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

pub(crate) fn outcome<T>(result: &Result<T, BoxError>) -> Outcome<'_>
where
    T: Send + 'static,
{
    match result {
        Ok(value) => Ok(value as &(dyn Any + Send)),
        Err(err) => Err(err.as_ref()),
    }
}
