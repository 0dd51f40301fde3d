use std::thread;

use crate::context::Context;
use crate::decision::Decision;
use crate::error::BoxError;
use crate::flag::Flag;
use crate::panic::{recover, PanicError};
use crate::tracer::{guarded, outcome, Tracer};

const EXPERIMENT_THREAD_NAME: &str = "flagswitch-experiment";

/// Runs `on_enabled` if `flag` is enabled for `ctx` and `on_disabled` otherwise, returning the
/// result of the branch that ran.
///
/// The flag is evaluated exactly once, before anything else happens. Only the selected branch
/// runs, on the calling thread. A panic in the branch is caught and returned as a
/// [PanicError].
///
/// If the flag's registry has a tracer, its [Tracer::switch] hook may replace the context passed
/// to the branch, and its done callback receives the decision and the branch's outcome.
pub fn switch<T, E, D>(
    ctx: &Context,
    flag: &Flag,
    on_enabled: E,
    on_disabled: D,
) -> Result<T, BoxError>
where
    T: Send + 'static,
    E: FnOnce(&Context) -> Result<T, BoxError>,
    D: FnOnce(&Context) -> Result<T, BoxError>,
{
    let handle = flag.tracer();
    let tracer: Option<&dyn Tracer> = handle.as_deref().map(|t| &**t);

    let decision = flag.decide_with(ctx, tracer);

    let (ctx, done) = match tracer {
        Some(tracer) => guarded("switch", flag, || tracer.switch(ctx, flag))
            .unwrap_or_else(|| (ctx.clone(), None)),
        None => (ctx.clone(), None),
    };

    let result = if decision.is_enabled() {
        run_branch(&ctx, flag, tracer, Decision::Enabled, on_enabled)
    } else {
        run_branch(&ctx, flag, tracer, Decision::Disabled, on_disabled)
    };

    if let Some(done) = done {
        guarded("switch done", flag, || done(decision, outcome(&result)));
    }

    result
}

/// Runs `experimental` and `control` concurrently and returns the result of the one selected by
/// `flag`: `experimental` if the flag is enabled for `ctx`, `control` otherwise.
///
/// The flag is evaluated once, before either branch starts. `experimental` runs on a separate
/// thread, `control` on the calling thread, and both always run to completion. A panic in
/// either branch is caught and turned into a [PanicError] for that branch only.
///
/// `equals` is called with the experimental and the control result, in that order, only when
/// both branches succeeded. If the flag's registry has a tracer, its [Tracer::experiment] done
/// callback receives the decision, the selected outcome and whether both branches succeeded with
/// equal results.
pub fn experiment<T, X, C, Q>(
    ctx: &Context,
    flag: &Flag,
    experimental: X,
    control: C,
    equals: Q,
) -> Result<T, BoxError>
where
    T: Send + 'static,
    X: FnOnce(&Context) -> Result<T, BoxError> + Send,
    C: FnOnce(&Context) -> Result<T, BoxError> + Send,
    Q: FnOnce(&T, &T) -> bool,
{
    let handle = flag.tracer();
    let tracer: Option<&dyn Tracer> = handle.as_deref().map(|t| &**t);

    let decision = flag.decide_with(ctx, tracer);

    let (ctx, done) = match tracer {
        Some(tracer) => guarded("experiment", flag, || tracer.experiment(ctx, flag))
            .unwrap_or_else(|| (ctx.clone(), None)),
        None => (ctx.clone(), None),
    };

    let (experimental, control) = thread::scope(|s| {
        let ctx = &ctx;
        let spawned = thread::Builder::new()
            .name(EXPERIMENT_THREAD_NAME.to_string())
            .spawn_scoped(s, move || {
                run_branch(ctx, flag, tracer, Decision::Enabled, experimental)
            });

        let control = run_branch(ctx, flag, tracer, Decision::Disabled, control);

        let experimental = match spawned {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|payload| Err(Box::new(PanicError::new(payload)) as BoxError)),
            Err(err) => Err(Box::new(err) as BoxError),
        };

        (experimental, control)
    });

    let success = match (&experimental, &control) {
        (Ok(x), Ok(c)) => equals(x, c),
        _ => false,
    };

    let result = if decision.is_enabled() {
        experimental
    } else {
        control
    };

    if let Some(done) = done {
        guarded("experiment done", flag, || done(decision, outcome(&result), success));
    }

    result
}

/// Compares two branch results with [PartialEq]; the usual `equals` argument of [experiment].
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

fn run_branch<T, F>(
    ctx: &Context,
    flag: &Flag,
    tracer: Option<&dyn Tracer>,
    decision: Decision,
    f: F,
) -> Result<T, BoxError>
where
    T: Send + 'static,
    F: FnOnce(&Context) -> Result<T, BoxError>,
{
    let (ctx, done) = match tracer {
        Some(tracer) => guarded("branch", flag, || tracer.branch(ctx, flag, decision))
            .unwrap_or_else(|| (ctx.clone(), None)),
        None => (ctx.clone(), None),
    };

    let result = match recover(|| f(&ctx)) {
        Ok(result) => result,
        Err(panic) => {
            if let Some(tracer) = tracer {
                guarded("branch_panicked", flag, || {
                    tracer.branch_panicked(&ctx, flag, decision, &panic)
                });
            }
            Err(Box::new(panic) as BoxError)
        }
    };

    if let Some(done) = done {
        guarded("branch done", flag, || done(outcome(&result)));
    }

    result
}
