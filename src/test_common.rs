#![cfg(test)]

use crate::context::Context;
use crate::decision::Decision;
use crate::flag::Flag;
use crate::panic::PanicError;
use crate::strategy::Strategy;
use crate::tracer::{BranchDone, ExperimentDone, Outcome, SwitchDone, Tracer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A strategy that always returns the same decision and counts how often it was asked.
pub struct SpyStrategy {
    decision: Decision,
    calls: AtomicUsize,
}

impl SpyStrategy {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Strategy for SpyStrategy {
    fn decide(&self, _ctx: &Context, _flag: &Flag) -> Decision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

/// Everything a [RecordingTracer] observed. Results are recorded as `i32`; errors by their
/// message.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Decision(String, Decision),
    SwitchStart(String),
    SwitchDone(String, Decision, Result<i32, String>),
    ExperimentStart(String),
    ExperimentDone(String, Decision, Result<i32, String>, bool),
    BranchStart(String, Decision),
    BranchDone(String, Decision, Result<i32, String>),
    BranchPanicked(String, Decision, String),
}

/// A tracer that records every hook call. A named tracer also appends its name to a
/// `Vec<&'static str>` value in the context returned from each start hook.
#[derive(Clone, Default)]
pub struct RecordingTracer {
    name: Option<&'static str>,
    events: Arc<Mutex<Vec<(u64, Event)>>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Interleaves the events of several tracers in the order they were recorded.
    pub fn merged(tracers: &[&RecordingTracer]) -> Vec<(&'static str, Event)> {
        let mut all: Vec<(u64, &'static str, Event)> = tracers
            .iter()
            .flat_map(|t| {
                let name = t.name.unwrap_or_default();
                t.events
                    .lock()
                    .iter()
                    .map(|(seq, e)| (*seq, name, e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by_key(|(seq, _, _)| *seq);
        all.into_iter().map(|(_, name, e)| (name, e)).collect()
    }

    fn record(&self, event: Event) {
        let seq = SEQUENCE.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push((seq, event));
    }

    fn enter(&self, ctx: &Context) -> Context {
        match self.name {
            Some(name) => {
                let mut names = ctx
                    .value::<Vec<&'static str>>()
                    .cloned()
                    .unwrap_or_default();
                names.push(name);
                ctx.with_value(names)
            }
            None => ctx.clone(),
        }
    }
}

fn recorded(outcome: Outcome<'_>) -> Result<i32, String> {
    match outcome {
        Ok(value) => Ok(value.downcast_ref::<i32>().copied().unwrap_or_default()),
        Err(err) => Err(err.to_string()),
    }
}

impl Tracer for RecordingTracer {
    fn decision(&self, _ctx: &Context, flag: &Flag, decision: Decision) {
        self.record(Event::Decision(flag.name().into(), decision));
    }

    fn branch(
        &self,
        ctx: &Context,
        flag: &Flag,
        decision: Decision,
    ) -> (Context, Option<BranchDone>) {
        let name = flag.name().to_string();
        self.record(Event::BranchStart(name.clone(), decision));

        let recorder = self.clone();
        let done: BranchDone = Box::new(move |outcome: Outcome<'_>| {
            recorder.record(Event::BranchDone(name, decision, recorded(outcome)));
        });
        (self.enter(ctx), Some(done))
    }

    fn branch_panicked(&self, _ctx: &Context, flag: &Flag, decision: Decision, error: &PanicError) {
        self.record(Event::BranchPanicked(
            flag.name().into(),
            decision,
            error.message().into(),
        ));
    }

    fn experiment(&self, ctx: &Context, flag: &Flag) -> (Context, Option<ExperimentDone>) {
        let name = flag.name().to_string();
        self.record(Event::ExperimentStart(name.clone()));

        let recorder = self.clone();
        let done = move |decision: Decision, outcome: Outcome<'_>, success: bool| {
            recorder.record(Event::ExperimentDone(name, decision, recorded(outcome), success));
        };
        (self.enter(ctx), Some(Box::new(done)))
    }

    fn switch(&self, ctx: &Context, flag: &Flag) -> (Context, Option<SwitchDone>) {
        let name = flag.name().to_string();
        self.record(Event::SwitchStart(name.clone()));

        let recorder = self.clone();
        let done: SwitchDone = Box::new(move |decision: Decision, outcome: Outcome<'_>| {
            recorder.record(Event::SwitchDone(name, decision, recorded(outcome)));
        });
        (self.enter(ctx), Some(done))
    }
}
