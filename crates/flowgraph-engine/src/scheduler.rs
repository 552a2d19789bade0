//! Kahn-style concurrent scheduler.
//!
//! Every step whose upstream steps have all completed is spawned as its own
//! tokio task. The scheduler then waits on whichever in-flight step finishes
//! next, records its output, settles the edges to its dependents, and launches
//! whatever became ready. The first failure stops all further launches; steps
//! already in flight are drained and their results discarded.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowgraph_core::error::Result;
use flowgraph_core::types::{RunId, WorkflowEvent};

use crate::context::{ExecutionContext, StepContext, StepOutputs};
use crate::error::{CancelReason, WorkflowError};
use crate::graph::StepGraph;
use crate::step::Step;

/// Logs at `info` when the run has debug enabled, `debug` otherwise.
macro_rules! step_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Timing record for one completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: String,
    /// Time from launch to completion.
    pub elapsed_ms: u64,
    /// Launch time relative to the start of the run.
    pub started_offset_ms: u64,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// Every completed step's output, in completion order.
    pub outputs: StepOutputs,
    /// Steps that never ran because a branch took another path.
    pub skipped: Vec<String>,
    /// Per-step timings in completion order.
    pub step_results: Vec<StepResult>,
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn output(&self, step: &str) -> Option<&serde_json::Value> {
        self.outputs.get(step)
    }

    /// Step names in the order their outputs were recorded.
    pub fn completion_order(&self) -> Vec<&str> {
        self.outputs.names().collect()
    }

    pub fn was_skipped(&self, step: &str) -> bool {
        self.skipped.iter().any(|s| s == step)
    }
}

type Joined = (String, Instant, std::result::Result<Result<serde_json::Value>, JoinError>);

/// Drives one run of a validated step graph.
pub(crate) struct Scheduler<'a> {
    workflow: &'a str,
    steps: &'a HashMap<String, Arc<Step>>,
    graph: &'a StepGraph,
    ctx: Arc<ExecutionContext>,
    /// Parent of every step's token. Cancelled on signal or deadline.
    token: CancellationToken,
    started: Instant,
    remaining: HashMap<&'a str, usize>,
    skipped: Vec<String>,
    skipped_set: HashSet<&'a str>,
    in_flight: FuturesUnordered<BoxFuture<'static, Joined>>,
    aborts: HashMap<String, AbortHandle>,
    step_results: Vec<StepResult>,
    failure: Option<WorkflowError>,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(
        workflow: &'a str,
        steps: &'a HashMap<String, Arc<Step>>,
        graph: &'a StepGraph,
        ctx: Arc<ExecutionContext>,
        token: CancellationToken,
    ) -> Self {
        let remaining = graph
            .step_names()
            .iter()
            .map(|n| (n.as_str(), graph.upstream(n).len()))
            .collect();

        Self {
            workflow,
            steps,
            graph,
            ctx,
            token,
            started: Instant::now(),
            remaining,
            skipped: Vec::new(),
            skipped_set: HashSet::new(),
            in_flight: FuturesUnordered::new(),
            aborts: HashMap::new(),
            step_results: Vec::new(),
            failure: None,
        }
    }

    /// Run every step to completion, failure, or cancellation.
    pub(crate) async fn run(mut self, deadline: Option<Duration>) -> std::result::Result<ExecutionResult, WorkflowError> {
        let run_id = self.ctx.run_id().clone();
        let step_count = self.graph.step_names().len();

        info!(run_id = %run_id, workflow = %self.workflow, steps = step_count, "Workflow run started");
        self.ctx.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            workflow: self.workflow.to_string(),
            step_count,
        });

        match self.drive(deadline).await {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    workflow = %self.workflow,
                    completed = result.outputs.len(),
                    skipped = result.skipped.len(),
                    elapsed_ms = result.total_elapsed_ms,
                    "Workflow run complete"
                );
                self.ctx.publish(WorkflowEvent::RunCompleted {
                    run_id,
                    completed: result.outputs.len(),
                    skipped: result.skipped.len(),
                    elapsed_ms: result.total_elapsed_ms,
                });
                Ok(result)
            }
            Err(e) => {
                if matches!(e, WorkflowError::Cancelled { .. }) {
                    warn!(run_id = %run_id, workflow = %self.workflow, error = %e, "Workflow run cancelled");
                } else {
                    error!(run_id = %run_id, workflow = %self.workflow, error = %e, "Workflow run failed");
                }
                self.ctx.publish(WorkflowEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive(&mut self, deadline: Option<Duration>) -> std::result::Result<ExecutionResult, WorkflowError> {
        if self.token.is_cancelled() {
            return Err(WorkflowError::Cancelled {
                reason: CancelReason::Signal,
            });
        }

        let graph = self.graph;
        for name in graph.entry_steps() {
            self.launch(name);
        }

        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        while !self.in_flight.is_empty() {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(self.abort(CancelReason::Signal)),
                _ = &mut expiry => return Err(self.abort(CancelReason::Deadline)),
                next = self.in_flight.next() => {
                    if let Some((name, started, joined)) = next {
                        self.complete(name, started, joined);
                    }
                }
            }
        }

        if let Some(err) = self.failure.take() {
            return Err(err);
        }

        Ok(ExecutionResult {
            run_id: self.ctx.run_id().clone(),
            outputs: self.ctx.outputs(),
            skipped: std::mem::take(&mut self.skipped),
            step_results: std::mem::take(&mut self.step_results),
            total_elapsed_ms: self.started.elapsed().as_millis() as u64,
        })
    }

    fn launch(&mut self, name: &'a str) {
        let Some(step) = self.steps.get(name).cloned() else {
            return;
        };
        let step_ctx = StepContext::new(self.ctx.clone(), name, self.token.child_token());
        let input = self.ctx.input().clone();

        step_log!(self.ctx.debug(), run_id = %self.ctx.run_id(), step = %name, kind = step.kind().name(), "Step started");
        self.ctx.publish(WorkflowEvent::StepStarted {
            run_id: self.ctx.run_id().clone(),
            step: name.to_string(),
        });

        let handle = tokio::spawn(async move { step.run(input, step_ctx).await });
        self.aborts.insert(name.to_string(), handle.abort_handle());

        let started = Instant::now();
        let name = name.to_string();
        self.in_flight
            .push(async move { (name, started, handle.await) }.boxed());
    }

    fn complete(
        &mut self,
        name: String,
        started: Instant,
        joined: std::result::Result<Result<serde_json::Value>, JoinError>,
    ) {
        self.aborts.remove(&name);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(WorkflowError::StepExecution {
                step: name.clone(),
                source,
            }),
            Err(e) if e.is_panic() => Err(WorkflowError::StepPanicked {
                step: name.clone(),
                message: panic_message(e.into_panic()),
            }),
            Err(e) => Err(WorkflowError::StepPanicked {
                step: name.clone(),
                message: e.to_string(),
            }),
        };

        match outcome {
            Ok(value) if self.failure.is_some() => {
                debug!(step = %name, elapsed_ms, "Discarding output of step that finished after a failure");
                drop(value);
            }
            Ok(value) => self.record(&name, started, elapsed_ms, value),
            Err(e) if self.failure.is_some() => {
                warn!(step = %name, error = %e, "Step failed after the run had already failed");
            }
            Err(e) => {
                error!(run_id = %self.ctx.run_id(), step = %name, elapsed_ms, error = %e, "Step failed");
                self.ctx.publish(WorkflowEvent::StepFailed {
                    run_id: self.ctx.run_id().clone(),
                    step: name,
                    error: e.to_string(),
                });
                self.failure = Some(e);
            }
        }
    }

    /// Record a completed step and launch whatever it unblocked.
    fn record(&mut self, name: &str, started: Instant, elapsed_ms: u64, value: serde_json::Value) {
        let steps = self.steps;
        let Some((key, _)) = steps.get_key_value(name) else {
            return;
        };
        let key = key.as_str();
        let graph = self.graph;

        let mut ready = Vec::new();
        for dependent in graph.dependents(key) {
            let dependent = dependent.as_str();
            if self.skipped_set.contains(dependent) {
                continue;
            }
            let satisfied = graph
                .requirement(key, dependent)
                .map(|r| r.satisfied_by(&value))
                .unwrap_or(true);
            if !satisfied {
                self.skip(dependent);
                continue;
            }
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.push(dependent);
                }
            }
        }

        self.ctx.record(key, value);
        self.step_results.push(StepResult {
            step: key.to_string(),
            elapsed_ms,
            started_offset_ms: started.saturating_duration_since(self.started).as_millis() as u64,
        });

        step_log!(self.ctx.debug(), run_id = %self.ctx.run_id(), step = %key, elapsed_ms, "Step completed");
        self.ctx.publish(WorkflowEvent::StepCompleted {
            run_id: self.ctx.run_id().clone(),
            step: key.to_string(),
            elapsed_ms,
        });

        for step in ready {
            self.launch(step);
        }
    }

    /// Mark a step and everything downstream of it as skipped.
    fn skip(&mut self, step: &'a str) {
        let graph = self.graph;
        let mut stack = vec![step];
        while let Some(name) = stack.pop() {
            if !self.skipped_set.insert(name) {
                continue;
            }
            self.skipped.push(name.to_string());

            step_log!(self.ctx.debug(), run_id = %self.ctx.run_id(), step = %name, "Step skipped");
            self.ctx.publish(WorkflowEvent::StepSkipped {
                run_id: self.ctx.run_id().clone(),
                step: name.to_string(),
            });

            stack.extend(graph.dependents(name).iter().map(String::as_str));
        }
    }

    /// Stop the run: cancel every step token and abort in-flight tasks.
    ///
    /// A step failure observed before the cancellation still wins.
    fn abort(&mut self, reason: CancelReason) -> WorkflowError {
        self.token.cancel();
        for (name, handle) in self.aborts.drain() {
            debug!(step = %name, "Aborting in-flight step");
            handle.abort();
        }
        warn!(run_id = %self.ctx.run_id(), reason = %reason, "Cancelling run");

        self.failure
            .take()
            .unwrap_or(WorkflowError::Cancelled { reason })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}
