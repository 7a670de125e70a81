//! Solved tasks and the per-call execution engine.
//!
//! A [`Task`] is the solve-time wrapper around one descriptor: parameters
//! pre-resolved to task indices, kind pre-classified, reverse edges known.
//! [`ExecutorTask`] binds a task to one call's [`ExecutionState`] so an
//! executor can drive it without seeing either.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{ExecutionError, ProviderError, ScopingError};
use crate::provider::{CallRef, DependencyValue, Invoke, ProviderArgs, ProviderKind};
use crate::scope::Scope;
use crate::solver::SolvedGraph;
use crate::state::ScopeFrame;

pub(crate) struct Task {
    pub(crate) index: usize,
    pub(crate) call: CallRef,
    pub(crate) kind: ProviderKind,
    pub(crate) scope: Scope,
    pub(crate) shared: bool,
    /// Prerequisite task indices feeding positional arguments, declared order.
    pub(crate) positional: Vec<usize>,
    /// Prerequisite task indices feeding keyword arguments.
    pub(crate) keyword: Vec<(&'static str, usize)>,
    /// Unique prerequisite task indices.
    pub(crate) prerequisites: Vec<usize>,
    /// Tasks that consume this task's value.
    pub(crate) dependants: Vec<usize>,
    /// Provider names from the root down to this task, for error breadcrumbs.
    pub(crate) chain: Vec<String>,
}

/// Mutable bookkeeping for one call.
///
/// Each result slot is written exactly once, by the task it names; the
/// remaining-prerequisite counters guarantee no reader runs before its
/// writer completes, so slots never contend.
pub(crate) struct ExecutionState {
    pub(crate) graph: SolvedGraph,
    pub(crate) results: Vec<OnceCell<DependencyValue>>,
    pub(crate) remaining: Vec<AtomicUsize>,
    pub(crate) unfinished: AtomicUsize,
    pub(crate) frames: HashMap<Scope, Arc<ScopeFrame>>,
}

/// Queue handed to an executor. `None` is the terminal sentinel: every task
/// in the plan has completed and the executor may return.
pub type TaskQueue = VecDeque<Option<ExecutorTask>>;

/// A ready-to-run unit: one task bound to the state of the call that
/// produced it.
///
/// Running a task stores its value, then reports the tasks its completion
/// made ready (plus the terminal sentinel after the last one). The executor
/// feeds those back into its queue.
pub struct ExecutorTask {
    task: Arc<Task>,
    state: Arc<ExecutionState>,
}

impl ExecutorTask {
    pub(crate) fn new(task: Arc<Task>, state: Arc<ExecutionState>) -> Self {
        Self { task, state }
    }

    /// True when this task's provider suspends and needs an async executor.
    pub fn is_async(&self) -> bool {
        self.task.kind.is_async()
    }

    /// Name of the provider this task invokes.
    pub fn provider(&self) -> &'static str {
        self.task.call.name()
    }

    /// Runs a sync task to completion. Fails with
    /// [`ExecutionError::KindMismatch`] for async tasks.
    pub fn run_sync(&self) -> Result<Vec<Option<ExecutorTask>>, ExecutionError> {
        let value = match self.task.call.invoke() {
            Invoke::SyncValue(f) => f(self.gather()).map_err(|e| self.provider_error(e))?,
            Invoke::SyncResource(f) => {
                // Resolve the owning frame first so a missing scope cannot
                // strand an already-opened resource.
                let frame = self.frame()?;
                let (value, teardown) = f(self.gather()).map_err(|e| self.provider_error(e))?;
                frame.push_sync_teardown(self.task.call.name(), teardown);
                value
            }
            Invoke::AsyncValue(_) | Invoke::AsyncResource(_) => {
                return Err(ExecutionError::KindMismatch(format!(
                    "provider {} is async and cannot run on a synchronous executor",
                    self.task.call.name()
                )))
            }
        };
        self.store(value);
        Ok(self.complete())
    }

    /// Runs a task of either kind to completion.
    pub async fn run(&self) -> Result<Vec<Option<ExecutorTask>>, ExecutionError> {
        match self.task.call.invoke() {
            Invoke::SyncValue(_) | Invoke::SyncResource(_) => self.run_sync(),
            Invoke::AsyncValue(f) => {
                let value = f(self.gather()).await.map_err(|e| self.provider_error(e))?;
                self.store(value);
                Ok(self.complete())
            }
            Invoke::AsyncResource(f) => {
                let frame = self.frame()?;
                let (value, teardown) =
                    f(self.gather()).await.map_err(|e| self.provider_error(e))?;
                frame
                    .push_async_teardown(self.task.call.name(), teardown)
                    .map_err(ExecutionError::Scoping)?;
                self.store(value);
                Ok(self.complete())
            }
        }
    }

    fn gather(&self) -> ProviderArgs {
        let results = &self.state.results;
        let positional = self
            .task
            .positional
            .iter()
            .map(|&i| results[i].get().expect("prerequisite computed before dependant").clone())
            .collect();
        let keyword = self
            .task
            .keyword
            .iter()
            .map(|&(name, i)| {
                (name, results[i].get().expect("prerequisite computed before dependant").clone())
            })
            .collect();
        ProviderArgs::new(positional, keyword)
    }

    fn store(&self, value: DependencyValue) {
        // Single writer per slot; a second write can only be a duplicate of
        // the same task and is dropped.
        let _ = self.state.results[self.task.index].set(value);
    }

    /// Releases dependants whose prerequisites are now all satisfied, and
    /// appends the terminal sentinel after the last unresolved task.
    fn complete(&self) -> Vec<Option<ExecutorTask>> {
        let state = &self.state;
        let mut newly = Vec::new();
        for &dependant in &self.task.dependants {
            // Dependants seeded from overrides or caches hold no counter.
            if state.results[dependant].get().is_some() {
                continue;
            }
            if state.remaining[dependant].fetch_sub(1, Ordering::AcqRel) == 1 {
                newly.push(Some(ExecutorTask::new(
                    state.graph.inner().tasks[dependant].clone(),
                    state.clone(),
                )));
            }
        }
        if state.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            newly.push(None);
        }
        newly
    }

    fn frame(&self) -> Result<&Arc<ScopeFrame>, ExecutionError> {
        self.state.frames.get(&self.task.scope).ok_or_else(|| {
            ExecutionError::Scoping(ScopingError::ScopeNotFound {
                provider: self.task.call.name().to_string(),
                scope: self.task.scope,
            })
        })
    }

    fn provider_error(&self, source: ProviderError) -> ExecutionError {
        ExecutionError::Provider {
            provider: self.task.call.name().to_string(),
            chain: self.task.chain.clone(),
            source,
        }
    }
}
