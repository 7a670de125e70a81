//! Per-call execution planning: scope validation, result seeding, counters,
//! and the initial ready queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::ScopingError;
use crate::provider::{CallKey, DependencyValue};
use crate::scope::Scope;
use crate::solver::SolvedGraph;
use crate::state::ContainerState;
use crate::task::{ExecutionState, ExecutorTask, TaskQueue};

/// Builds the mutable state for one call over an already solved plan.
///
/// Seeds results from caller overrides first, then from live scope caches
/// (shared descriptors only); initializes remaining-prerequisite counters
/// over the unresolved subgraph; and queues every unresolved task whose
/// prerequisites are already satisfied. An empty queue means everything was
/// pre-resolved and the executor can be bypassed.
pub(crate) fn plan_execution(
    state: &ContainerState,
    solved: &SolvedGraph,
    validate_scopes: bool,
    values: &HashMap<CallKey, DependencyValue>,
) -> Result<(Arc<ExecutionState>, TaskQueue), ScopingError> {
    let inner = solved.inner();
    let scopes = state.scopes();

    if validate_scopes {
        for task in &inner.tasks {
            let position = scope_position(&scopes, task.scope, task.call.name())?;
            for &p in &task.prerequisites {
                let prerequisite = &inner.tasks[p];
                let prerequisite_position =
                    scope_position(&scopes, prerequisite.scope, prerequisite.call.name())?;
                if prerequisite_position > position {
                    return Err(ScopingError::ScopeViolation {
                        provider: task.call.name().to_string(),
                        scope: task.scope,
                        dependency: prerequisite.call.name().to_string(),
                        dependency_scope: prerequisite.scope,
                    });
                }
            }
        }
    }

    let n = inner.tasks.len();
    let results: Vec<OnceCell<DependencyValue>> = (0..n).map(|_| OnceCell::new()).collect();
    let mut resolved = vec![false; n];
    for (i, task) in inner.tasks.iter().enumerate() {
        let key = task.call.key();
        if let Some(value) = values.get(&key) {
            let _ = results[i].set(value.clone());
            resolved[i] = true;
            continue;
        }
        if task.shared {
            if let Some(value) = state.cached(key) {
                let _ = results[i].set(value);
                resolved[i] = true;
            }
        }
    }

    let mut remaining = Vec::with_capacity(n);
    let mut unfinished = 0usize;
    for (i, task) in inner.tasks.iter().enumerate() {
        if resolved[i] {
            remaining.push(AtomicUsize::new(0));
            continue;
        }
        unfinished += 1;
        let count = task.prerequisites.iter().filter(|&&p| !resolved[p]).count();
        remaining.push(AtomicUsize::new(count));
    }

    let execution = Arc::new(ExecutionState {
        graph: solved.clone(),
        results,
        remaining,
        unfinished: AtomicUsize::new(unfinished),
        frames: state.frames().iter().map(|f| (f.scope, f.clone())).collect(),
    });

    let mut queue: TaskQueue = VecDeque::new();
    for (i, task) in inner.tasks.iter().enumerate() {
        if !resolved[i] && execution.remaining[i].load(Ordering::Relaxed) == 0 {
            queue.push_back(Some(ExecutorTask::new(task.clone(), execution.clone())));
        }
    }
    tracing::trace!(tasks = n, queued = queue.len(), seeded = n - unfinished, "planned execution");

    Ok((execution, queue))
}

fn scope_position(
    scopes: &[Scope],
    scope: Scope,
    provider: &'static str,
) -> Result<usize, ScopingError> {
    scopes.iter().position(|&s| s == scope).ok_or_else(|| ScopingError::ScopeNotFound {
        provider: provider.to_string(),
        scope,
    })
}
