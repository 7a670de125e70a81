//! The solver: walks a declared dependency graph, deduplicates equivalent
//! descriptors, resolves binds, and emits a topologically ordered plan.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::dependant::{Dependant, LookupKey, ParameterKind, ParameterSpec};
use crate::error::SolvingError;
use crate::state::ContainerState;
use crate::task::Task;

/// An immutable, reusable execution plan for one root descriptor.
///
/// Produced by [`Container::solve`](crate::Container::solve). Tasks are
/// stored in topological order: every task's prerequisites precede it.
/// Solving the same root twice yields equal plans; the plan itself is pure
/// data and cheap to clone.
#[derive(Clone)]
pub struct SolvedGraph {
    inner: Arc<SolvedInner>,
}

pub(crate) struct SolvedInner {
    pub(crate) root: usize,
    pub(crate) tasks: Vec<Arc<Task>>,
    /// Tasks whose values are committed to their scope caches after a
    /// successful call.
    pub(crate) to_cache: Vec<usize>,
}

impl SolvedGraph {
    pub(crate) fn inner(&self) -> &SolvedInner {
        &self.inner
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    /// A plan always contains at least the root task.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    /// Provider names in topological order, for diagnostics.
    pub fn providers(&self) -> Vec<&'static str> {
        self.inner.tasks.iter().map(|t| t.call.name()).collect()
    }

    /// Name of the root provider.
    pub fn root_provider(&self) -> &'static str {
        self.inner.tasks[self.inner.root].call.name()
    }
}

impl std::fmt::Debug for SolvedGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolvedGraph")
            .field("root", &self.root_provider())
            .field("tasks", &self.providers())
            .finish()
    }
}

fn resolve_bind(state: &ContainerState, dep: Arc<dyn Dependant>) -> Arc<dyn Dependant> {
    match dep.call().map(|c| c.key()).and_then(|k| state.bound(k)) {
        Some(bound) => bound,
        None => dep,
    }
}

/// Registers a descriptor, enforcing scope consistency on equivalence hits.
fn intern(
    dep: Arc<dyn Dependant>,
    registry: &mut HashMap<LookupKey, usize>,
    nodes: &mut Vec<Arc<dyn Dependant>>,
    pending: &mut VecDeque<usize>,
) -> Result<usize, SolvingError> {
    let key = dep.lookup_key();
    if let Some(&id) = registry.get(&key) {
        let existing = &nodes[id];
        if existing.scope() != dep.scope() {
            return Err(SolvingError::ScopeConflict {
                provider: dep.name(),
                first: existing.scope(),
                second: dep.scope(),
            });
        }
        return Ok(id);
    }
    if dep.call().is_none() {
        return Err(SolvingError::InvalidProvider(dep.name()));
    }
    let id = nodes.len();
    registry.insert(key, id);
    nodes.push(dep);
    pending.push_back(id);
    Ok(id)
}

pub(crate) fn solve(
    state: &ContainerState,
    root: Arc<dyn Dependant>,
) -> Result<SolvedGraph, SolvingError> {
    // A bind may redirect the root itself.
    let root = resolve_bind(state, root);

    let mut registry: HashMap<LookupKey, usize> = HashMap::new();
    let mut nodes: Vec<Arc<dyn Dependant>> = Vec::new();
    let mut pending: VecDeque<usize> = VecDeque::new();
    // Linked parameters per node, aligned with node ids.
    let mut params: Vec<Vec<(ParameterSpec, usize)>> = Vec::new();

    let root_id = intern(root, &mut registry, &mut nodes, &mut pending)?;
    while let Some(id) = pending.pop_front() {
        debug_assert_eq!(params.len(), id);
        let declared = nodes[id].dependencies();
        let mut linked = Vec::with_capacity(declared.len());
        for p in declared {
            let child = resolve_bind(state, p.dependency);
            let child_id = intern(child, &mut registry, &mut nodes, &mut pending)?;
            linked.push((p.parameter, child_id));
        }
        params.push(linked);
    }

    let n = nodes.len();
    let mut prerequisites: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut dependants_of: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (id, linked) in params.iter().enumerate() {
        let mut unique: Vec<usize> = Vec::new();
        for (_, child) in linked {
            if !unique.contains(child) {
                unique.push(*child);
                dependants_of[*child].push(id);
            }
        }
        prerequisites.push(unique);
    }

    // Kahn's algorithm, leaves first, so prerequisites precede dependants.
    let mut missing: Vec<usize> = prerequisites.iter().map(|p| p.len()).collect();
    let mut ready: VecDeque<usize> = (0..n).filter(|&i| missing[i] == 0).collect();
    let mut topo: Vec<usize> = Vec::with_capacity(n);
    while let Some(id) = ready.pop_front() {
        topo.push(id);
        for &dependant in &dependants_of[id] {
            missing[dependant] -= 1;
            if missing[dependant] == 0 {
                ready.push_back(dependant);
            }
        }
    }
    if topo.len() != n {
        let cycle: Vec<String> =
            (0..n).filter(|&i| missing[i] > 0).map(|i| nodes[i].name()).collect();
        return Err(SolvingError::CircularDependency(cycle));
    }

    // Breadcrumb chains, root outward.
    let mut chains: Vec<Option<Vec<String>>> = vec![None; n];
    chains[root_id] = Some(vec![nodes[root_id].name()]);
    let mut walk = VecDeque::from([root_id]);
    while let Some(id) = walk.pop_front() {
        let base = chains[id].clone().expect("chain assigned before visit");
        for (_, child) in &params[id] {
            if chains[*child].is_none() {
                let mut chain = base.clone();
                chain.push(nodes[*child].name());
                chains[*child] = Some(chain);
                walk.push_back(*child);
            }
        }
    }

    let mut new_id = vec![0usize; n];
    for (position, &old) in topo.iter().enumerate() {
        new_id[old] = position;
    }

    let mut tasks: Vec<Task> = Vec::with_capacity(n);
    for (position, &old) in topo.iter().enumerate() {
        let dependant = nodes[old].clone();
        let call =
            dependant.call().ok_or_else(|| SolvingError::InvalidProvider(dependant.name()))?;
        let mut positional = Vec::new();
        let mut keyword = Vec::new();
        for (spec, child) in &params[old] {
            let child = new_id[*child];
            match spec.kind {
                ParameterKind::Positional(_) => positional.push(child),
                ParameterKind::Keyword => keyword.push((spec.name, child)),
            }
        }
        tasks.push(Task {
            index: position,
            kind: call.kind(),
            scope: dependant.scope(),
            shared: dependant.shared(),
            call,
            positional,
            keyword,
            prerequisites: prerequisites[old].iter().map(|&c| new_id[c]).collect(),
            dependants: Vec::new(),
            chain: chains[old].take().expect("every solved node is reachable from the root"),
        });
    }

    let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); n];
    for task in &tasks {
        for &p in &task.prerequisites {
            dependants[p].push(task.index);
        }
    }
    for (index, list) in dependants.into_iter().enumerate() {
        tasks[index].dependants = list;
    }

    let to_cache: Vec<usize> = tasks.iter().filter(|t| t.shared).map(|t| t.index).collect();
    let root = new_id[root_id];
    tracing::debug!(root = tasks[root].call.name(), tasks = n, "solved provider graph");

    Ok(SolvedGraph {
        inner: Arc::new(SolvedInner {
            root,
            tasks: tasks.into_iter().map(Arc::new).collect(),
            to_cache,
        }),
    })
}
