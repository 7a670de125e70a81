//! The container facade: binds, solving, execution, and scope entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dependant::{Dep, Dependant};
use crate::error::{ExecutionError, ScopingError, SolvingError, TeardownError};
use crate::executor::{AsyncExecutor, DefaultExecutor, SyncExecutor};
use crate::planning::plan_execution;
use crate::provider::{provide, CallKey, CallRef, DependencyValue, ProviderCall};
use crate::scope::Scope;
use crate::solver::{solve, SolvedGraph};
use crate::state::{BindUndo, ContainerState, ScopeFrame};
use crate::task::ExecutionState;

/// Caller-supplied values overriding providers by callable identity.
///
/// An overridden provider is never invoked; its tasks are seeded with the
/// supplied value before the executor runs.
#[derive(Default, Clone)]
pub struct CallValues {
    values: HashMap<CallKey, DependencyValue>,
}

impl CallValues {
    /// An empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an override, builder style.
    pub fn with(mut self, call: &CallRef, value: DependencyValue) -> Self {
        self.values.insert(call.key(), value);
        self
    }

    /// Adds an override in place.
    pub fn set(&mut self, call: &CallRef, value: DependencyValue) {
        self.values.insert(call.key(), value);
    }

    pub(crate) fn map(&self) -> &HashMap<CallKey, DependencyValue> {
        &self.values
    }
}

/// Options for one `execute_sync` / `execute_async` call.
///
/// Scope validation is on by default. Callers running the same plan against
/// a stable scope stack can validate once and disable it for later calls.
#[derive(Default, Clone)]
pub struct ExecutionOptions {
    validate_scopes: Option<bool>,
    values: CallValues,
}

impl ExecutionOptions {
    /// Defaults: validate scopes, no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables per-call scope validation.
    pub fn validate_scopes(mut self, validate: bool) -> Self {
        self.validate_scopes = Some(validate);
        self
    }

    /// Adds a caller override for one provider.
    pub fn value(mut self, call: &CallRef, value: DependencyValue) -> Self {
        self.values.set(call, value);
        self
    }

    /// Replaces the whole override set.
    pub fn values(mut self, values: CallValues) -> Self {
        self.values = values;
        self
    }

    fn validate(&self) -> bool {
        self.validate_scopes.unwrap_or(true)
    }
}

struct ContainerShared {
    execution_scope: Scope,
    sync_executor: Option<Arc<dyn SyncExecutor>>,
    async_executor: Option<Arc<dyn AsyncExecutor>>,
    self_call: CallRef,
}

/// Builder for [`Container`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use lattice_di::{ConcurrentExecutor, Container};
///
/// let container = Container::builder()
///     .execution_scope("request")
///     .async_executor(Arc::new(ConcurrentExecutor))
///     .build();
/// assert_eq!(container.scopes().len(), 1); // the permanent "container" scope
/// ```
pub struct ContainerBuilder {
    execution_scope: Scope,
    sync_executor: Option<Arc<dyn SyncExecutor>>,
    async_executor: Option<Arc<dyn AsyncExecutor>>,
}

impl ContainerBuilder {
    /// Defaults: unscoped execution scope, [`DefaultExecutor`] for both
    /// capabilities.
    pub fn new() -> Self {
        Self { execution_scope: Scope::Unscoped, sync_executor: None, async_executor: None }
    }

    /// The scope entered around every call that is not already inside it.
    pub fn execution_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.execution_scope = scope.into();
        self
    }

    /// Replaces the sync executor. Setting either executor explicitly
    /// leaves the other capability absent unless it is set too.
    pub fn sync_executor(mut self, executor: Arc<dyn SyncExecutor>) -> Self {
        self.sync_executor = Some(executor);
        self
    }

    /// Replaces the async executor.
    pub fn async_executor(mut self, executor: Arc<dyn AsyncExecutor>) -> Self {
        self.async_executor = Some(executor);
        self
    }

    /// Builds the container and enters its permanent `"container"` scope.
    pub fn build(self) -> Container {
        let (sync_executor, async_executor) = match (self.sync_executor, self.async_executor) {
            (None, None) => {
                let executor = Arc::new(DefaultExecutor);
                (
                    Some(executor.clone() as Arc<dyn SyncExecutor>),
                    Some(executor as Arc<dyn AsyncExecutor>),
                )
            }
            (sync, async_) => (sync, async_),
        };

        let mut state = ContainerState::new();
        let frame =
            state.enter(Scope::CONTAINER, false).expect("fresh state has no entered scopes");
        let container = Container {
            shared: Arc::new(ContainerShared {
                execution_scope: self.execution_scope,
                sync_executor,
                async_executor,
                self_call: ProviderCall::supplied("Container"),
            }),
            state: Arc::new(RwLock::new(state)),
        };
        frame.store(container.shared.self_call.key(), provide(container.clone()));
        container
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the scope stack and the bind registry; exposes solve, execute, and
/// scope-entry operations.
///
/// `Container` is a cheap handle: clones share the root state, so a global
/// scope entered through one clone is visible through all of them. A local
/// scope instead forks the view; the forked handle lives on the returned
/// [`ScopeGuard`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use lattice_di::{provide, Container, Dep, ExecutionOptions, ProviderCall};
///
/// let one = ProviderCall::value("one", |_| Ok(provide(1i64)));
/// let double = ProviderCall::value("double", |args| {
///     let n: Arc<i64> = args.positional(0)?;
///     Ok(provide(*n * 2))
/// });
///
/// let container = Container::new();
/// let solved = container
///     .solve(Arc::new(Dep::new(double).param("n", Arc::new(Dep::new(one)))))
///     .unwrap();
/// let value = container.execute_sync(&solved, ExecutionOptions::new()).unwrap();
/// assert_eq!(*value.downcast::<i64>().unwrap(), 2);
/// ```
#[derive(Clone)]
pub struct Container {
    shared: Arc<ContainerShared>,
    state: Arc<RwLock<ContainerState>>,
}

impl Container {
    /// A container with default executors and an unscoped execution scope.
    pub fn new() -> Self {
        ContainerBuilder::new().build()
    }

    /// Starts building a customized container.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Ordered view of the entered scope tokens, outermost first.
    pub fn scopes(&self) -> Vec<Scope> {
        self.state.read().scopes()
    }

    /// The callable identity the container registers itself under.
    pub fn provider(&self) -> &CallRef {
        &self.shared.self_call
    }

    /// A descriptor for the container itself, living in the permanent
    /// `"container"` scope, so providers can depend on the container.
    pub fn as_dep(&self) -> Arc<dyn Dependant> {
        Arc::new(Dep::new(self.shared.self_call.clone()).scoped(Scope::CONTAINER))
    }

    /// Installs a replacement descriptor for `target`.
    ///
    /// Binds are looked up purely by callable identity; the scope and other
    /// attributes of the descriptor being replaced play no part. The bind
    /// lives until the returned guard removes it or the scope it was
    /// installed in exits, whichever comes first. Call
    /// [`BindGuard::keep`] to hand the bind's lifetime to the scope.
    pub fn bind(&self, replacement: Arc<dyn Dependant>, target: &CallRef) -> BindGuard {
        let state = self.state.read();
        let undo = state.install_bind(target.key(), replacement);
        if let Some(frame) = state.innermost() {
            let scoped_undo = undo.clone();
            frame.push_sync_teardown("bind", Box::new(move || {
                scoped_undo.undo();
                Ok(())
            }));
        }
        tracing::debug!(replaced = target.name(), "installed bind");
        BindGuard { undo, armed: true }
    }

    /// Solves `root` into a reusable execution plan.
    ///
    /// If the root's own callable is bound, the bound descriptor replaces it
    /// before solving.
    pub fn solve(&self, root: Arc<dyn Dependant>) -> Result<SolvedGraph, SolvingError> {
        let state = self.state.read().clone();
        solve(&state, root)
    }

    /// Enters a scope shared among all handles cloned from this container.
    pub fn enter_global_scope(&self, scope: impl Into<Scope>) -> Result<ScopeGuard, ScopingError> {
        let scope = scope.into();
        let frame = self.state.write().enter(scope, false)?;
        tracing::debug!(scope = %scope, "entered global scope");
        Ok(ScopeGuard { container: self.clone(), frame, global: true, closed: false })
    }

    /// Enters a scope visible only through the guard's forked handle.
    ///
    /// Sibling handles, including concurrent calls on this container, keep
    /// seeing the pre-entry stack. Run calls inside the scope through
    /// [`ScopeGuard::container`].
    pub fn enter_local_scope(&self, scope: impl Into<Scope>) -> Result<ScopeGuard, ScopingError> {
        let scope = scope.into();
        let mut fork = self.state.read().fork();
        let frame = fork.enter(scope, false)?;
        tracing::debug!(scope = %scope, "entered local scope");
        let container =
            Container { shared: self.shared.clone(), state: Arc::new(RwLock::new(fork)) };
        Ok(ScopeGuard { container, frame, global: false, closed: false })
    }

    /// Executes a solved plan synchronously and returns the root value.
    pub fn execute_sync(
        &self,
        solved: &SolvedGraph,
        options: ExecutionOptions,
    ) -> Result<DependencyValue, ExecutionError> {
        let executor = self.shared.sync_executor.clone().ok_or_else(|| {
            ExecutionError::KindMismatch("container has no synchronous executor".to_string())
        })?;

        let snapshot = self.state.read().clone();
        if snapshot.has_scope(self.shared.execution_scope) {
            return self.run_sync_plan(&snapshot, solved, &options, &*executor);
        }

        let mut fork = snapshot.fork();
        let frame =
            fork.enter(self.shared.execution_scope, true).map_err(ExecutionError::Scoping)?;
        let outcome = self.run_sync_plan(&fork, solved, &options, &*executor);
        finish(outcome, frame.unwind_sync())
    }

    /// Executes a solved plan, awaiting async providers, and returns the
    /// root value.
    pub async fn execute_async(
        &self,
        solved: &SolvedGraph,
        options: ExecutionOptions,
    ) -> Result<DependencyValue, ExecutionError> {
        let executor = self.shared.async_executor.clone().ok_or_else(|| {
            ExecutionError::KindMismatch("container has no asynchronous executor".to_string())
        })?;

        let snapshot = self.state.read().clone();
        if snapshot.has_scope(self.shared.execution_scope) {
            return self.run_async_plan(&snapshot, solved, &options, executor).await;
        }

        let mut fork = snapshot.fork();
        let frame =
            fork.enter(self.shared.execution_scope, false).map_err(ExecutionError::Scoping)?;
        let outcome = self.run_async_plan(&fork, solved, &options, executor).await;
        finish(outcome, frame.unwind_async().await)
    }

    fn run_sync_plan(
        &self,
        state: &ContainerState,
        solved: &SolvedGraph,
        options: &ExecutionOptions,
        executor: &dyn SyncExecutor,
    ) -> Result<DependencyValue, ExecutionError> {
        let (execution, queue) =
            plan_execution(state, solved, options.validate(), options.values.map())
                .map_err(ExecutionError::Scoping)?;
        if !queue.is_empty() {
            executor.execute_sync(queue)?;
        }
        commit_shared(state, &execution, solved);
        root_value(&execution, solved)
    }

    async fn run_async_plan(
        &self,
        state: &ContainerState,
        solved: &SolvedGraph,
        options: &ExecutionOptions,
        executor: Arc<dyn AsyncExecutor>,
    ) -> Result<DependencyValue, ExecutionError> {
        let (execution, queue) =
            plan_execution(state, solved, options.validate(), options.values.map())
                .map_err(ExecutionError::Scoping)?;
        if !queue.is_empty() {
            executor.execute_async(queue).await?;
        }
        commit_shared(state, &execution, solved);
        root_value(&execution, solved)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_shared(state: &ContainerState, execution: &ExecutionState, solved: &SolvedGraph) {
    let inner = solved.inner();
    for &i in &inner.to_cache {
        let task = &inner.tasks[i];
        if let (Some(value), Some(frame)) = (execution.results[i].get(), state.frame(task.scope)) {
            frame.store(task.call.key(), value.clone());
            tracing::trace!(provider = task.call.name(), scope = %task.scope, "cached shared result");
        }
    }
}

fn root_value(
    execution: &ExecutionState,
    solved: &SolvedGraph,
) -> Result<DependencyValue, ExecutionError> {
    let inner = solved.inner();
    let root = &inner.tasks[inner.root];
    execution.results[inner.root].get().cloned().ok_or_else(|| ExecutionError::Provider {
        provider: root.call.name().to_string(),
        chain: vec![root.call.name().to_string()],
        source: crate::error::ProviderError::from("root value missing after execution"),
    })
}

fn finish(
    outcome: Result<DependencyValue, ExecutionError>,
    teardown: Result<(), TeardownError>,
) -> Result<DependencyValue, ExecutionError> {
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown)) => Err(ExecutionError::Teardown(teardown)),
        (Err(source), Ok(())) => Err(source),
        (Err(source), Err(teardown)) => {
            Err(ExecutionError::Unwound { source: Box::new(source), teardown })
        }
    }
}

/// An entered scope region.
///
/// Close explicitly to surface teardown failures; a guard dropped without
/// closing still runs sync teardowns best-effort and logs stranded async
/// ones. For local scopes, calls made inside the region go through
/// [`container`](ScopeGuard::container).
#[must_use = "dropping the guard exits the scope immediately"]
pub struct ScopeGuard {
    container: Container,
    frame: Arc<ScopeFrame>,
    global: bool,
    closed: bool,
}

impl ScopeGuard {
    /// The container view with this scope entered.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The scope this guard entered.
    pub fn scope(&self) -> Scope {
        self.frame.scope
    }

    /// Exits the scope, running its release stack synchronously.
    ///
    /// Async teardowns registered in this scope cannot run here and are
    /// reported in the aggregate; use [`close_async`](ScopeGuard::close_async)
    /// when the scope holds async resources.
    pub fn close(mut self) -> Result<(), TeardownError> {
        self.closed = true;
        self.detach();
        self.frame.unwind_sync()
    }

    /// Exits the scope, running its release stack and awaiting async
    /// teardowns.
    pub async fn close_async(mut self) -> Result<(), TeardownError> {
        self.closed = true;
        self.detach();
        self.frame.unwind_async().await
    }

    fn detach(&self) {
        if self.global {
            self.container.state.write().exit(&self.frame);
        }
        tracing::debug!(scope = %self.frame.scope, "exited scope");
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.detach();
        // The frame's release stack unwinds when its last reference drops.
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.frame.scope)
            .field("global", &self.global)
            .finish()
    }
}

/// Scoped-release handle for one installed bind.
///
/// Dropping the guard removes the bind and restores whatever it replaced.
/// The removal is idempotent with the owning scope's exit, so either may
/// come first.
pub struct BindGuard {
    undo: Arc<BindUndo>,
    armed: bool,
}

impl BindGuard {
    /// Removes the bind now.
    pub fn release(self) {}

    /// Leaves the bind installed until its owning scope exits.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        if self.armed {
            self.undo.undo();
        }
    }
}
