//! # lattice-di
//!
//! Graph-solving dependency injection runtime: declare a graph of providers,
//! solve it once into an ordered plan, then execute the plan under a layered
//! scope discipline with memoization of shared values and a single engine
//! driving both sync and suspendable providers.
//!
//! ## Features
//!
//! - **Solve once, execute many**: solving validates the graph (cycles,
//!   scope conflicts) and emits an immutable, reusable [`SolvedGraph`]
//! - **Layered scopes**: named regions own a result cache and a resource
//!   release stack; global scopes propagate to sibling tasks, local scopes
//!   stay isolated
//! - **Four provider kinds**: sync/async values and sync/async resources,
//!   classified at solve time so execution never reflects
//! - **Pluggable executors**: sequential by default, concurrent where
//!   independent subgraphs allow it
//! - **Binds**: redirect any callable identity to a replacement descriptor,
//!   scoped to the region that installed it
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lattice_di::{provide, Container, Dep, ExecutionOptions, ProviderCall};
//!
//! // Providers are callables over type-erased arguments.
//! let one = ProviderCall::value("one", |_| Ok(provide(1i64)));
//! let next = ProviderCall::value("next", |args| {
//!     let n: Arc<i64> = args.positional(0)?;
//!     Ok(provide(*n + 1))
//! });
//! let double = ProviderCall::value("double", |args| {
//!     let n: Arc<i64> = args.positional(0)?;
//!     Ok(provide(*n * 2))
//! });
//!
//! // Descriptors declare scope, sharing, and parameters.
//! let a = Arc::new(Dep::new(one));
//! let b = Arc::new(Dep::new(next).param("a", a));
//! let c = Arc::new(Dep::new(double).param("b", b));
//!
//! let container = Container::new();
//! let solved = container.solve(c).unwrap();
//! let value = container.execute_sync(&solved, ExecutionOptions::new()).unwrap();
//! assert_eq!(*value.downcast::<i64>().unwrap(), 4);
//! ```
//!
//! ## Scopes and resources
//!
//! ```rust
//! use std::sync::Arc;
//! use lattice_di::{provide, Container, Dep, ExecutionOptions, ProviderCall, SyncTeardown};
//!
//! let connection = ProviderCall::resource("connection", |_| {
//!     let teardown: SyncTeardown = Box::new(|| Ok(()));
//!     Ok((provide("conn-1".to_string()), teardown))
//! });
//!
//! let container = Container::new();
//! let app = container.enter_global_scope("app").unwrap();
//! let solved = container
//!     .solve(Arc::new(Dep::new(connection).scoped("app")))
//!     .unwrap();
//!
//! // Shared results are cached in their owning scope: the resource opens
//! // once and is reused while "app" stays entered.
//! let first = container.execute_sync(&solved, ExecutionOptions::new()).unwrap();
//! let second = container.execute_sync(&solved, ExecutionOptions::new()).unwrap();
//! assert!(Arc::ptr_eq(&first, &second));
//!
//! app.close().unwrap(); // teardowns run here, reverse acquisition order
//! ```

pub mod container;
pub mod dependant;
pub mod error;
pub mod executor;
pub mod provider;
pub mod scope;
pub mod solver;
pub mod task;

mod planning;
mod state;

pub use container::{
    BindGuard, CallValues, Container, ContainerBuilder, ExecutionOptions, ScopeGuard,
};
pub use dependant::{
    Dep, Dependant, DependencyParameter, LookupKey, ParameterKind, ParameterSpec,
};
pub use error::{
    ExecutionError, ProviderError, ScopingError, SolvingError, TeardownError, TeardownFailure,
};
pub use executor::{AsyncExecutor, ConcurrentExecutor, DefaultExecutor, SyncExecutor};
pub use provider::{
    provide, AsyncTeardown, BoxFuture, CallKey, CallRef, DependencyValue, ProviderArgs,
    ProviderCall, ProviderKind, SyncTeardown,
};
pub use scope::Scope;
pub use solver::SolvedGraph;
pub use task::{ExecutorTask, TaskQueue};
