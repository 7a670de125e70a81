//! Provider callables and their type-erased invocation surface.
//!
//! A [`ProviderCall`] wraps a user callable together with its pre-classified
//! [`ProviderKind`], so the engine never has to re-inspect a callable at
//! execution time. Callables are identified by [`CallKey`]; binds, caches,
//! and caller overrides all key on it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ProviderError;

/// Type-erased value produced by a provider.
pub type DependencyValue = Arc<dyn Any + Send + Sync>;

/// Boxed future used by async providers and async teardowns.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Teardown handle registered by a sync resource provider.
pub type SyncTeardown = Box<dyn FnOnce() -> Result<(), ProviderError> + Send>;

/// Teardown handle registered by an async resource provider.
pub type AsyncTeardown = Box<dyn FnOnce() -> BoxFuture<Result<(), ProviderError>> + Send>;

/// Erases a concrete value into a [`DependencyValue`].
///
/// # Examples
///
/// ```rust
/// use lattice_di::provide;
///
/// let value = provide(42u32);
/// assert_eq!(*value.downcast::<u32>().unwrap(), 42);
/// ```
pub fn provide<T: Send + Sync + 'static>(value: T) -> DependencyValue {
    Arc::new(value)
}

/// Arguments gathered for one provider invocation.
///
/// Positional values arrive in declared order; keyword values are looked up
/// by declared name. Accessors downcast to the concrete type the provider
/// expects, failing with a [`ProviderError`] on a mismatch.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use lattice_di::{provide, ProviderCall};
///
/// let sum = ProviderCall::value("sum", |args| {
///     let a: Arc<i64> = args.positional(0)?;
///     let b: Arc<i64> = args.keyword("b")?;
///     Ok(provide(*a + *b))
/// });
/// assert_eq!(sum.name(), "sum");
/// ```
pub struct ProviderArgs {
    positional: Vec<DependencyValue>,
    keyword: Vec<(&'static str, DependencyValue)>,
}

impl ProviderArgs {
    pub(crate) fn new(
        positional: Vec<DependencyValue>,
        keyword: Vec<(&'static str, DependencyValue)>,
    ) -> Self {
        Self { positional, keyword }
    }

    /// Downcasts the positional argument at `index`.
    pub fn positional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, ProviderError> {
        let value = self
            .positional
            .get(index)
            .ok_or_else(|| ProviderError::from(format!("no positional argument at index {}", index)))?;
        downcast(value, &format!("positional argument {}", index))
    }

    /// Downcasts the keyword argument named `name`.
    pub fn keyword<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ProviderError> {
        let value = self
            .keyword
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| ProviderError::from(format!("no keyword argument named {}", name)))?;
        downcast(value, &format!("keyword argument {}", name))
    }

    /// Number of arguments gathered, positional and keyword combined.
    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    /// True when the provider takes no arguments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast<T: Send + Sync + 'static>(
    value: &DependencyValue,
    what: &str,
) -> Result<Arc<T>, ProviderError> {
    value
        .clone()
        .downcast::<T>()
        .map_err(|_| ProviderError::from(format!("{} is not a {}", what, std::any::type_name::<T>())))
}

/// Classification of a provider callable, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Plain callable returning a value.
    SyncValue,
    /// Future-returning callable.
    AsyncValue,
    /// Callable yielding a value plus a teardown to run at scope exit.
    SyncResource,
    /// Future-returning callable yielding a value plus an async teardown.
    AsyncResource,
}

impl ProviderKind {
    /// True for kinds that suspend during invocation.
    pub fn is_async(self) -> bool {
        matches!(self, ProviderKind::AsyncValue | ProviderKind::AsyncResource)
    }

    /// True for kinds whose teardown must run at scope exit.
    pub fn is_resource(self) -> bool {
        matches!(self, ProviderKind::SyncResource | ProviderKind::AsyncResource)
    }
}

pub(crate) enum Invoke {
    SyncValue(Box<dyn Fn(ProviderArgs) -> Result<DependencyValue, ProviderError> + Send + Sync>),
    AsyncValue(
        Box<dyn Fn(ProviderArgs) -> BoxFuture<Result<DependencyValue, ProviderError>> + Send + Sync>,
    ),
    SyncResource(
        Box<
            dyn Fn(ProviderArgs) -> Result<(DependencyValue, SyncTeardown), ProviderError>
                + Send
                + Sync,
        >,
    ),
    AsyncResource(
        Box<
            dyn Fn(ProviderArgs) -> BoxFuture<Result<(DependencyValue, AsyncTeardown), ProviderError>>
                + Send
                + Sync,
        >,
    ),
}

/// A provider callable with its kind and diagnostic name.
///
/// Constructors return a [`CallRef`]; the callable's identity is the
/// allocation behind that handle, so clones of one `CallRef` share one
/// identity while two separately constructed calls never collide.
pub struct ProviderCall {
    name: &'static str,
    invoke: Invoke,
}

impl ProviderCall {
    /// A sync value provider.
    pub fn value<F>(name: &'static str, f: F) -> CallRef
    where
        F: Fn(ProviderArgs) -> Result<DependencyValue, ProviderError> + Send + Sync + 'static,
    {
        CallRef(Arc::new(Self { name, invoke: Invoke::SyncValue(Box::new(f)) }))
    }

    /// An async value provider.
    pub fn async_value<F, Fut>(name: &'static str, f: F) -> CallRef
    where
        F: Fn(ProviderArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DependencyValue, ProviderError>> + Send + 'static,
    {
        CallRef(Arc::new(Self {
            name,
            invoke: Invoke::AsyncValue(Box::new(move |args| Box::pin(f(args)))),
        }))
    }

    /// A sync resource provider: returns the entered value plus the teardown
    /// to run, in reverse acquisition order, when the owning scope exits.
    pub fn resource<F>(name: &'static str, f: F) -> CallRef
    where
        F: Fn(ProviderArgs) -> Result<(DependencyValue, SyncTeardown), ProviderError>
            + Send
            + Sync
            + 'static,
    {
        CallRef(Arc::new(Self { name, invoke: Invoke::SyncResource(Box::new(f)) }))
    }

    /// An async resource provider.
    pub fn async_resource<F, Fut>(name: &'static str, f: F) -> CallRef
    where
        F: Fn(ProviderArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(DependencyValue, AsyncTeardown), ProviderError>>
            + Send
            + 'static,
    {
        CallRef(Arc::new(Self {
            name,
            invoke: Invoke::AsyncResource(Box::new(move |args| Box::pin(f(args)))),
        }))
    }

    /// A provider that always yields a clone of a fixed value.
    pub fn instance(name: &'static str, value: DependencyValue) -> CallRef {
        Self::value(name, move |_| Ok(value.clone()))
    }

    /// An unwired provider: a stable callable identity whose value must be
    /// supplied through a caller override or a bind. Invoking it directly
    /// fails.
    pub fn supplied(name: &'static str) -> CallRef {
        Self::value(name, move |_| {
            Err(ProviderError::from(format!(
                "provider {} is unwired; supply its value via an override or a bind",
                name
            )))
        })
    }
}

/// Cheaply clonable handle to a [`ProviderCall`].
#[derive(Clone)]
pub struct CallRef(Arc<ProviderCall>);

impl CallRef {
    /// The callable's identity.
    pub fn key(&self) -> CallKey {
        CallKey(Arc::as_ptr(&self.0) as usize)
    }

    /// Diagnostic name given at construction.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// The kind fixed at construction.
    pub fn kind(&self) -> ProviderKind {
        match self.0.invoke {
            Invoke::SyncValue(_) => ProviderKind::SyncValue,
            Invoke::AsyncValue(_) => ProviderKind::AsyncValue,
            Invoke::SyncResource(_) => ProviderKind::SyncResource,
            Invoke::AsyncResource(_) => ProviderKind::AsyncResource,
        }
    }

    pub(crate) fn invoke(&self) -> &Invoke {
        &self.0.invoke
    }
}

impl PartialEq for CallRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CallRef {}

impl fmt::Debug for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRef")
            .field("name", &self.0.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Identity of a provider callable.
///
/// Derived from the callable's allocation; stable while at least one
/// [`CallRef`] to it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallKey(usize);
