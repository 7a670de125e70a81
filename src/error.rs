//! Error types for graph solving, scope management, and execution.

use std::fmt;

use crate::scope::Scope;

/// Error raised by a provider body or a resource teardown.
///
/// Provider errors propagate to the caller unchanged; the engine only wraps
/// them to attach the dependency chain that led to the failing provider.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Errors detected while solving a dependency graph.
///
/// Solving errors are fatal to the `solve` call; no plan is produced.
///
/// # Examples
///
/// ```rust
/// use lattice_di::{Scope, SolvingError};
///
/// let circular = SolvingError::CircularDependency(vec![
///     "config".to_string(),
///     "database".to_string(),
/// ]);
/// let conflict = SolvingError::ScopeConflict {
///     provider: "database".to_string(),
///     first: Scope::Named("app"),
///     second: Scope::Named("request"),
/// };
/// println!("{}", circular);
/// println!("{}", conflict);
/// ```
#[derive(Debug)]
pub enum SolvingError {
    /// The provider graph contains a cycle; carries the participating
    /// provider names.
    CircularDependency(Vec<String>),
    /// Two descriptors with equivalent lookup keys declare different scopes.
    ScopeConflict {
        /// Name of the provider declared twice.
        provider: String,
        /// Scope recorded at the first site.
        first: Scope,
        /// Scope found at the second site.
        second: Scope,
    },
    /// A descriptor has no callable after its late-binding hook ran.
    InvalidProvider(String),
}

impl fmt::Display for SolvingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolvingError::CircularDependency(path) => {
                write!(f, "Circular dependency: {}", path.join(" -> "))
            }
            SolvingError::ScopeConflict { provider, first, second } => write!(
                f,
                "Provider {} is declared with equivalent lookup keys but different scopes \
                 ({} and {}); wrap the callable or override the equivalence hook if both \
                 declarations are intentional",
                provider, first, second
            ),
            SolvingError::InvalidProvider(name) => {
                write!(f, "Provider {} has no callable to invoke", name)
            }
        }
    }
}

impl std::error::Error for SolvingError {}

/// Errors raised by scope entry, validation, or resource registration.
#[derive(Debug)]
pub enum ScopingError {
    /// The scope token is already on the stack.
    DuplicateScope(Scope),
    /// A provider's declared scope is not among the entered scopes.
    ScopeNotFound {
        /// Name of the provider whose scope is missing.
        provider: String,
        /// The missing scope.
        scope: Scope,
    },
    /// A provider references a dependency living in a scope entered later
    /// than its own.
    ScopeViolation {
        /// Name of the depending provider.
        provider: String,
        /// Scope of the depending provider.
        scope: Scope,
        /// Name of the referenced dependency.
        dependency: String,
        /// Scope of the referenced dependency.
        dependency_scope: Scope,
    },
    /// An async resource tried to register its teardown in a scope that is
    /// managed synchronously.
    ScopeIncompatibility {
        /// Name of the async resource provider.
        provider: String,
        /// The synchronous scope.
        scope: Scope,
    },
}

impl fmt::Display for ScopingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopingError::DuplicateScope(scope) => {
                write!(f, "Scope {} has already been entered", scope)
            }
            ScopingError::ScopeNotFound { provider, scope } => write!(
                f,
                "Provider {} is declared in scope {} which has not been entered",
                provider, scope
            ),
            ScopingError::ScopeViolation { provider, scope, dependency, dependency_scope } => {
                write!(
                    f,
                    "Provider {} (scope {}) depends on {} (scope {}), which is entered later; \
                     dependencies may only live in the same scope or an outer one",
                    provider, scope, dependency, dependency_scope
                )
            }
            ScopingError::ScopeIncompatibility { provider, scope } => write!(
                f,
                "Provider {} is an async resource and cannot release into the synchronous \
                 scope {}",
                provider, scope
            ),
        }
    }
}

impl std::error::Error for ScopingError {}

/// A single failed teardown, identified by its provider.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Name of the provider whose teardown failed.
    pub provider: String,
    /// The error the teardown raised.
    pub error: ProviderError,
}

/// Aggregate of teardown failures collected during a scope exit.
///
/// Every teardown on the release stack is attempted even when earlier ones
/// fail; the failures are collected here rather than masking one another.
#[derive(Debug)]
pub struct TeardownError {
    /// The collected failures, in teardown (reverse acquisition) order.
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.failures.iter().map(|t| t.provider.as_str()).collect();
        write!(
            f,
            "Teardown failed for {} resource(s): {}",
            self.failures.len(),
            names.join(", ")
        )
    }
}

impl std::error::Error for TeardownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.failures.first() {
            Some(first) => Some(first.error.as_ref()),
            None => None,
        }
    }
}

/// Errors surfaced by `execute_sync` / `execute_async`.
#[derive(Debug)]
pub enum ExecutionError {
    /// The executor pulled a task it cannot drive, or the container lacks an
    /// executor of the requested kind.
    KindMismatch(String),
    /// A provider failed; carries the dependency chain from the root to the
    /// failing provider as a breadcrumb.
    Provider {
        /// Name of the failing provider.
        provider: String,
        /// Provider names from the root down to the failing provider.
        chain: Vec<String>,
        /// The provider's own error, unchanged.
        source: ProviderError,
    },
    /// Scope validation or resource registration failed.
    Scoping(ScopingError),
    /// The call succeeded but unwinding the execution scope failed.
    Teardown(TeardownError),
    /// A primary failure plus teardown failures collected while unwinding.
    Unwound {
        /// The error that aborted the call.
        source: Box<ExecutionError>,
        /// Teardown failures encountered during the unwind.
        teardown: TeardownError,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::KindMismatch(reason) => {
                write!(f, "Executor kind mismatch: {}", reason)
            }
            ExecutionError::Provider { provider, chain, source } => write!(
                f,
                "Provider {} failed (dependency chain: {}): {}",
                provider,
                chain.join(" -> "),
                source
            ),
            ExecutionError::Scoping(error) => write!(f, "{}", error),
            ExecutionError::Teardown(error) => write!(f, "{}", error),
            ExecutionError::Unwound { source, teardown } => {
                write!(f, "{} (additionally, {})", source, teardown)
            }
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::KindMismatch(_) => None,
            ExecutionError::Provider { source, .. } => Some(source.as_ref()),
            ExecutionError::Scoping(error) => Some(error),
            ExecutionError::Teardown(error) => Some(error),
            ExecutionError::Unwound { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<ScopingError> for ExecutionError {
    fn from(error: ScopingError) -> Self {
        ExecutionError::Scoping(error)
    }
}

impl From<TeardownError> for ExecutionError {
    fn from(error: TeardownError) -> Self {
        ExecutionError::Teardown(error)
    }
}
