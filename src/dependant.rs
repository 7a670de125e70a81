//! Dependency descriptors: what to call, in which scope, with which
//! parameters.
//!
//! [`Dep`] is the concrete descriptor most callers declare. The [`Dependant`]
//! trait is the seam for custom descriptors: the solver only ever sees the
//! trait, so implementations may compute their parameters dynamically or
//! redefine equivalence.

use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::provider::{CallKey, CallRef};
use crate::scope::Scope;

/// How a parameter is passed to its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Passed by position, in declared order.
    Positional(usize),
    /// Passed by name.
    Keyword,
}

/// Declared parameter of a provider.
///
/// Carries the parameter's name and kind, and optionally the declared type,
/// so a late-binding descriptor can finalize itself from the site it is
/// bound to (for example, "read the header named after this parameter").
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    /// Parameter name as declared.
    pub name: &'static str,
    /// Positional or keyword.
    pub kind: ParameterKind,
    /// Declared type, when the declaration site recorded it.
    pub type_id: Option<TypeId>,
    /// Declared type name, for diagnostics and conversion hooks.
    pub type_name: Option<&'static str>,
}

/// A parameter paired with the descriptor that produces its value.
#[derive(Clone)]
pub struct DependencyParameter {
    /// The parameter being filled.
    pub parameter: ParameterSpec,
    /// The descriptor producing its value.
    pub dependency: Arc<dyn Dependant>,
}

/// Equivalence key used to deduplicate descriptors while solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// Equivalent to any other descriptor over the same callable.
    Call(CallKey),
    /// Equivalent only to itself.
    Instance(usize),
}

/// A declaration of a provider plus its scope, sharing flag, and parameters.
///
/// The solver treats implementations as opaque: it calls
/// [`dependencies`](Dependant::dependencies) once per unique descriptor and
/// deduplicates through [`lookup_key`](Dependant::lookup_key), never through
/// structural equality. Two equivalent descriptors declaring different
/// scopes are rejected while solving.
pub trait Dependant: Send + Sync + 'static {
    /// The callable to invoke, if wired. `None` after the late-binding hook
    /// has run is a solving error.
    fn call(&self) -> Option<CallRef>;

    /// The scope this provider's value and resources belong to.
    fn scope(&self) -> Scope;

    /// Whether the computed value is cached in the declared scope and reused
    /// while that scope lives.
    fn shared(&self) -> bool;

    /// Declared parameters. Called once per unique descriptor per solve.
    fn dependencies(&self) -> Vec<DependencyParameter>;

    /// Late-binding hook: a descriptor may specialize itself for the
    /// parameter it fills. Implementations that specialize MUST return a
    /// fresh descriptor rather than mutating shared state, so one descriptor
    /// used at two sites yields two independent specializations. `None`
    /// keeps the descriptor as is.
    fn register_parameter(&self, _parameter: &ParameterSpec) -> Option<Arc<dyn Dependant>> {
        None
    }

    /// Equivalence hook. Descriptors with equal keys collapse to one task in
    /// the solved plan.
    fn lookup_key(&self) -> LookupKey;

    /// Diagnostic name.
    fn name(&self) -> String {
        match self.call() {
            Some(call) => call.name().to_string(),
            None => "<unwired>".to_string(),
        }
    }
}

static NEXT_DEP_ID: AtomicUsize = AtomicUsize::new(1);

/// The concrete descriptor.
///
/// Defaults: [`Scope::Unscoped`], shared. A shared `Dep` is equivalent to
/// every other shared descriptor over the same callable; a non-shared `Dep`
/// is equivalent only to itself, so declaring the same callable through two
/// non-shared descriptors yields two invocations per call.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use lattice_di::{provide, Dep, ProviderCall};
///
/// let config = ProviderCall::value("config", |_| Ok(provide("hello".to_string())));
/// let greet = ProviderCall::value("greet", |args| {
///     let config: Arc<String> = args.positional(0)?;
///     Ok(provide(format!("{} world", config)))
/// });
///
/// let root = Dep::new(greet)
///     .scoped("request")
///     .param("config", Arc::new(Dep::new(config).scoped("app")));
/// ```
pub struct Dep {
    id: usize,
    call: Option<CallRef>,
    scope: Scope,
    shared: bool,
    params: Vec<DependencyParameter>,
}

impl Dep {
    /// A shared, unscoped descriptor over `call`.
    pub fn new(call: CallRef) -> Self {
        Self {
            id: NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed),
            call: Some(call),
            scope: Scope::Unscoped,
            shared: true,
            params: Vec::new(),
        }
    }

    /// Declares the scope this provider belongs to.
    pub fn scoped(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the sharing flag. Non-shared descriptors are never cached and
    /// never considered equivalent to another descriptor.
    pub fn share(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Declares the next positional parameter.
    pub fn param(self, name: &'static str, dependency: Arc<dyn Dependant>) -> Self {
        self.push_positional(name, dependency, None, None)
    }

    /// Declares the next positional parameter along with its declared type,
    /// for descriptors that finalize themselves from it.
    pub fn typed_param<T: 'static>(self, name: &'static str, dependency: Arc<dyn Dependant>) -> Self {
        self.push_positional(
            name,
            dependency,
            Some(TypeId::of::<T>()),
            Some(std::any::type_name::<T>()),
        )
    }

    /// Declares a keyword parameter.
    pub fn kwarg(mut self, name: &'static str, dependency: Arc<dyn Dependant>) -> Self {
        self.params.push(DependencyParameter {
            parameter: ParameterSpec { name, kind: ParameterKind::Keyword, type_id: None, type_name: None },
            dependency,
        });
        self
    }

    fn push_positional(
        mut self,
        name: &'static str,
        dependency: Arc<dyn Dependant>,
        type_id: Option<TypeId>,
        type_name: Option<&'static str>,
    ) -> Self {
        let index = self
            .params
            .iter()
            .filter(|p| matches!(p.parameter.kind, ParameterKind::Positional(_)))
            .count();
        self.params.push(DependencyParameter {
            parameter: ParameterSpec { name, kind: ParameterKind::Positional(index), type_id, type_name },
            dependency,
        });
        self
    }
}

impl Dependant for Dep {
    fn call(&self) -> Option<CallRef> {
        self.call.clone()
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn shared(&self) -> bool {
        self.shared
    }

    fn dependencies(&self) -> Vec<DependencyParameter> {
        self.params
            .iter()
            .map(|p| {
                let dependency = p
                    .dependency
                    .register_parameter(&p.parameter)
                    .unwrap_or_else(|| p.dependency.clone());
                DependencyParameter { parameter: p.parameter.clone(), dependency }
            })
            .collect()
    }

    fn lookup_key(&self) -> LookupKey {
        match (&self.call, self.shared) {
            (Some(call), true) => LookupKey::Call(call.key()),
            _ => LookupKey::Instance(self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{provide, ProviderCall};

    #[test]
    fn shared_deps_over_one_callable_are_equivalent() {
        let call = ProviderCall::value("a", |_| Ok(provide(1u8)));
        let first = Dep::new(call.clone());
        let second = Dep::new(call);
        assert_eq!(first.lookup_key(), second.lookup_key());
    }

    #[test]
    fn non_shared_deps_are_unique() {
        let call = ProviderCall::value("a", |_| Ok(provide(1u8)));
        let first = Dep::new(call.clone()).share(false);
        let second = Dep::new(call).share(false);
        assert_ne!(first.lookup_key(), second.lookup_key());
        assert_eq!(first.lookup_key(), first.lookup_key());
    }

    #[test]
    fn positional_indices_follow_declaration_order() {
        let call = ProviderCall::value("f", |_| Ok(provide(())));
        let a = Arc::new(Dep::new(ProviderCall::value("a", |_| Ok(provide(1u8)))));
        let b = Arc::new(Dep::new(ProviderCall::value("b", |_| Ok(provide(2u8)))));
        let dep = Dep::new(call).param("a", a).kwarg("flag", b.clone()).param("b", b);

        let params = dep.dependencies();
        assert_eq!(params[0].parameter.kind, ParameterKind::Positional(0));
        assert_eq!(params[1].parameter.kind, ParameterKind::Keyword);
        assert_eq!(params[2].parameter.kind, ParameterKind::Positional(1));
    }

    #[test]
    fn typed_params_record_the_declared_type() {
        let call = ProviderCall::value("f", |_| Ok(provide(())));
        let a = Arc::new(Dep::new(ProviderCall::value("a", |_| Ok(provide(1u8)))));
        let dep = Dep::new(call).typed_param::<u8>("a", a);
        let params = dep.dependencies();
        assert_eq!(params[0].parameter.type_id, Some(TypeId::of::<u8>()));
    }
}
