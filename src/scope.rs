//! Scope tokens naming nested lifetime regions.

use std::fmt;

/// Token naming a nested lifetime region.
///
/// Scopes are entered in order onto the container's scope stack; a scope
/// entered earlier is an ancestor of every scope entered after it. Each
/// entered scope owns a result cache and a release stack, so a provider
/// declared in scope `"app"` is cached for as long as `"app"` stays on the
/// stack, and its resources are released when `"app"` exits.
///
/// # Examples
///
/// ```rust
/// use lattice_di::Scope;
///
/// let app: Scope = "app".into();
/// assert_eq!(app, Scope::Named("app"));
/// assert_ne!(app, Scope::Unscoped);
/// assert_eq!(app.to_string(), "app");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The anonymous default region.
    ///
    /// Descriptors that declare no scope live here, and a container with no
    /// configured execution scope enters this token around every call.
    Unscoped,
    /// A named region such as `"app"` or `"request"`.
    Named(&'static str),
}

impl Scope {
    /// The permanent scope every container enters at construction and
    /// registers itself under.
    pub const CONTAINER: Scope = Scope::Named("container");

    /// Human-readable name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Scope::Unscoped => "<unscoped>",
            Scope::Named(name) => name,
        }
    }
}

impl From<&'static str> for Scope {
    fn from(name: &'static str) -> Self {
        Scope::Named(name)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_scopes_compare_by_token() {
        assert_eq!(Scope::from("app"), Scope::Named("app"));
        assert_ne!(Scope::Named("app"), Scope::Named("request"));
        assert_ne!(Scope::Named("app"), Scope::Unscoped);
    }

    #[test]
    fn display_uses_the_token_name() {
        assert_eq!(Scope::Named("request").to_string(), "request");
        assert_eq!(Scope::Unscoped.to_string(), "<unscoped>");
        assert_eq!(Scope::CONTAINER.to_string(), "container");
    }

    #[test]
    fn the_container_scope_is_a_named_token() {
        assert_eq!(Scope::CONTAINER, Scope::Named("container"));
    }
}
