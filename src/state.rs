//! Container state: entered scope frames, result caches, release stacks,
//! and the bind registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dependant::Dependant;
use crate::error::{ProviderError, ScopingError, TeardownError, TeardownFailure};
use crate::provider::{AsyncTeardown, CallKey, DependencyValue, SyncTeardown};
use crate::scope::Scope;

enum Teardown {
    Sync(SyncTeardown),
    Async(AsyncTeardown),
}

/// LIFO stack of teardown handles owned by one scope frame.
///
/// A stack flagged `sync_only` belongs to a frame that will be unwound
/// synchronously; async teardowns cannot register there.
struct ReleaseStack {
    sync_only: bool,
    entries: Vec<(String, Teardown)>,
}

impl ReleaseStack {
    fn new(sync_only: bool) -> Self {
        Self { sync_only, entries: Vec::new() }
    }

    fn drain(&mut self) -> Vec<(String, Teardown)> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.reverse();
        entries
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        // Last-resort unwind for frames dropped without an explicit close
        // (including calls cancelled mid-flight).
        for (provider, teardown) in self.entries.drain(..).rev() {
            match teardown {
                Teardown::Sync(f) => {
                    if let Err(error) = f() {
                        tracing::error!(provider = %provider, error = %error, "teardown failed while dropping scope");
                    }
                }
                Teardown::Async(_) => {
                    tracing::warn!(provider = %provider, "scope dropped with a pending async teardown; close the scope with close_async");
                }
            }
        }
    }
}

/// One entered scope: a result cache plus a release stack.
///
/// Frames are shared by reference between container views, so a value cached
/// in an outer scope by one call is visible to every sibling view holding
/// that frame.
pub(crate) struct ScopeFrame {
    pub(crate) scope: Scope,
    cache: Mutex<HashMap<CallKey, DependencyValue>>,
    release: Mutex<ReleaseStack>,
}

impl ScopeFrame {
    pub(crate) fn new(scope: Scope, sync_only: bool) -> Arc<Self> {
        Arc::new(Self {
            scope,
            cache: Mutex::new(HashMap::new()),
            release: Mutex::new(ReleaseStack::new(sync_only)),
        })
    }

    pub(crate) fn cached(&self, key: CallKey) -> Option<DependencyValue> {
        self.cache.lock().get(&key).cloned()
    }

    pub(crate) fn store(&self, key: CallKey, value: DependencyValue) {
        self.cache.lock().insert(key, value);
    }

    pub(crate) fn push_sync_teardown(&self, provider: impl Into<String>, teardown: SyncTeardown) {
        self.release.lock().entries.push((provider.into(), Teardown::Sync(teardown)));
    }

    pub(crate) fn push_async_teardown(
        &self,
        provider: &str,
        teardown: AsyncTeardown,
    ) -> Result<(), ScopingError> {
        let mut release = self.release.lock();
        if release.sync_only {
            return Err(ScopingError::ScopeIncompatibility {
                provider: provider.to_string(),
                scope: self.scope,
            });
        }
        release.entries.push((provider.to_string(), Teardown::Async(teardown)));
        Ok(())
    }

    /// Runs teardowns in reverse acquisition order, synchronously. Async
    /// teardowns cannot run here; each becomes a failure entry.
    pub(crate) fn unwind_sync(&self) -> Result<(), TeardownError> {
        let entries = self.release.lock().drain();
        let mut failures = Vec::new();
        for (provider, teardown) in entries {
            match teardown {
                Teardown::Sync(f) => {
                    if let Err(error) = f() {
                        failures.push(TeardownFailure { provider, error });
                    }
                }
                Teardown::Async(_) => failures.push(TeardownFailure {
                    provider,
                    error: ProviderError::from(
                        "async teardown stranded by a synchronous scope exit; use close_async",
                    ),
                }),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    /// Runs teardowns in reverse acquisition order, awaiting async ones.
    pub(crate) async fn unwind_async(&self) -> Result<(), TeardownError> {
        let entries = self.release.lock().drain();
        let mut failures = Vec::new();
        for (provider, teardown) in entries {
            let outcome = match teardown {
                Teardown::Sync(f) => f(),
                Teardown::Async(f) => f().await,
            };
            if let Err(error) = outcome {
                failures.push(TeardownFailure { provider, error });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}

type BindMap = Arc<Mutex<HashMap<CallKey, Arc<dyn Dependant>>>>;

/// Undo handle for one installed bind, shared between the caller-facing
/// guard and the owning scope's release stack. Idempotent.
pub(crate) struct BindUndo {
    binds: BindMap,
    key: CallKey,
    previous: Option<Arc<dyn Dependant>>,
    done: AtomicBool,
}

impl BindUndo {
    pub(crate) fn undo(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut binds = self.binds.lock();
        match &self.previous {
            Some(previous) => {
                binds.insert(self.key, previous.clone());
            }
            None => {
                binds.remove(&self.key);
            }
        }
    }
}

/// One view of the container: the ordered scope stack plus the binds in
/// effect.
///
/// Cloning shares everything (the view a handle and its clones read);
/// [`fork`](ContainerState::fork) shares the frames but copies the binds,
/// which is how a local scope gets an isolated view.
#[derive(Clone)]
pub(crate) struct ContainerState {
    frames: Vec<Arc<ScopeFrame>>,
    binds: BindMap,
}

impl ContainerState {
    pub(crate) fn new() -> Self {
        Self { frames: Vec::new(), binds: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub(crate) fn scopes(&self) -> Vec<Scope> {
        self.frames.iter().map(|f| f.scope).collect()
    }

    pub(crate) fn has_scope(&self, scope: Scope) -> bool {
        self.frames.iter().any(|f| f.scope == scope)
    }

    pub(crate) fn frames(&self) -> &[Arc<ScopeFrame>] {
        &self.frames
    }

    pub(crate) fn frame(&self, scope: Scope) -> Option<&Arc<ScopeFrame>> {
        self.frames.iter().find(|f| f.scope == scope)
    }

    pub(crate) fn innermost(&self) -> Option<&Arc<ScopeFrame>> {
        self.frames.last()
    }

    pub(crate) fn enter(
        &mut self,
        scope: Scope,
        sync_only: bool,
    ) -> Result<Arc<ScopeFrame>, ScopingError> {
        if self.has_scope(scope) {
            return Err(ScopingError::DuplicateScope(scope));
        }
        let frame = ScopeFrame::new(scope, sync_only);
        self.frames.push(frame.clone());
        Ok(frame)
    }

    pub(crate) fn exit(&mut self, frame: &Arc<ScopeFrame>) {
        self.frames.retain(|f| !Arc::ptr_eq(f, frame));
    }

    /// Forks this view for a local scope: outer frames stay shared, binds
    /// are copied so later bind churn in either view stays invisible to the
    /// other.
    pub(crate) fn fork(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            binds: Arc::new(Mutex::new(self.binds.lock().clone())),
        }
    }

    /// Innermost-first cache lookup across the entered frames.
    pub(crate) fn cached(&self, key: CallKey) -> Option<DependencyValue> {
        self.frames.iter().rev().find_map(|f| f.cached(key))
    }

    pub(crate) fn bound(&self, key: CallKey) -> Option<Arc<dyn Dependant>> {
        self.binds.lock().get(&key).cloned()
    }

    pub(crate) fn install_bind(
        &self,
        key: CallKey,
        replacement: Arc<dyn Dependant>,
    ) -> Arc<BindUndo> {
        let previous = self.binds.lock().insert(key, replacement);
        Arc::new(BindUndo { binds: self.binds.clone(), key, previous, done: AtomicBool::new(false) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn release_stack_runs_in_reverse_order() {
        let frame = ScopeFrame::new(Scope::Named("app"), false);
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            frame.push_sync_teardown(label, Box::new(move || {
                order.lock().push(label);
                Ok(())
            }));
        }
        frame.unwind_sync().unwrap();
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
    }

    #[test]
    fn teardown_failures_are_collected_not_masked() {
        let frame = ScopeFrame::new(Scope::Named("app"), false);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        frame.push_sync_teardown("inner", Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        frame.push_sync_teardown("outer", Box::new(|| Err(ProviderError::from("boom"))));

        let error = frame.unwind_sync().unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert_eq!(error.failures[0].provider, "outer");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_only_frames_refuse_async_teardowns() {
        let frame = ScopeFrame::new(Scope::Named("request"), true);
        let teardown: AsyncTeardown = Box::new(|| Box::pin(async { Ok(()) }));
        let error = frame.push_async_teardown("conn", teardown).unwrap_err();
        assert!(matches!(error, ScopingError::ScopeIncompatibility { .. }));
    }

    #[test]
    fn sync_close_reports_stranded_async_teardowns() {
        let frame = ScopeFrame::new(Scope::Named("app"), false);
        let teardown: AsyncTeardown = Box::new(|| Box::pin(async { Ok(()) }));
        frame.push_async_teardown("conn", teardown).unwrap();
        let error = frame.unwind_sync().unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert!(error.failures[0].error.to_string().contains("close_async"));
    }

    #[test]
    fn fork_shares_frames_but_copies_binds() {
        use crate::dependant::Dep;
        use crate::provider::{provide, ProviderCall};

        let mut state = ContainerState::new();
        state.enter(Scope::Named("app"), false).unwrap();

        let fork = state.fork();
        assert!(fork.has_scope(Scope::Named("app")));
        assert!(Arc::ptr_eq(&state.frames[0], &fork.frames[0]));

        let target = ProviderCall::supplied("Request").key();
        let replacement: Arc<dyn Dependant> =
            Arc::new(Dep::new(ProviderCall::value("request", |_| Ok(provide(1u8)))));
        fork.install_bind(target, replacement);
        assert!(fork.bound(target).is_some());
        assert!(state.bound(target).is_none());
    }

    #[test]
    fn bind_undo_restores_the_previous_binding() {
        use crate::dependant::Dep;
        use crate::provider::{provide, ProviderCall};

        let state = ContainerState::new();
        let target = ProviderCall::supplied("Request").key();
        let first: Arc<dyn Dependant> =
            Arc::new(Dep::new(ProviderCall::value("first", |_| Ok(provide(1u8)))));
        let second: Arc<dyn Dependant> =
            Arc::new(Dep::new(ProviderCall::value("second", |_| Ok(provide(2u8)))));

        let outer = state.install_bind(target, first);
        let inner = state.install_bind(target, second);

        inner.undo();
        assert_eq!(state.bound(target).unwrap().name(), "first");
        inner.undo();
        assert_eq!(state.bound(target).unwrap().name(), "first");
        outer.undo();
        assert!(state.bound(target).is_none());
    }
}
