//! Resource lifecycles: acquisition, reverse-order release, teardown
//! aggregation, and failure paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lattice_di::{
    provide, AsyncTeardown, CallRef, Container, Dep, ExecutionError, ExecutionOptions,
    ProviderCall, ProviderError, SyncTeardown,
};

type EventLog = Arc<Mutex<Vec<String>>>;

fn logging_resource(name: &'static str, log: &EventLog) -> CallRef {
    let log = log.clone();
    ProviderCall::resource(name, move |_| {
        log.lock().unwrap().push(format!("open {}", name));
        let log = log.clone();
        let teardown: SyncTeardown = Box::new(move || {
            log.lock().unwrap().push(format!("close {}", name));
            Ok(())
        });
        Ok((provide(name.to_string()), teardown))
    })
}

#[test]
fn teardowns_run_in_reverse_acquisition_order() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::new(Dep::new(logging_resource("first", &log)).scoped("app"));
    let second = Arc::new(
        Dep::new(ProviderCall::resource("second", {
            let log = log.clone();
            move |args| {
                let _: Arc<String> = args.positional(0)?;
                log.lock().unwrap().push("open second".to_string());
                let log = log.clone();
                let teardown: SyncTeardown = Box::new(move || {
                    log.lock().unwrap().push("close second".to_string());
                    Ok(())
                });
                Ok((provide("second".to_string()), teardown))
            }
        }))
        .scoped("app")
        .param("first", first),
    );

    let container = Container::new();
    let app = container.enter_global_scope("app").unwrap();
    let solved = container.solve(second).unwrap();
    container.execute_sync(&solved, ExecutionOptions::new()).unwrap();
    app.close().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["open first", "open second", "close second", "close first"]
    );
}

#[test]
fn teardowns_run_when_a_downstream_provider_fails() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let resource = Arc::new(Dep::new(logging_resource("conn", &log)));
    let root = Arc::new(
        Dep::new(ProviderCall::value("handler", |_| {
            Err(ProviderError::from("handler exploded"))
        }))
        .param("conn", resource),
    );

    let container = Container::new();
    let solved = container.solve(root).unwrap();
    let error = container.execute_sync(&solved, ExecutionOptions::new()).unwrap_err();

    assert!(matches!(error, ExecutionError::Provider { .. }));
    // The resource lived in the per-call execution scope, which unwound.
    assert_eq!(*log.lock().unwrap(), vec!["open conn", "close conn"]);
}

#[test]
fn teardown_failures_do_not_mask_the_provider_error() {
    let failing = ProviderCall::resource("failing_resource", |_| {
        let teardown: SyncTeardown = Box::new(|| Err(ProviderError::from("release failed")));
        Ok((provide(()), teardown))
    });
    let root = Arc::new(
        Dep::new(ProviderCall::value("handler", |_| {
            Err(ProviderError::from("handler exploded"))
        }))
        .param("r", Arc::new(Dep::new(failing))),
    );

    let container = Container::new();
    let solved = container.solve(root).unwrap();
    let error = container.execute_sync(&solved, ExecutionOptions::new()).unwrap_err();
    match error {
        ExecutionError::Unwound { source, teardown } => {
            assert!(matches!(*source, ExecutionError::Provider { .. }));
            assert_eq!(teardown.failures.len(), 1);
            assert_eq!(teardown.failures[0].provider, "failing_resource");
        }
        other => panic!("expected an unwound error, got {}", other),
    }
}

#[test]
fn all_teardown_failures_are_collected() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let bad = |name: &'static str| {
        ProviderCall::resource(name, move |_| {
            let teardown: SyncTeardown =
                Box::new(move || Err(ProviderError::from(format!("{} refused", name))));
            Ok((provide(name.to_string()), teardown))
        })
    };
    let good = Arc::new(Dep::new(logging_resource("good", &log)).scoped("app"));
    let root = Arc::new(
        Dep::new(ProviderCall::value("root", |_| Ok(provide(()))))
            .param("a", Arc::new(Dep::new(bad("bad_a")).scoped("app")))
            .param("g", good)
            .param("b", Arc::new(Dep::new(bad("bad_b")).scoped("app"))),
    );

    let container = Container::new();
    let app = container.enter_global_scope("app").unwrap();
    let solved = container.solve(root).unwrap();
    container.execute_sync(&solved, ExecutionOptions::new()).unwrap();

    let error = app.close().unwrap_err();
    assert_eq!(error.failures.len(), 2);
    // The good resource still released despite its neighbors failing.
    assert!(log.lock().unwrap().contains(&"close good".to_string()));
}

#[tokio::test]
async fn async_resource_opens_once_per_scope() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let resource = {
        let opened = opened.clone();
        let closed = closed.clone();
        ProviderCall::async_resource("pool", move |_| {
            let opened = opened.clone();
            let closed = closed.clone();
            async move {
                opened.fetch_add(1, Ordering::SeqCst);
                let teardown: AsyncTeardown = Box::new(move || {
                    Box::pin(async move {
                        closed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                });
                Ok((provide("pool-1".to_string()), teardown))
            }
        })
    };

    let pool = Arc::new(Dep::new(resource).scoped("app"));
    let use_pool = ProviderCall::async_value("use_pool", |args| {
        let pool: Result<Arc<String>, _> = args.positional(0);
        async move { Ok(provide((*pool?).clone())) }
    });
    let root = Arc::new(Dep::new(use_pool).share(false).param("pool", pool));

    let container = Container::new();
    let app = container.enter_global_scope("app").unwrap();
    let solved = container.solve(root).unwrap();

    let first = container.execute_async(&solved, ExecutionOptions::new()).await.unwrap();
    let second = container.execute_async(&solved, ExecutionOptions::new()).await.unwrap();
    assert_eq!(*first.downcast::<String>().unwrap(), "pool-1");
    assert_eq!(*second.downcast::<String>().unwrap(), "pool-1");

    // One open while the scope lives, one close when it exits.
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 0);
    app.close_async().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
