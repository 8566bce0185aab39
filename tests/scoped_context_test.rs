//! Tests for scoped proxy selection and isolation between units of work

use std::panic;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use proxyscope::protocol::TargetAddr;
use proxyscope::routing::{Proxy, ProxyEndpoint, ProxyResolver, ScopedProxyResolver};
use proxyscope::ProxyContext;

fn proxy_a() -> Proxy {
    ProxyEndpoint::socks5("localhost", 1080).unwrap().into()
}

fn proxy_b() -> Proxy {
    ProxyEndpoint::socks5("localhost", 1081).unwrap().into()
}

fn db1() -> TargetAddr {
    TargetAddr::Domain("db1".to_string())
}

#[test]
fn test_resolve_inside_and_after_scope() {
    let resolver = ScopedProxyResolver::new();

    let scope = ProxyContext::enter(proxy_a());
    assert_eq!(resolver.select(&db1(), 5432), vec![proxy_a()]);

    scope.exit();
    assert_eq!(resolver.select(&db1(), 5432), vec![Proxy::Direct]);
}

#[test]
fn test_error_inside_scope_still_releases() {
    fn failing_work() -> anyhow::Result<()> {
        let _scope = ProxyContext::enter(proxy_a());
        assert_eq!(ProxyContext::current(), Some(proxy_a()));
        anyhow::bail!("database unavailable");
    }

    assert!(failing_work().is_err());
    assert!(ProxyContext::current().is_none());
}

#[test]
fn test_panic_inside_scope_still_releases() {
    let result = panic::catch_unwind(|| {
        ProxyContext::sync_scope(proxy_a(), || panic!("driver blew up"))
    });

    assert!(result.is_err());
    assert!(ProxyContext::current().is_none());
}

#[test]
fn test_release_then_reset_stays_clear() {
    let scope = ProxyContext::enter(proxy_b());
    scope.exit();
    ProxyContext::reset();
    ProxyContext::reset();
    assert!(ProxyContext::current().is_none());
}

#[test]
fn test_threads_do_not_see_each_other() {
    let barrier = Arc::new(Barrier::new(2));

    let spawn_worker = |proxy: Proxy| {
        let barrier = barrier.clone();
        thread::spawn(move || {
            let _scope = ProxyContext::enter(proxy.clone());
            // Both scopes are open at the same time past this point
            barrier.wait();
            for _ in 0..100 {
                assert_eq!(ProxyContext::current(), Some(proxy.clone()));
                thread::yield_now();
            }
            barrier.wait();
            ScopedProxyResolver::new().select(&db1(), 5432)
        })
    };

    let worker_a = spawn_worker(proxy_a());
    let worker_b = spawn_worker(proxy_b());

    assert_eq!(worker_a.join().unwrap(), vec![proxy_a()]);
    assert_eq!(worker_b.join().unwrap(), vec![proxy_b()]);
    assert!(ProxyContext::current().is_none());
}

#[test]
fn test_thread_scope_not_inherited_by_spawned_thread() {
    let _scope = ProxyContext::enter(proxy_a());
    let seen = thread::spawn(ProxyContext::current).join().unwrap();
    assert!(seen.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_tasks_keep_their_own_proxy() {
    let resolver = Arc::new(ScopedProxyResolver::new());

    let task = |proxy: Proxy, delay_ms: u64| {
        let resolver = resolver.clone();
        tokio::spawn(ProxyContext::scope(proxy, async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let first = resolver.select(&db1(), 5432);
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let second = resolver.select(&db1(), 5432);
            (first, second)
        }))
    };

    let task1 = task(proxy_a(), 30);
    let task2 = task(proxy_b(), 10);

    let (a1, a2) = task1.await.unwrap();
    let (b1, b2) = task2.await.unwrap();

    assert_eq!(a1, vec![proxy_a()]);
    assert_eq!(a2, vec![proxy_a()]);
    assert_eq!(b1, vec![proxy_b()]);
    assert_eq!(b2, vec![proxy_b()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_interleaved_tasks() {
    let mut handles = Vec::new();

    for i in 0..32u16 {
        let proxy: Proxy = ProxyEndpoint::socks5("127.0.0.1", 10_000 + i).unwrap().into();
        handles.push(tokio::spawn(ProxyContext::scope(proxy.clone(), async move {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert_eq!(ProxyContext::current(), Some(proxy.clone()));
            }
        })));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_spawned_task_does_not_inherit_scope() {
    let seen = ProxyContext::scope(proxy_a(), async {
        tokio::spawn(async { ProxyContext::current() }).await.unwrap()
    })
    .await;

    assert!(seen.is_none());
}

#[tokio::test]
async fn test_task_scope_released_on_error() {
    let result: anyhow::Result<()> = ProxyContext::scope(proxy_a(), async {
        assert_eq!(ProxyContext::current(), Some(proxy_a()));
        anyhow::bail!("query failed")
    })
    .await;

    assert!(result.is_err());
    assert!(ProxyContext::current().is_none());
}

#[tokio::test]
async fn test_task_scope_released_on_cancellation() {
    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        ProxyContext::scope(proxy_a(), tokio::time::sleep(Duration::from_secs(10))),
    )
    .await;

    assert!(outcome.is_err());
    assert!(ProxyContext::current().is_none());
}

#[tokio::test]
async fn test_nested_task_scope_restores_outer() {
    let (inner, after_inner) = ProxyContext::scope(proxy_a(), async {
        let inner = ProxyContext::scope(proxy_b(), async { ProxyContext::current() }).await;
        (inner, ProxyContext::current())
    })
    .await;

    assert_eq!(inner, Some(proxy_b()));
    assert_eq!(after_inner, Some(proxy_a()));
}

#[tokio::test]
async fn test_joined_scopes_inside_outer_scope_are_isolated() {
    let observe = |proxy: Proxy, delay_ms: u64| {
        ProxyContext::scope(proxy, async move {
            let before = ProxyContext::current();
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            (before, ProxyContext::current())
        })
    };

    let (first, second, outer) = ProxyContext::scope(Proxy::Direct, async {
        let (first, second) = tokio::join!(observe(proxy_a(), 30), observe(proxy_b(), 5));
        (first, second, ProxyContext::current())
    })
    .await;

    assert_eq!(first, (Some(proxy_a()), Some(proxy_a())));
    assert_eq!(second, (Some(proxy_b()), Some(proxy_b())));
    assert_eq!(outer, Some(Proxy::Direct));
}

#[tokio::test]
async fn test_entered_guard_invisible_to_tasks_on_same_thread() {
    let _scope = ProxyContext::enter(proxy_a());

    let seen = tokio::spawn(async { ProxyContext::current() }).await.unwrap();
    assert!(seen.is_none());

    tokio::task::yield_now().await;
    assert_eq!(ProxyContext::current(), Some(proxy_a()));
}

#[tokio::test]
async fn test_local_tasks_keep_separate_entered_guards() {
    let local = tokio::task::LocalSet::new();

    let (a, b) = local
        .run_until(async {
            let holder = tokio::task::spawn_local(async {
                let _scope = ProxyContext::enter(proxy_a());
                tokio::time::sleep(Duration::from_millis(20)).await;
                ProxyContext::current()
            });
            let intruder = tokio::task::spawn_local(async {
                let before = ProxyContext::current();
                let _scope = ProxyContext::enter(proxy_b());
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert!(before.is_none());
                ProxyContext::current()
            });
            (holder.await.unwrap(), intruder.await.unwrap())
        })
        .await;

    assert_eq!(a, Some(proxy_a()));
    assert_eq!(b, Some(proxy_b()));
}

#[tokio::test]
async fn test_enter_inside_task_scope_uses_task_storage() {
    let seen = ProxyContext::scope(Proxy::Direct, async {
        {
            let _scope = ProxyContext::enter(proxy_b());
            assert_eq!(ProxyContext::current(), Some(proxy_b()));
        }
        ProxyContext::current()
    })
    .await;

    assert!(seen.is_none());
    assert!(ProxyContext::current().is_none());
}

#[test]
fn test_pooled_thread_reuse_starts_clean() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .build()
        .unwrap();

    runtime.block_on(async {
        let first = tokio::task::spawn_blocking(|| {
            let _scope = ProxyContext::enter(proxy_a());
            (thread::current().id(), ProxyContext::current())
        })
        .await
        .unwrap();

        let second = tokio::task::spawn_blocking(|| (thread::current().id(), ProxyContext::current()))
            .await
            .unwrap();

        assert_eq!(first.1, Some(proxy_a()));
        assert_eq!(first.0, second.0, "blocking pool should reuse its only thread");
        assert!(second.1.is_none());
    });
}
