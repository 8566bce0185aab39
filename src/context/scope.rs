//! Scoped Proxy Selection
//!
//! A binding is visible only to the unit of work that created it:
//!
//! - a future running inside [`ProxyContext::scope`], which gets storage of
//!   its own for every call;
//! - otherwise the tokio task calling [`ProxyContext::enter`], keyed by its
//!   task id on the current thread;
//! - otherwise, outside any runtime task, the current thread.
//!
//! `scope` calls nest: an inner scope has its own storage, and the outer
//! binding is visible again once it completes. `enter` is flat: entering
//! while a binding is active in the same storage replaces it, and when the
//! inner guard exits the binding is cleared, so the outer guard observes no
//! proxy for the remainder of its extent. A guard only ever clears the
//! binding it created, never one installed after it was replaced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task;
use tracing::{debug, warn};

use crate::routing::Proxy;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a proxy scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Binding {
    owner: ScopeId,
    proxy: Proxy,
}

/// Bindings keyed by the runtime task that made them (`None` outside a task)
type TaskKey = Option<task::Id>;

#[derive(Debug, Default)]
struct Slot {
    bindings: HashMap<TaskKey, Binding>,
}

thread_local! {
    static THREAD_SLOT: RefCell<Slot> = RefCell::new(Slot::default());
}

tokio::task_local! {
    static TASK_SLOT: RefCell<Slot>;
}

/// Where a binding lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Task,
    Thread,
}

impl Storage {
    fn active() -> Self {
        if TASK_SLOT.try_with(|_| ()).is_ok() {
            Storage::Task
        } else {
            Storage::Thread
        }
    }

    /// Key of the calling unit of work within this storage.
    ///
    /// A task slot belongs to a single `scope` future, so it has one key.
    /// The thread slot is shared by every task polled on the thread.
    fn key(self) -> TaskKey {
        match self {
            Storage::Task => None,
            Storage::Thread => task::try_id(),
        }
    }

    /// `None` when the storage is gone (task scope finished, thread exiting)
    fn with_slot<R>(self, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        match self {
            Storage::Task => TASK_SLOT.try_with(|slot| f(&mut *slot.borrow_mut())).ok(),
            Storage::Thread => THREAD_SLOT.try_with(|slot| f(&mut *slot.borrow_mut())).ok(),
        }
    }
}

fn bind(storage: Storage, key: TaskKey, proxy: Proxy) -> ScopeId {
    let id = ScopeId::next();

    storage.with_slot(|slot| {
        if let Some(previous) = slot.bindings.get(&key) {
            warn!(
                "{} replaces active {} ({} -> {}); nested proxy scopes are not restored",
                id, previous.owner, previous.proxy, proxy
            );
        }
        debug!("{} entered with proxy {}", id, proxy);
        slot.bindings.insert(key, Binding { owner: id, proxy });
    });

    id
}

fn release(storage: Storage, key: TaskKey, id: ScopeId) {
    storage.with_slot(|slot| {
        if slot.bindings.get(&key).map(|b| b.owner) == Some(id) {
            slot.bindings.remove(&key);
            debug!("{} exited", id);
        } else {
            debug!("{} exited after being replaced", id);
        }
    });
}

/// Entry points for scoped proxy selection
pub struct ProxyContext;

impl ProxyContext {
    /// Bind `proxy` for the calling unit of work until the returned guard is
    /// dropped or [`ProxyScope::exit`] is called.
    ///
    /// The guard cannot be sent across threads. Called from a runtime task
    /// outside any [`ProxyContext::scope`], the binding belongs to that task
    /// alone; other tasks polled on the same thread do not see it. In async
    /// code prefer [`ProxyContext::scope`].
    pub fn enter(proxy: impl Into<Proxy>) -> ProxyScope {
        let storage = Storage::active();
        let key = storage.key();
        let id = bind(storage, key, proxy.into());

        ProxyScope {
            id,
            storage,
            key,
            released: false,
            _not_send: PhantomData,
        }
    }

    /// The proxy bound for the calling unit of work, if any
    pub fn current() -> Option<Proxy> {
        let storage = Storage::active();
        let key = storage.key();

        storage
            .with_slot(|slot| slot.bindings.get(&key).map(|b| b.proxy.clone()))
            .flatten()
    }

    /// Whether a binding is active for the calling unit of work
    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// Drop every binding held in the calling storage regardless of owner.
    ///
    /// For executors that hand a pooled thread to unrelated work and want to
    /// start it from a clean slate. Safe to call any number of times.
    pub fn reset() {
        Storage::active().with_slot(|slot| {
            for (_, stale) in slot.bindings.drain() {
                debug!("Reset cleared binding of {}", stale.owner);
            }
        });
    }

    /// Run `f` with `proxy` selected, releasing the binding on every exit
    /// path including panics.
    pub fn sync_scope<R>(proxy: impl Into<Proxy>, f: impl FnOnce() -> R) -> R {
        let _scope = Self::enter(proxy);
        f()
    }

    /// Run `fut` to completion with `proxy` selected for it.
    ///
    /// Every call opens fresh storage owned by `fut` alone, so the binding
    /// follows the future across worker threads and is invisible to every
    /// other future, including concurrent scopes inside the same task and
    /// tasks it spawns. The binding is released when `fut` completes or is
    /// dropped, and an enclosing scope's binding is visible again.
    pub fn scope<F>(proxy: impl Into<Proxy>, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let proxy = proxy.into();

        TASK_SLOT.scope(RefCell::new(Slot::default()), async move {
            let _binding = TaskBinding::bind(proxy);
            fut.await
        })
    }
}

/// Guard returned by [`ProxyContext::enter`]
#[must_use = "the proxy is unbound as soon as the scope is dropped"]
pub struct ProxyScope {
    id: ScopeId,
    storage: Storage,
    key: TaskKey,
    released: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl ProxyScope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Release the binding now
    pub fn exit(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            release(self.storage, self.key, self.id);
        }
    }
}

impl Drop for ProxyScope {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ProxyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyScope")
            .field("id", &self.id)
            .field("storage", &self.storage)
            .field("task", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

/// Send-able release guard held across awaits inside a task scope
struct TaskBinding {
    id: ScopeId,
}

impl TaskBinding {
    fn bind(proxy: Proxy) -> Self {
        Self {
            id: bind(Storage::Task, None, proxy),
        }
    }
}

impl Drop for TaskBinding {
    fn drop(&mut self) {
        release(Storage::Task, None, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ProxyEndpoint;

    fn proxy(port: u16) -> Proxy {
        ProxyEndpoint::socks5("127.0.0.1", port).unwrap().into()
    }

    #[test]
    fn test_enter_and_exit() {
        assert!(ProxyContext::current().is_none());

        let scope = ProxyContext::enter(proxy(1080));
        assert_eq!(ProxyContext::current(), Some(proxy(1080)));

        scope.exit();
        assert!(ProxyContext::current().is_none());
    }

    #[test]
    fn test_flat_nesting_clears_on_inner_exit() {
        let outer = ProxyContext::enter(proxy(1080));
        {
            let _inner = ProxyContext::enter(proxy(1081));
            assert_eq!(ProxyContext::current(), Some(proxy(1081)));
        }
        assert!(ProxyContext::current().is_none());

        // A later binding must survive the replaced outer scope's release
        let later = ProxyContext::enter(proxy(1082));
        drop(outer);
        assert_eq!(ProxyContext::current(), Some(proxy(1082)));

        drop(later);
        assert!(ProxyContext::current().is_none());
    }

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ProxyContext::enter(proxy(1080));
        let a_id = a.id();
        drop(a);
        let b = ProxyContext::enter(proxy(1080));
        assert_ne!(a_id, b.id());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let scope = ProxyContext::enter(Proxy::Direct);
        ProxyContext::reset();
        ProxyContext::reset();
        assert!(!ProxyContext::is_active());
        drop(scope);
        assert!(!ProxyContext::is_active());
    }

    #[tokio::test]
    async fn test_nested_scope_restores_outer_binding() {
        let (inner, after) = ProxyContext::scope(proxy(1080), async {
            let inner = ProxyContext::scope(proxy(1081), async { ProxyContext::current() }).await;
            (inner, ProxyContext::current())
        })
        .await;

        assert_eq!(inner, Some(proxy(1081)));
        assert_eq!(after, Some(proxy(1080)));
    }

    #[tokio::test]
    async fn test_enter_is_keyed_by_task() {
        let _scope = ProxyContext::enter(proxy(1080));
        let other = tokio::spawn(async { ProxyContext::current() }).await.unwrap();

        assert!(other.is_none());
        assert_eq!(ProxyContext::current(), Some(proxy(1080)));
    }

    #[tokio::test]
    async fn test_task_scope_does_not_touch_thread_slot() {
        let value = ProxyContext::scope(proxy(1080), async { ProxyContext::current() }).await;
        assert_eq!(value, Some(proxy(1080)));
        assert!(ProxyContext::current().is_none());
    }
}
