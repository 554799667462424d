use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A named point in the call graph that extension modules can wrap
/// without the core branching on which modules are loaded. Pre-hooks run
/// in registration order, then the replacement (or the original target),
/// then post-hooks; a post-hook registered with `pass_result` also sees
/// the return value. Stacked replacements compose: each replacement's
/// "super" is whatever the point resolved to when it was installed.
pub struct HookPoint<A, R> {
    current: Arc<dyn Fn(&A) -> R + Send + Sync>,
    before: Vec<Arc<dyn Fn(&A) + Send + Sync>>,
    after: Vec<AfterHook<A, R>>,
}

enum AfterHook<A, R> {
    Plain(Arc<dyn Fn(&A) + Send + Sync>),
    WithResult(Arc<dyn Fn(&A, &R) + Send + Sync>),
}

impl<A: 'static, R: 'static> HookPoint<A, R> {
    pub fn new(target: impl Fn(&A) -> R + Send + Sync + 'static) -> Self {
        Self {
            current: Arc::new(target),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn add_before(&mut self, hook: impl Fn(&A) + Send + Sync + 'static) {
        self.before.push(Arc::new(hook));
    }

    pub fn add_after(&mut self, hook: impl Fn(&A) + Send + Sync + 'static) {
        self.after.push(AfterHook::Plain(Arc::new(hook)));
    }

    pub fn add_after_with_result(&mut self, hook: impl Fn(&A, &R) + Send + Sync + 'static) {
        self.after.push(AfterHook::WithResult(Arc::new(hook)));
    }

    /// Replace the target. When `pass_super` is set the replacement
    /// receives the previous callable and may delegate to it.
    pub fn set_replacement(
        &mut self,
        replacement: impl Fn(&A, Option<&(dyn Fn(&A) -> R + Send + Sync)>) -> R
            + Send
            + Sync
            + 'static,
        pass_super: bool,
    ) {
        let previous = self.current.clone();
        self.current = Arc::new(move |args: &A| {
            let sup: Option<&(dyn Fn(&A) -> R + Send + Sync)> = if pass_super {
                Some(previous.as_ref())
            } else {
                None
            };
            replacement(args, sup)
        });
    }

    pub fn call(&self, args: &A) -> R {
        for hook in &self.before {
            hook(args);
        }
        let result = (self.current.as_ref())(args);
        for hook in &self.after {
            match hook {
                AfterHook::Plain(f) => f(args),
                AfterHook::WithResult(f) => f(args, &result),
            }
        }
        result
    }
}

type BoxFut<R> = Pin<Box<dyn Future<Output = R> + Send + 'static>>;

/// The previous callable handed to an async replacement hook. Owned
/// (reference-counted) so the replacement's future can keep it alive.
#[derive(Clone)]
pub struct AsyncSuperFn<A, R> {
    inner: Arc<dyn Fn(A) -> BoxFut<R> + Send + Sync>,
}

impl<A, R> AsyncSuperFn<A, R> {
    pub fn call(&self, args: A) -> BoxFut<R> {
        (self.inner.as_ref())(args)
    }
}

enum AsyncAfterHook<A, R> {
    Plain(Arc<dyn Fn(A) -> BoxFut<()> + Send + Sync>),
    WithResult(Arc<dyn Fn(A, R) -> BoxFut<()> + Send + Sync>),
}

/// The async twin of [`HookPoint`]. An async target may only be wrapped
/// by async hooks, which this type enforces by construction.
pub struct AsyncHookPoint<A, R> {
    current: Arc<dyn Fn(A) -> BoxFut<R> + Send + Sync>,
    before: Vec<Arc<dyn Fn(A) -> BoxFut<()> + Send + Sync>>,
    after: Vec<AsyncAfterHook<A, R>>,
}

impl<A, R> AsyncHookPoint<A, R>
where
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new<F, Fut>(target: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self {
            current: Arc::new(move |args| Box::pin(target(args))),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn add_before<F, Fut>(&mut self, hook: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.before.push(Arc::new(move |args| Box::pin(hook(args))));
    }

    pub fn add_after<F, Fut>(&mut self, hook: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after
            .push(AsyncAfterHook::Plain(Arc::new(move |args| {
                Box::pin(hook(args))
            })));
    }

    pub fn add_after_with_result<F, Fut>(&mut self, hook: F)
    where
        F: Fn(A, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after
            .push(AsyncAfterHook::WithResult(Arc::new(move |args, result| {
                Box::pin(hook(args, result))
            })));
    }

    pub fn set_replacement<F, Fut>(&mut self, replacement: F, pass_super: bool)
    where
        F: Fn(A, Option<AsyncSuperFn<A, R>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let previous = AsyncSuperFn {
            inner: self.current.clone(),
        };
        self.current = Arc::new(move |args| {
            let sup = if pass_super {
                Some(previous.clone())
            } else {
                None
            };
            Box::pin(replacement(args, sup))
        });
    }

    pub async fn call(&self, args: A) -> R {
        for hook in &self.before {
            (hook.as_ref())(args.clone()).await;
        }
        let result = (self.current.as_ref())(args.clone()).await;
        for hook in &self.after {
            match hook {
                AsyncAfterHook::Plain(f) => (f.as_ref())(args.clone()).await,
                AsyncAfterHook::WithResult(f) => (f.as_ref())(args.clone(), result.clone()).await,
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_before_and_after_run_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut point = HookPoint::new({
            let trace = trace.clone();
            move |x: &i32| {
                trace.lock().unwrap().push("target");
                x * 2
            }
        });
        for label in ["before1", "before2"] {
            let trace = trace.clone();
            point.add_before(move |_| trace.lock().unwrap().push(label));
        }
        let after_trace = trace.clone();
        point.add_after(move |_| after_trace.lock().unwrap().push("after"));

        assert_eq!(point.call(&21), 42);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["before1", "before2", "target", "after"]
        );
    }

    #[test]
    fn test_after_with_result_sees_return_value() {
        let seen = Arc::new(Mutex::new(None));
        let mut point = HookPoint::new(|x: &i32| x + 1);
        let seen_clone = seen.clone();
        point.add_after_with_result(move |_, result| {
            *seen_clone.lock().unwrap() = Some(*result);
        });
        point.call(&9);
        assert_eq!(*seen.lock().unwrap(), Some(10));
    }

    #[test]
    fn test_replacement_without_super_shadows_target() {
        let mut point = HookPoint::new(|x: &i32| x + 1);
        point.set_replacement(
            |x, sup| {
                assert!(sup.is_none());
                x * 10
            },
            false,
        );
        assert_eq!(point.call(&5), 50);
    }

    #[test]
    fn test_stacked_replacements_compose() {
        let mut point = HookPoint::new(|x: &i32| *x);
        point.set_replacement(|x, sup| sup.unwrap()(x) + 1, true);
        point.set_replacement(|x, sup| sup.unwrap()(x) * 2, true);
        // Last installed runs first: (x + 1) is the inner super.
        assert_eq!(point.call(&10), 22);
    }

    #[tokio::test]
    async fn test_async_hooks_compose() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut point = AsyncHookPoint::new(|x: i32| async move { x + 1 });
        let before_counter = counter.clone();
        point.add_before(move |_| {
            let counter = before_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        point.set_replacement(
            |x, sup| async move { sup.unwrap().call(x).await * 3 },
            true,
        );
        assert_eq!(point.call(2).await, 9);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
