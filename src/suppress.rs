/*!
Scopes where the exporter's own activity must not produce telemetry.

An export call enters a suppression scope before touching the transport. Instrumentation that could observe the exporter, such as the host's interceptors or emitters, should check [`is_suppressed`] and discard anything produced while it returns `true`, so exporting never feeds back into itself.

For `emit`, install [`filter`] on the runtime that could observe exports:

```
emit::setup()
    .emit_when(emit_otlp_grpc::suppress::filter())
    .init();
```
*/

use std::{
    cell::Cell,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/**
Whether the current thread is inside a suppression scope.
*/
pub fn is_suppressed() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

/**
A filter that rejects events while the current thread is inside a suppression scope.
*/
pub fn filter() -> SuppressFilter {
    SuppressFilter {}
}

/**
A filter that rejects events emitted inside a suppression scope.

See [`filter`].
*/
pub struct SuppressFilter {}

impl emit::Filter for SuppressFilter {
    fn matches<E: emit::event::ToEvent>(&self, _: E) -> bool {
        !is_suppressed()
    }
}

/**
Enter a suppression scope on the current thread.

The scope lasts until the returned guard is dropped. Scopes may be nested.
*/
pub fn enter() -> Suppress {
    DEPTH.with(|depth| depth.set(depth.get() + 1));

    Suppress {
        _not_send: PhantomData,
    }
}

/**
A guard for an active suppression scope.
*/
#[must_use = "the scope is exited when the guard is dropped"]
pub struct Suppress {
    // Entered on one thread, so it must be dropped there too
    _not_send: PhantomData<*const ()>,
}

impl Drop for Suppress {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/**
A future that runs each poll inside a suppression scope.

This carries suppression onto whatever thread ends up driving the future.
*/
pub(crate) struct Suppressed<F> {
    inner: Pin<Box<F>>,
}

pub(crate) fn suppressed<F: Future>(inner: F) -> Suppressed<F> {
    Suppressed {
        inner: Box::pin(inner),
    }
}

impl<F: Future> Future for Suppressed<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _suppress = enter();

        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_exit() {
        assert!(!is_suppressed());

        {
            let _outer = enter();
            assert!(is_suppressed());

            {
                let _inner = enter();
                assert!(is_suppressed());
            }

            assert!(is_suppressed());
        }

        assert!(!is_suppressed());
    }

    #[test]
    fn exit_on_panic() {
        let _ = std::panic::catch_unwind(|| {
            let _suppress = enter();

            panic!("explicit panic");
        });

        assert!(!is_suppressed());
    }

    #[test]
    fn filter_rejects_suppressed_events() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let emitted = AtomicUsize::new(0);

        let rt = emit::runtime::Runtime::new()
            .with_emitter(emit::emitter::from_fn(|_| {
                emitted.fetch_add(1, Ordering::Relaxed);
            }))
            .with_filter(filter());

        emit::emit!(rt: &rt, "outside a scope");

        {
            let _suppress = enter();

            emit::emit!(rt: &rt, "inside a scope");
        }

        emit::emit!(rt: &rt, "outside a scope again");

        assert_eq!(2, emitted.load(Ordering::Relaxed));
    }

    #[test]
    fn suppressed_future() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let observed = rt.block_on(suppressed(async { is_suppressed() }));

        assert!(observed);
        assert!(!is_suppressed());
    }
}
