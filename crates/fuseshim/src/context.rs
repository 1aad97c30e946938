//! The caller of the request being served.
//!
//! Engines install a [`Context`] around each dispatched call with [`scope`];
//! filesystem code reads it back with [`current`] to make per-caller
//! decisions such as permission checks.

use std::cell::Cell;

use serde::Serialize;

/// Credentials of the process that issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

thread_local! {
    static CURRENT: Cell<Option<Context>> = const { Cell::new(None) };
}

/// The context of the request the calling thread is serving, if any.
pub fn current() -> Option<Context> {
    CURRENT.with(Cell::get)
}

/// Runs `f` with `ctx` as the current context, restoring the previous one
/// afterwards, also when `f` panics.
pub fn scope<R>(ctx: Context, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Context>);

    impl Drop for Restore {
        fn drop(&mut self) {
            CURRENT.with(|c| c.set(self.0));
        }
    }

    let _restore = Restore(CURRENT.with(|c| c.replace(Some(ctx))));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: Context = Context {
        uid: 0,
        gid: 0,
        pid: 1,
    };
    const USER: Context = Context {
        uid: 1000,
        gid: 100,
        pid: 4242,
    };

    #[test]
    fn test_no_context_outside_scope() {
        assert_eq!(current(), None);
    }

    #[test]
    fn test_nested_scopes_restore() {
        scope(ROOT, || {
            assert_eq!(current(), Some(ROOT));
            scope(USER, || assert_eq!(current(), Some(USER)));
            assert_eq!(current(), Some(ROOT));
        });
        assert_eq!(current(), None);
    }

    #[test]
    fn test_restored_after_panic() {
        let result = std::panic::catch_unwind(|| scope(USER, || panic!("boom")));
        assert!(result.is_err());
        assert_eq!(current(), None);
    }

    #[test]
    fn test_scope_is_per_thread() {
        scope(USER, || {
            let other = std::thread::spawn(current).join().unwrap();
            assert_eq!(other, None);
        });
    }
}
