//! Layer 0: single-shot memoized thunks.
//!
//! Stored APIs are mostly never walked in a given run, so structure
//! nodes decode on demand. The thunk runs at most once and is dropped
//! after forcing, releasing whatever it captured (typically the payload
//! slice and decode dictionary).

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

type Thunk<T> = Box<dyn FnOnce() -> T + Send>;

struct LazyInner<T> {
    cell: OnceLock<T>,
    thunk: Mutex<Option<Thunk<T>>>,
}

/// A memoized deferred value. Cloning shares the underlying cell, so
/// forcing one clone forces them all.
pub struct Lazy<T> {
    inner: Arc<LazyInner<T>>,
}

impl<T> Lazy<T> {
    /// Defer `f` until the first [`Lazy::force`].
    pub fn new(f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                cell: OnceLock::new(),
                thunk: Mutex::new(Some(Box::new(f))),
            }),
        }
    }

    /// Wrap an already-built value.
    pub fn strict(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self {
            inner: Arc::new(LazyInner {
                cell,
                thunk: Mutex::new(None),
            }),
        }
    }

    /// Evaluate (at most once) and borrow the value.
    pub fn force(&self) -> &T {
        self.inner.cell.get_or_init(|| {
            let thunk = self
                .inner
                .thunk
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .take()
                .expect("lazy cell empty with no thunk");
            thunk()
        })
    }

    /// The value if it has already been forced.
    pub fn get(&self) -> Option<&T> {
        self.inner.cell.get()
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq> PartialEq for Lazy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.force() == other.force()
    }
}

impl<T: Eq> Eq for Lazy<T> {}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Lazy").field(value).finish(),
            None => f.write_str("Lazy(<deferred>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn forces_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy = Lazy::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            42
        });
        assert_eq!(lazy.get(), None);
        assert_eq!(*lazy.force(), 42);
        assert_eq!(*lazy.force(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_the_cell() {
        let lazy = Lazy::new(|| String::from("shared"));
        let other = lazy.clone();
        assert_eq!(other.force(), "shared");
        assert_eq!(lazy.get().map(String::as_str), Some("shared"));
    }

    #[test]
    fn strict_is_preforced() {
        let lazy = Lazy::strict(7);
        assert_eq!(lazy.get(), Some(&7));
    }

    #[test]
    fn equality_forces_both_sides() {
        let a = Lazy::new(|| 3);
        let b = Lazy::strict(3);
        assert_eq!(a, b);
        assert_ne!(Lazy::strict(1), Lazy::strict(2));
    }
}
