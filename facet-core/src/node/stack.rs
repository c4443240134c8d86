//! Build Stack
//!
//! Tracks which features are currently being built on this thread. A feature's
//! recompute hook materializes its upstream features, so builds nest; the
//! stack records that nesting.
//!
//! # Implementation
//!
//! We use a thread-local stack. When a build starts we push the feature's
//! display name; the returned guard pops it when the build finishes, even if
//! the hook panics.
//!
//! The stack is used to report the build path when a feature re-enters its
//! own build, and to give build log lines their nesting depth.

use std::cell::RefCell;

thread_local! {
    static BUILD_STACK: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Guard that pops the build stack when dropped.
pub struct BuildStack {
    depth: usize,
}

impl BuildStack {
    /// Record that `label` is being built on this thread until the guard drops.
    pub fn enter(label: &str) -> Self {
        let depth = BUILD_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(label.to_owned());
            stack.len()
        });

        Self { depth }
    }

    /// Number of builds in progress on this thread.
    pub fn depth() -> usize {
        BUILD_STACK.with(|stack| stack.borrow().len())
    }

    /// Names of the builds in progress on this thread, outermost first.
    pub fn path() -> Vec<String> {
        BUILD_STACK.with(|stack| stack.borrow().clone())
    }

    /// The innermost build on this thread, if any.
    pub fn current() -> Option<String> {
        BUILD_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for BuildStack {
    fn drop(&mut self) {
        BUILD_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "BuildStack guards dropped out of order"
            );
            stack.pop();
        });
    }
}
