//! Native stack management for deep recursion
//!
//! The evaluator recurses once per nested expression, statement and script
//! call. Each recursion point goes through [`ensure_sufficient_stack`], which
//! grows the native stack on the heap when little of it remains, so the
//! configured call depth is reached before the thread's stack runs out.
//!
//! Script call depth is counted per thread rather than per interpreter:
//! a host override invoked from a script starts a fresh interpreter on the
//! same native stack.

use std::cell::Cell;

use crate::error::{ErrorKind, KestrelError, Result};

/// Grow when less than this much stack remains
#[cfg(not(target_arch = "wasm32"))]
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment
#[cfg(not(target_arch = "wasm32"))]
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[cfg(not(target_arch = "wasm32"))]
#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[cfg(target_arch = "wasm32")]
#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of script call depth, released on drop
#[derive(Debug)]
pub(crate) struct CallDepth(());

impl CallDepth {
    /// Enter a call, failing when `max` calls are already active on this thread
    pub(crate) fn enter(max: usize) -> Result<Self> {
        CALL_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= max {
                return Err(KestrelError::new(ErrorKind::StackOverflow(max), None));
            }
            depth.set(current + 1);
            Ok(CallDepth(()))
        })
    }

    /// Calls active on this thread
    #[cfg(test)]
    pub(crate) fn current() -> usize {
        CALL_DEPTH.with(Cell::get)
    }
}

impl Drop for CallDepth {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_depth_is_released_on_drop() {
        let start = CallDepth::current();
        {
            let _outer = CallDepth::enter(start + 2).unwrap();
            let _inner = CallDepth::enter(start + 2).unwrap();
            assert_eq!(CallDepth::current(), start + 2);
            let err = CallDepth::enter(start + 2).unwrap_err();
            assert_eq!(err.kind, ErrorKind::StackOverflow(start + 2));
        }
        assert_eq!(CallDepth::current(), start);
    }

    #[test]
    fn test_deep_recursion_grows_the_stack() {
        fn depth(n: u64) -> u64 {
            ensure_sufficient_stack(|| {
                let padding = [n; 64];
                if n == 0 {
                    0
                } else {
                    depth(n - 1) + 1 + padding[0] - n
                }
            })
        }
        assert_eq!(depth(100_000), 100_000);
    }
}
