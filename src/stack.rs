//! Stack growth for the recursive parser and evaluator.
//!
//! Scripts can nest expressions and calls arbitrarily deep; the call depth limit
//! bounds the work, this keeps the native stack from overflowing before it hits.

#[cfg(not(target_arch = "wasm32"))]
const RED_ZONE: usize = 128 * 1024;

#[cfg(not(target_arch = "wasm32"))]
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
