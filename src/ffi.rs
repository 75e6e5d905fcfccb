//! C ABI over [`crate::evaluate`].
//!
//! # Safety
//!
//! Strings returned by `origami_run` are owned by the caller and must be
//! released with `origami_string_free`, never with the C allocator.
//!
//! Results are C strings, so a NUL inside a rendered value cannot cross the
//! boundary as-is. Each interior NUL is written as the two characters `\0`,
//! which means a value containing `"\0"` and one containing a real NUL come
//! back identical.

use std::{
    ffi::{c_char, CStr, CString},
    ptr,
};

use crate::{diagnostics::Diagnostic, engine::evaluate};

/// Evaluates the NUL-terminated UTF-8 script at `code`.
///
/// The result is the same string [`crate::evaluate`] returns, except that
/// interior NUL characters are escaped as `\0`.
///
/// # Safety
///
/// `code` must be null or point to a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn origami_run(code: *const c_char) -> *mut c_char {
    let result = if code.is_null() {
        Diagnostic::runtime("origami_run(): received a null pointer").to_string()
    } else {
        // SAFETY: caller guarantees a valid NUL-terminated string.
        let source = unsafe { CStr::from_ptr(code) };
        match source.to_str() {
            Ok(code) => evaluate(code),
            Err(err) => Diagnostic::runtime(format!("origami_run(): source is not valid UTF-8 ({err})"))
                .to_string(),
        }
    };
    into_raw(result)
}

/// Releases a string returned by [`origami_run`]. Null is ignored.
///
/// # Safety
///
/// `text` must come from `origami_run` and must not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn origami_string_free(text: *mut c_char) {
    if text.is_null() {
        return;
    }
    // SAFETY: the pointer was produced by `CString::into_raw` in `into_raw`.
    drop(unsafe { CString::from_raw(text) });
}

fn into_raw(text: String) -> *mut c_char {
    let text = text.replace('\0', "\\0");
    match CString::new(text) {
        Ok(text) => text.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &CStr) -> String {
        unsafe {
            let raw = origami_run(code.as_ptr());
            let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
            origami_string_free(raw);
            text
        }
    }

    #[test]
    fn evaluates_over_the_c_abi() {
        assert_eq!(run(c"1 + 2;"), "3");
    }

    #[test]
    fn null_input_is_a_failure() {
        let text = unsafe {
            let raw = origami_run(ptr::null());
            let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
            origami_string_free(raw);
            text
        };
        assert!(text.starts_with("Fatal error:"), "{text}");
    }

    #[test]
    fn interior_nul_is_escaped() {
        assert_eq!(run(c"\"a\\0b\";"), "a\\0b");
        assert_eq!(run(c"'a\\0b';"), run(c"\"a\\0b\";"));
    }

    #[test]
    fn invalid_utf8_is_a_failure() {
        let bytes = CString::new(vec![0xff, 0xfe]).expect("no interior nul");
        assert!(run(&bytes).starts_with("Fatal error:"));
    }
}
