//! Error number definitions.
//!
//! Thread-local error number set by the allocator on failure and left
//! untouched on success.

use std::cell::Cell;

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Invalid argument.
pub const EINVAL: i32 = 22;

/// Returns the current thread-local errno value.
pub fn get_errno() -> i32 {
    ERRNO.get()
}

/// Sets the current thread-local errno value.
pub fn set_errno(value: i32) {
    ERRNO.set(value);
}

/// Resets errno to zero, returning the previous value.
pub fn take_errno() -> i32 {
    ERRNO.replace(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_thread_local() {
        set_errno(ENOMEM);
        let other = std::thread::spawn(get_errno).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(get_errno(), ENOMEM);
    }

    #[test]
    fn take_resets() {
        set_errno(EINVAL);
        assert_eq!(take_errno(), EINVAL);
        assert_eq!(get_errno(), 0);
    }
}
