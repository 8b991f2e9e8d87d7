//! Runtime invariant checks
//!
//! `check_invariant!` panics when a structural guarantee is broken and records,
//! per thread, that the check ran. Contract tests use the record to prove an
//! invariant was actually exercised rather than silently skipped.
//!
//! ```rust,ignore
//! check_invariant!(fft_len >= needed, "correlation transform covers both windows");
//!
//! // in a test, after driving the code path:
//! assert!(tethersync::invariants::unchecked(&["correlation transform covers both windows"]).is_empty());
//! ```

use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

#[macro_export]
macro_rules! check_invariant {
    ($holds:expr, $name:expr) => {
        $crate::invariants::__record($holds, $name, module_path!())
    };
}

#[doc(hidden)]
pub fn __record(holds: bool, name: &'static str, location: &'static str) {
    CHECKED.with(|checked| {
        checked.borrow_mut().insert(name);
    });

    if !holds {
        panic!("invariant violated in {}: {}", location, name);
    }
}

/// Whether `name` has been checked on the current thread.
pub fn was_checked(name: &str) -> bool {
    CHECKED.with(|checked| checked.borrow().contains(name))
}

/// The subset of `names` that has not been checked on the current thread.
pub fn unchecked<'a>(names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|name| !was_checked(name))
        .collect()
}

pub fn reset() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}
