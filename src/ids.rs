//! Lexicographically sortable identifiers.
//!
//! ULIDs are 26-character, timestamp-prefixed, base32-encoded identifiers
//! that sort the same way lexicographically as they do by generation time.
//! We use `ulid::Generator` rather than bare `Ulid::new()` so that two IDs
//! minted within the same millisecond on one process still come out
//! monotonically increasing.

use std::sync::Mutex;

use ulid::{Generator, Ulid};

static GENERATOR: Mutex<Option<Generator>> = Mutex::new(None);

/// Generate a new sortable ID. Falls back to a fresh, non-monotonic ULID in
/// the vanishingly unlikely event the monotonic generator's internal counter
/// overflows within one millisecond.
pub fn new_id() -> String {
    let mut guard = GENERATOR.lock().expect("id generator mutex poisoned");
    let generator = guard.get_or_insert_with(Generator::new);
    let ulid = generator.generate().unwrap_or_else(|_| Ulid::new());
    ulid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_sortable() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(a < b, "expected {a} < {b}");
        assert_eq!(a.len(), 26);
    }
}
