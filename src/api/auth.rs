//! Shared-secret check for inbound jobs.

/// Compare two strings without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    a_bytes
        .iter()
        .zip(b_bytes)
        .fold(0u8, |diff, (x, y)| diff | (x ^ y))
        == 0
}

/// True when `provided` matches the configured secret.
///
/// An empty configured secret never matches.
pub fn secret_matches(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && constant_time_eq(provided, expected)
}
