//! Domain-specific assertions for FinSync tests

use predicates::prelude::*;
use predicates::str::contains;

/// Stderr (or any output) must not contain any of `values`
pub fn stderr_not_contains(values: &[&str]) -> impl Predicate<str> {
    let owned_values: Vec<String> = values.iter().map(|&s| s.to_string()).collect();
    predicate::function(move |s: &str| !owned_values.iter().any(|v| s.contains(v.as_str())))
}

/// Output mentions a client-side temporary id
pub fn contains_temp_id() -> impl Predicate<str> {
    contains(fin_common::TEMP_ID_PREFIX)
}

/// Output contains an amount rendered as Brazilian real
///
/// ```rust
/// use fin_test_helpers::assertions::contains_brl;
/// use predicates::prelude::*;
///
/// assert!(contains_brl(97500).eval("Saldo: R$ 975,00"));
/// ```
pub fn contains_brl(cents: i64) -> impl Predicate<str> {
    contains(fin_common::money::format_brl(cents))
}

/// A JSON array with exactly `n` elements
pub fn json_array_len(n: usize) -> impl Predicate<str> {
    predicate::function(move |s: &str| {
        serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .and_then(|v| v.as_array().map(|a| a.len() == n))
            .unwrap_or(false)
    })
}
