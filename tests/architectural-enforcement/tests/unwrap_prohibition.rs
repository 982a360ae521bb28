//! Integration Test: Panic-free Production Code
//!
//! Production code propagates errors with `?` or falls back explicitly.
//! `unwrap()` and `expect()` are reserved for tests.

use architectural_enforcement::{scan_production_code, Violation};

fn find_unwrap_violations() -> Vec<Violation> {
    scan_production_code(|code, _, _| code.contains(".unwrap()") || code.contains(".expect("))
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_unwrap_violations();

    if !violations.is_empty() {
        eprintln!("\nunwrap()/expect() found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }

        panic!(
            "\nFound {} unwrap/expect violation(s) in production code.",
            violations.len()
        );
    }
}
