//! Integration Test: Blocking I/O Prohibition
//!
//! Async functions must not block the runtime. Provider calls go through
//! `reqwest`'s async client and console output through `tokio::io`.
//!
//! Synchronous functions (config loading at startup, logging setup) may use
//! `std::fs` and `std::io` freely.

use architectural_enforcement::{enclosing_fn_is_async, scan_production_code, Violation};

/// Calls that block the current thread
const BLOCKING_PATTERNS: [&str; 7] = [
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "reqwest::blocking",
    "std::io::stdin()",
    "std::io::stdout()",
    "std::thread::sleep",
];

fn find_blocking_io_violations() -> Vec<Violation> {
    scan_production_code(|code, lines, idx| {
        BLOCKING_PATTERNS.iter().any(|p| code.contains(p))
            && enclosing_fn_is_async(lines, idx) == Some(true)
    })
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found inside async functions:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::io, or the async reqwest client.");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}
