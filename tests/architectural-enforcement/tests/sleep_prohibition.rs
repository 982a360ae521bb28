//! Integration Test: Sleep Prohibition
//!
//! Production code waits on I/O, channels, or `tokio::time::timeout`.
//! It never sleeps to pace itself or to wait for another task.
//!
//! **Exceptions**: test code (`#[cfg(test)]` modules and `test_utils.rs`)

use architectural_enforcement::{scan_production_code, Violation};

fn find_sleep_violations() -> Vec<Violation> {
    scan_production_code(|code, _, _| code.contains("::sleep(") || code.contains(".sleep("))
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::time::timeout, a channel, or a CancellationToken instead.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
