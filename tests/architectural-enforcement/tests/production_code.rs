//! Production code of the core and the daemon must not block the runtime or
//! panic on errors.

use architectural_enforcement::{scan_dir, workspace_root, Violation, RULES};

fn violations_in(relative: &str) -> Vec<Violation> {
    let dir = workspace_root().join(relative);
    assert!(dir.is_dir(), "missing source dir {}", dir.display());
    scan_dir(&dir, RULES).unwrap()
}

fn report(violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    for violation in violations {
        eprintln!("  {violation}");
    }
    for rule in RULES {
        eprintln!("  [{}] {}", rule.name, rule.hint);
    }
    panic!("{} forbidden pattern(s) in production code", violations.len());
}

#[test]
fn test_core_production_code() {
    report(&violations_in("conductor/core/src"));
}

#[test]
fn test_daemon_production_code() {
    report(&violations_in("conductor/daemon/src"));
}
