//! Formatted output helpers for CLI commands.
//!
//! Status lines go to standard error so that standard output carries only
//! results other tools may consume.

/// ANSI bold.
pub const BOLD: &str = "\x1b[1m";
/// ANSI green.
pub const GREEN: &str = "\x1b[32m";
/// ANSI reset.
pub const RESET: &str = "\x1b[0m";

/// Prints the captured output of a passing check followed by a status line.
#[allow(clippy::print_stdout)]
pub fn passed(check: &str, report: &str) {
    print!("{report}");
    eprintln!("{BOLD}{GREEN}{check} passed{RESET}");
}

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
