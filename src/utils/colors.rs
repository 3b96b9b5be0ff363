// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Terminal color utilities
//!
//! Provides consistent styling across the CLI.

use colored::Colorize;

/// Whether colored output should be produced
pub fn should_use_colors() -> bool {
    // Respect NO_COLOR
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::env::var_os("TERM").is_some_and(|term| term != "dumb")
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.len().max(40)));
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}
