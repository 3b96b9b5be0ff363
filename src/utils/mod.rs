// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Terminal output helpers for the CLI

pub mod colors;
pub mod progress;

pub use colors::*;
pub use progress::*;
