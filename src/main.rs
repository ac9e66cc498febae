//! equitune CLI - balanced loading and equivariant finetuning
//!
//! Command-line entry point; see [`equitune::cli`].

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::process::ExitCode;

fn main() -> ExitCode {
    equitune::cli::run()
}
