//! Golden-output test harness for command-line programs.
//!
//! Each test is a plain-text spec file: a header of `# key: value` directives describing how to
//! invoke the program, followed by the exact stderr it should print and, after a `# STDOUT:`
//! marker, the exact stdout. [`harness::run`] discovers specs under a test root, runs them on a
//! pool of workers and reports the verdicts.

pub mod command;
pub mod compare;
pub mod env;
pub mod errors;
pub mod harness;
pub mod loader;
pub mod parser;
pub mod pool;
pub mod reporter;
pub mod runner;
pub mod schema;
