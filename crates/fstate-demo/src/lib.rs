#![forbid(unsafe_code)]

//! Scripted walkthrough of `fstate`: a counter container and the three
//! joining policies, printed as a transcript.

pub mod cli;
pub mod error;
pub mod scenario;

pub use cli::{Cli, run, run_from_env};
pub use error::{DemoError, Result};
