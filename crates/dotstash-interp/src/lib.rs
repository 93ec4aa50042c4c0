// ABOUTME: Reference interpolation for dotstash: `${ref}` values and `$(ref)` command output.
// ABOUTME: Reads through the storage engine and runs commands via a pluggable runner.

pub mod error;
pub mod resolver;
pub mod runner;
pub mod testing;

pub use error::ResolveError;
pub use resolver::Resolver;
pub use runner::{CommandOutput, CommandRunner, RunError, ShellRunner};
