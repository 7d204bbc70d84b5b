//! The `code-runner-tools` binary: the sandbox helper and some debugging utilities.

pub mod opt;
pub mod sandbox;
