//! # code-runner
//!
//! This is both an application and a library, the library can be used to run the snippets of code
//! inside your application, using the same sandbox helper of the `code-runner` binary.

#[macro_use]
extern crate log;

pub mod error;
pub mod opt;
pub mod run;
pub mod sandbox;
pub mod server;
pub mod tools;

pub use opt::*;
pub use sandbox::*;
pub use server::*;
