//! Run an administration CLI against an ephemeral database emulator and check
//! its output deterministically.
//!
//! Each test gets its own emulator on fresh local ports ([`backend`]), an
//! environment overlay pointing the CLI at it ([`environment`]), and a
//! [`TestCase`] that runs commands ([`runner`]), normalizes their output
//! ([`normalize`]) and picks expectations by CLI version ([`version`]).

pub mod backend;
pub mod commands;
pub mod config;
pub mod constants;
pub mod docker;
pub mod environment;
pub mod error;
pub mod harness;
pub mod normalize;
pub mod process;
pub mod resolve;
pub mod runner;
pub mod suite;
pub mod version;

pub use backend::{BackendEndpoint, BackendHandle, BackendManager, BackendState};
pub use config::{Config, ConfigBuilder};
pub use environment::{EnvironmentBinder, EnvironmentOverlay};
pub use error::{HarnessError, HarnessResult};
pub use harness::{TestCase, TestCaseState, with_test_case};
pub use normalize::{ExpectedOutput, Normalizer, VolatileRule, join_lines, normalize};
pub use resolve::FileResolver;
pub use runner::{CommandInvocation, CommandResult};
pub use version::{Boundary, VersionBranches, VersionGate, VersionThreshold};
