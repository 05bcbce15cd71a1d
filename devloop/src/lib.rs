//! LLM-driven build-repair loop for small microservices.
//!
//! An oracle proposes dependency strategies, generates an artifact set per
//! strategy, and repairs failed builds one immutable version at a time until
//! a build succeeds or every strategy runs out of iterations.
//!
//! - **[`core`]**: Pure logic (answer parsing, fenced-file extraction, log
//!   reduction, strategy refinement, session history). No I/O.
//! - **[`io`]**: Side effects (artifact store, oracle transport, build system,
//!   package registry, config, attempt logs).
//! - **[`agents`]**: Oracle-backed components built on `core` and `io`.
//!
//! [`controller`] drives the agents through the iteration state machine.

pub mod agents;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
