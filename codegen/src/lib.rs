//! Iterative code-generation sessions against a remote generation service.
//!
//! A conversation alternates between two phases per user turn: *Prepare*
//! snapshots and uploads the workspace, *Generate* submits the request, polls
//! until the generation is terminal and reconciles the result archive into
//! file changes. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (status mapping, archive decoding,
//!   iteration bookkeeping). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem snapshots, HTTP service,
//!   config, sinks). Isolated behind traits to enable scripted doubles.
//!
//! Orchestration modules ([`upload`], [`poll`], [`reconcile`], [`session`])
//! combine the two into the turn state machine.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod poll;
pub mod reconcile;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod upload;
