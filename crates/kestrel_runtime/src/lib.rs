// SPDX-License-Identifier: MIT OR Apache-2.0
//! Script graph interpreter for the Kestrel engine.
//!
//! This crate executes graphs built with `kestrel_graph`:
//! - Execution tokens with private data and a call stack
//! - Cooperative, tick-driven scheduling (one FIFO queue per executor)
//! - Timed and frame-spanning suspension with cancel-on-restart
//! - Reentrant sub-graph call/return
//! - Per-token fault isolation
//!
//! The host owns the loop: it enqueues tokens at entry nodes (directly or
//! through named events) and calls [`Executor::tick`] once per frame.

pub mod executor;
pub mod external;
pub mod suspension;
pub mod token;

pub use executor::{Executor, Fault, FaultKind};
pub use external::{ExternalAction, ExternalError, ExternalRegistry};
pub use suspension::{Resume, Wait, WaitKey, WaitKind, WaitTable};
pub use token::{Frame, Token, TokenId, TokenState};
