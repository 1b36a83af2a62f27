// SPDX-License-Identifier: MIT OR Apache-2.0
//! The suspended-wait table: timed and frame-spanning continuations.
//!
//! A node that yields across ticks registers a wait here and produces no
//! immediate continuation; the original token is terminated at the
//! suspension point. Each tick the executor advances the table and turns
//! due entries into fresh tokens. Waits are keyed by (node, call-stack
//! context): scheduling a second wait for the same key replaces the first,
//! which is the cancel-on-restart rule — at most one outstanding wait per
//! node and owning context, never duplicate continuations.

use crate::token::Frame;
use indexmap::IndexMap;
use kestrel_graph::{GraphId, NodeId, Value};
use std::collections::HashMap;

/// Identity of an outstanding wait
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaitKey {
    /// Suspension-point node
    pub node: NodeId,
    /// Call-stack context the wait belongs to; the same node suspended
    /// from two different call sites owns two independent waits
    pub context: Vec<Frame>,
}

/// What the wait is waiting for
#[derive(Debug, Clone)]
pub enum WaitKind {
    /// Fixed delay; fires once
    Delay {
        /// Seconds until the continuation
        remaining: f32,
    },
    /// Repeating timer; re-arms after each firing
    Interval {
        /// Seconds until the next firing
        remaining: f32,
        /// Seconds between firings
        period: f32,
    },
    /// Fires on the next tick regardless of elapsed time
    NextFrame,
}

/// An outstanding wait and the continuation it will produce
#[derive(Debug, Clone)]
pub struct Wait {
    /// What is being waited for
    pub kind: WaitKind,
    /// Graph the suspension-point node lives in
    pub graph: GraphId,
    /// Output execution port to continue from
    pub output: String,
    /// Token-local data captured at the suspension point
    pub locals: HashMap<String, Value>,
    /// Call stack captured at the suspension point
    pub stack: Vec<Frame>,
}

/// A continuation produced by an elapsed wait
#[derive(Debug, Clone)]
pub struct Resume {
    /// Graph to continue in
    pub graph: GraphId,
    /// Suspension-point node
    pub node: NodeId,
    /// Output execution port to continue from
    pub output: String,
    /// Token-local data for the fresh token
    pub locals: HashMap<String, Value>,
    /// Call stack for the fresh token
    pub stack: Vec<Frame>,
}

/// Table of outstanding waits, advanced once per host tick
#[derive(Debug, Default)]
pub struct WaitTable {
    waits: IndexMap<WaitKey, Wait>,
}

impl WaitTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            waits: IndexMap::new(),
        }
    }

    /// Register a wait, cancelling any outstanding wait under the same key
    pub fn schedule(&mut self, key: WaitKey, wait: Wait) {
        if self.waits.insert(key.clone(), wait).is_some() {
            tracing::debug!(node = ?key.node, "restarted wait cancels outstanding one");
        }
    }

    /// Cancel the wait under a key, if any. Returns whether one existed.
    pub fn cancel(&mut self, key: &WaitKey) -> bool {
        self.waits.swap_remove(key).is_some()
    }

    /// Drop every outstanding wait
    pub fn clear(&mut self) {
        self.waits.clear();
    }

    /// Number of outstanding waits
    pub fn len(&self) -> usize {
        self.waits.len()
    }

    /// Whether no waits are outstanding
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// Advance all waits by `dt` seconds, collecting due continuations in
    /// table order.
    ///
    /// Delays and next-frame waits are removed when they fire; intervals
    /// re-arm, catching up if `dt` spans several periods (a period of zero
    /// or less fires once per tick rather than spinning).
    pub fn advance(&mut self, dt: f32) -> Vec<Resume> {
        let mut due = Vec::new();
        let mut finished = Vec::new();

        for (key, wait) in &mut self.waits {
            let fires = match &mut wait.kind {
                WaitKind::Delay { remaining } => {
                    *remaining -= dt;
                    if *remaining <= 0.0 {
                        finished.push(key.clone());
                        1
                    } else {
                        0
                    }
                }
                WaitKind::Interval { remaining, period } => {
                    *remaining -= dt;
                    let mut count = 0;
                    if *period > 0.0 {
                        while *remaining <= 0.0 {
                            count += 1;
                            *remaining += *period;
                        }
                    } else if *remaining <= 0.0 {
                        count = 1;
                        *remaining = 0.0;
                    }
                    count
                }
                WaitKind::NextFrame => {
                    finished.push(key.clone());
                    1
                }
            };
            for _ in 0..fires {
                due.push(resume_for(key, wait));
            }
        }

        for key in finished {
            self.waits.swap_remove(&key);
        }
        due
    }
}

fn resume_for(key: &WaitKey, wait: &Wait) -> Resume {
    Resume {
        graph: wait.graph,
        node: key.node,
        output: wait.output.clone(),
        locals: wait.locals.clone(),
        stack: wait.stack.clone(),
    }
}
