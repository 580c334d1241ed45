// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maximum number of program counters kept per stack. Deeper stacks are
/// truncated at the leaf end, matching the capture primitives this crate is
/// designed to consume.
pub const MAX_STACK_DEPTH: usize = 32;

/// A raw call stack: up to [`MAX_STACK_DEPTH`] program counters, leaf first,
/// zero-terminated when shorter. Two stacks are equal iff they are
/// bit-identical, which makes this the key of the stack table.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct RawStack {
    pcs: [u64; MAX_STACK_DEPTH],
}

impl RawStack {
    pub fn from_pcs(pcs: &[u64]) -> Self {
        let mut raw = Self::default();
        let n = pcs.len().min(MAX_STACK_DEPTH);
        raw.pcs[..n].copy_from_slice(&pcs[..n]);
        raw
    }

    /// The populated prefix, leaf first. A zero PC terminates the stack.
    pub fn pcs(&self) -> &[u64] {
        let n = self.pcs.iter().position(|&pc| pc == 0).unwrap_or(MAX_STACK_DEPTH);
        &self.pcs[..n]
    }

    pub fn is_empty(&self) -> bool {
        self.pcs[0] == 0
    }
}

impl Default for RawStack {
    fn default() -> Self {
        Self {
            pcs: [0; MAX_STACK_DEPTH],
        }
    }
}

impl fmt::Debug for RawStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pcs()).finish()
    }
}

/// A symbolic frame produced by a [`StackResolver`].
///
/// `entry` is the address of the function body the frame belongs to. It is
/// only compared against other entry addresses (self-filtering); names are
/// not used for that because inlining and monomorphization can erase or
/// duplicate them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Frame {
    pub function: String,
    pub filename: String,
    pub line: i64,
    pub entry: u64,
}

/// Opaque handle to a task's label set.
///
/// The sampler compares handles with [`Arc::ptr_eq`] on the hot path and
/// falls back to a canonical sorted-key rendering at export, so equal label
/// sets behind distinct handles still merge. The underlying pointer never
/// crosses the public API.
pub type TaskLabels = Arc<HashMap<String, String>>;

/// Result of one [`TaskSnapshotter::snapshot`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Snapshot {
    /// The first `n` entries of both buffers are populated.
    Complete(usize),
    /// The buffers were too small; the payload is the number of live tasks
    /// observed. The caller grows the buffers and retries.
    Grow(usize),
}

/// Turns a raw program-counter sequence into symbolic frames.
///
/// Resolution is deterministic and never fails as a whole: a PC that cannot
/// be resolved degrades to a synthetic frame with an empty function and
/// filename, line 0, and the PC itself as the entry address. Frame order is
/// leaf first, matching [`RawStack`].
pub trait StackResolver: Send {
    fn resolve(&mut self, raw: &RawStack) -> Vec<Frame>;
}

/// Captures, in one call, the current stack and label-set handle of every
/// live task.
///
/// The call may briefly suspend task scheduling to obtain a consistent
/// snapshot; the sampler holds none of its own locks across it.
pub trait TaskSnapshotter: Send {
    /// Fill the parallel buffers with one entry per live task.
    fn snapshot(
        &mut self,
        stacks: &mut [RawStack],
        labels: &mut [Option<TaskLabels>],
    ) -> Snapshot;

    /// Whether snapshots can be taken at all. Checked once at start.
    fn supported(&self) -> bool {
        true
    }

    /// Frames belonging to the profiler itself, as this snapshotter observes
    /// them. Buckets containing any of their entry addresses are excluded
    /// from the exported profile.
    fn self_frames(&self) -> Vec<Frame> {
        Vec::new()
    }
}

/// Output format of an encoded profile.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Format {
    /// Gzipped pprof protobuf.
    #[default]
    Pprof,
    /// Brendan Gregg folded-stack text.
    Folded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_stack_prefix_stops_at_zero() {
        let raw = RawStack::from_pcs(&[3, 2, 1]);
        assert_eq!(raw.pcs(), &[3, 2, 1]);
        assert!(!raw.is_empty());
        assert!(RawStack::default().is_empty());
    }

    #[test]
    fn raw_stack_truncates_deep_stacks() {
        let deep: Vec<u64> = (1..=40).collect();
        let raw = RawStack::from_pcs(&deep);
        assert_eq!(raw.pcs().len(), MAX_STACK_DEPTH);
        assert_eq!(raw.pcs()[0], 1);
        assert_eq!(raw.pcs()[MAX_STACK_DEPTH - 1], MAX_STACK_DEPTH as u64);
    }

    #[test]
    fn raw_stack_equality_is_bitwise() {
        let a = RawStack::from_pcs(&[1, 2, 3]);
        let b = RawStack::from_pcs(&[1, 2, 3]);
        let c = RawStack::from_pcs(&[1, 2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
