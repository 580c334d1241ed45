// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process implementations of the two capability traits for runtimes
//! that have no platform stack-capture primitive.
//!
//! Tasks register with a [`TaskRegistry`] when they spawn and publish their
//! current stack (and labels) at suspension points; the paired
//! [`FrameTable`] interns symbolic frames as synthetic program counters so
//! a [`RawStack`] can be resolved back to frames deterministically. The
//! sampler consumes both through the ordinary [`TaskSnapshotter`] /
//! [`StackResolver`] seams and cannot tell them apart from a native
//! primitive.

use std::sync::{Arc, Mutex, PoisonError};

use crate::api::{Frame, RawStack, Snapshot, StackResolver, TaskLabels, TaskSnapshotter};
use crate::internal::{FxIndexMap, FxIndexSet};

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    tasks: FxIndexMap<u64, TaskSlot>,
}

struct TaskSlot {
    stack: RawStack,
    labels: Option<TaskLabels>,
}

/// Registry of live tasks and their most recently published stacks.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task. The task stays visible to snapshots until the
    /// returned guard is dropped.
    pub fn register(&self, stack: RawStack, labels: Option<TaskLabels>) -> TaskGuard {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tasks.insert(id, TaskSlot { stack, labels });
        TaskGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// A snapshotter view over this registry, to hand to the profiler.
    pub fn snapshotter(&self) -> RegistrySnapshotter {
        RegistrySnapshotter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Keeps one registered task alive; deregisters it on drop.
pub struct TaskGuard {
    inner: Arc<Mutex<RegistryInner>>,
    id: u64,
}

impl TaskGuard {
    /// Publishes the task's current stack. Called at suspension points.
    pub fn set_stack(&self, stack: RawStack) {
        if let Some(slot) = lock(&self.inner).tasks.get_mut(&self.id) {
            slot.stack = stack;
        }
    }

    pub fn set_labels(&self, labels: Option<TaskLabels>) {
        if let Some(slot) = lock(&self.inner).tasks.get_mut(&self.id) {
            slot.labels = labels;
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        lock(&self.inner).tasks.swap_remove(&self.id);
    }
}

pub struct RegistrySnapshotter {
    inner: Arc<Mutex<RegistryInner>>,
}

impl TaskSnapshotter for RegistrySnapshotter {
    fn snapshot(
        &mut self,
        stacks: &mut [RawStack],
        labels: &mut [Option<TaskLabels>],
    ) -> Snapshot {
        let inner = lock(&self.inner);
        let live = inner.tasks.len();
        if live > stacks.len() {
            return Snapshot::Grow(live);
        }
        for (i, slot) in inner.tasks.values().enumerate() {
            stacks[i] = slot.stack;
            labels[i] = slot.labels.clone();
        }
        Snapshot::Complete(live)
    }
}

fn lock(inner: &Mutex<RegistryInner>) -> std::sync::MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct FrameTableInner {
    keys: FxIndexSet<(String, String, i64)>,
    frames: Vec<Frame>,
}

/// Interns `(function, filename, line)` triples as synthetic program
/// counters, and resolves them back. PC 0 stays reserved as the stack
/// terminator, so interned PCs start at 1.
#[derive(Clone, Default)]
pub struct FrameTable {
    inner: Arc<Mutex<FrameTableInner>>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns one frame, returning its synthetic PC. Idempotent.
    pub fn frame(&self, function: &str, filename: &str, line: i64) -> u64 {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match inner
            .keys
            .get_index_of(&(function.to_owned(), filename.to_owned(), line))
        {
            Some(index) => index as u64 + 1,
            None => {
                let (index, _) =
                    inner
                        .keys
                        .insert_full((function.to_owned(), filename.to_owned(), line));
                let pc = index as u64 + 1;
                inner.frames.push(Frame {
                    function: function.to_owned(),
                    filename: filename.to_owned(),
                    line,
                    entry: pc,
                });
                pc
            }
        }
    }

    /// Builds a raw stack from leaf-first `(function, filename, line)`
    /// triples, interning each frame.
    pub fn stack(&self, frames: &[(&str, &str, i64)]) -> RawStack {
        let pcs: Vec<u64> = frames
            .iter()
            .map(|&(function, filename, line)| self.frame(function, filename, line))
            .collect();
        RawStack::from_pcs(&pcs)
    }

    /// A resolver view over this table, to hand to the profiler.
    pub fn resolver(&self) -> FrameTableResolver {
        FrameTableResolver {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct FrameTableResolver {
    inner: Arc<Mutex<FrameTableInner>>,
}

impl StackResolver for FrameTableResolver {
    fn resolve(&mut self, raw: &RawStack) -> Vec<Frame> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        raw.pcs()
            .iter()
            .map(|&pc| {
                match inner.frames.get(pc as usize - 1) {
                    Some(frame) => frame.clone(),
                    // Unknown PCs degrade to a synthetic frame instead of
                    // failing the resolution.
                    None => Frame {
                        entry: pc,
                        ..Default::default()
                    },
                }
            })
            .collect()
    }
}
