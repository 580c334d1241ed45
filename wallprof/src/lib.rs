// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock sampling profiler for every schedulable task in a program.
//!
//! At a fixed rate (99Hz by default) the sampler snapshots the call stack
//! and label set of every live task, running or blocked, and aggregates the
//! snapshots into a weighted call graph. Because samples are taken whether
//! or not a task is on-CPU, the resulting profile attributes elapsed wall
//! time, including time spent blocked on I/O, channels, locks, and timers,
//! which CPU profilers cannot see.
//!
//! The stack-capture primitive and PC resolution are pluggable: the sampler
//! drives any [`TaskSnapshotter`] / [`StackResolver`] pair. Runtimes without
//! a native primitive can use the [`registry`] module, where tasks register
//! at spawn and publish their stacks at suspension points.
//!
//! ```no_run
//! use wallprof::registry::{FrameTable, TaskRegistry};
//! use wallprof::Profiler;
//!
//! let registry = TaskRegistry::new();
//! let frames = FrameTable::new();
//!
//! let profiler = Profiler::new(
//!     Box::new(registry.snapshotter()),
//!     Box::new(frames.resolver()),
//! );
//! let stop = profiler.start(Vec::new())?;
//! // ... run the workload ...
//! let profile_bytes = stop.stop()?;
//! # Ok::<(), wallprof::ProfilerError>(())
//! ```

pub mod api;
pub mod error;
pub mod folded;
pub mod handler;
pub mod internal;
pub mod pprof;
pub mod registry;
pub mod sampler;

pub use api::{
    Format, Frame, RawStack, Snapshot, StackResolver, TaskLabels, TaskSnapshotter,
    MAX_STACK_DEPTH,
};
pub use error::ProfilerError;
pub use sampler::{Profiler, StopHandle, DEFAULT_SAMPLE_HZ};
