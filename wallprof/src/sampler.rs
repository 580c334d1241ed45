// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, select_biased, tick, Receiver, Sender};
use log::debug;

use crate::api::{Format, Frame, RawStack, Snapshot, StackResolver, TaskLabels, TaskSnapshotter};
use crate::error::ProfilerError;
use crate::internal::StackTable;
use crate::{folded, pprof};

/// Default sample rate. 99Hz rather than 100Hz so the sampler does not
/// phase-lock with workloads that are themselves periodic at multiples of
/// 100Hz.
pub const DEFAULT_SAMPLE_HZ: u64 = 99;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A configured but not yet running profiler.
///
/// `start` spawns one dedicated driver thread that wakes on a periodic tick,
/// snapshots every live task, and feeds the stack table. Everything else,
/// including encoding, happens on the caller's side of the stop handshake.
pub struct Profiler {
    snapshotter: Box<dyn TaskSnapshotter>,
    resolver: Box<dyn StackResolver>,
    frequency: u64,
}

impl Profiler {
    pub fn new(snapshotter: Box<dyn TaskSnapshotter>, resolver: Box<dyn StackResolver>) -> Self {
        Self {
            snapshotter,
            resolver,
            frequency: DEFAULT_SAMPLE_HZ,
        }
    }

    /// Overrides the requested sample rate. The emitted profile always
    /// advertises the rate actually achieved, not this one.
    pub fn frequency(mut self, hz: u64) -> Self {
        self.frequency = hz.max(1);
        self
    }

    /// Begins profiling into `sink` in the default pprof format.
    pub fn start<W: Write>(self, sink: W) -> Result<StopHandle<W>, ProfilerError> {
        self.start_with_format(sink, Format::default())
    }

    pub fn start_with_format<W: Write>(
        self,
        sink: W,
        format: Format,
    ) -> Result<StopHandle<W>, ProfilerError> {
        if !self.snapshotter.supported() {
            return Err(ProfilerError::SnapshotUnsupported);
        }

        let start_time = SystemTime::now();
        let started = Instant::now();
        let (stop_tx, stop_rx) = bounded(1);
        let ticker = tick(Duration::from_nanos(NANOS_PER_SEC / self.frequency));

        let driver = Driver {
            snapshotter: self.snapshotter,
            table: StackTable::new(self.resolver),
            stacks: Vec::new(),
            labels: Vec::new(),
            sample_count: 0,
            ticker,
            stop_rx,
        };
        debug!("starting sampler driver at {}hz", self.frequency);
        let handle = std::thread::spawn(move || driver.run());

        Ok(StopHandle {
            sink,
            format,
            start_time,
            started,
            stop_tx,
            handle,
        })
    }
}

/// Live profiling session. Consuming it with [`StopHandle::stop`] is the
/// only way to end the session, so a double stop cannot be expressed.
pub struct StopHandle<W> {
    sink: W,
    format: Format,
    start_time: SystemTime,
    started: Instant,
    stop_tx: Sender<()>,
    handle: JoinHandle<DriverReport>,
}

impl<W: Write> StopHandle<W> {
    /// Terminates sampling, encodes the profile into the sink, and returns
    /// the sink.
    ///
    /// Synchronous: the driver is signalled and joined before anything is
    /// written, so its last `record` happens-before the first encoded byte.
    pub fn stop(self) -> Result<W, ProfilerError> {
        self.stop_tx.send(()).map_err(|_| ProfilerError::Driver)?;
        let end_time = SystemTime::now();
        let elapsed = self.started.elapsed();
        let report = self.handle.join().map_err(|_| ProfilerError::Driver)?;
        debug!(
            "sampler stopped after {} ticks over {:?}",
            report.sample_count, elapsed
        );

        let mut table = report.table;
        table.set_ignored(&report.self_frames);

        let actual_hz = effective_rate(report.sample_count, elapsed);
        match self.format {
            Format::Pprof => {
                pprof::write(&mut table, self.sink, actual_hz, self.start_time, end_time)
            }
            Format::Folded => folded::write(&mut table, self.sink),
        }
    }
}

/// The achieved sample rate, which can be well below the requested one when
/// the driver gets starved. Derived after the fact from the tick count so
/// the advertised period stays truthful; floored at 1 to keep the pprof
/// period positive for degenerate sub-tick runs.
fn effective_rate(sample_count: u64, elapsed: Duration) -> i64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 1;
    }
    ((sample_count as f64 / secs).round() as i64).max(1)
}

struct DriverReport {
    table: StackTable,
    sample_count: u64,
    self_frames: Vec<Frame>,
}

struct Driver {
    snapshotter: Box<dyn TaskSnapshotter>,
    table: StackTable,
    stacks: Vec<RawStack>,
    labels: Vec<Option<TaskLabels>>,
    sample_count: u64,
    ticker: Receiver<Instant>,
    stop_rx: Receiver<()>,
}

impl Driver {
    fn run(mut self) -> DriverReport {
        loop {
            select_biased! {
                recv(self.stop_rx) -> _ => break,
                recv(self.ticker) -> _ => {
                    // One sample per tick regardless of how many tasks the
                    // tick observed.
                    self.sample_count += 1;
                    self.sample_all_tasks();
                }
            }
        }
        let self_frames = self.snapshotter.self_frames();
        DriverReport {
            table: self.table,
            sample_count: self.sample_count,
            self_frames,
        }
    }

    fn sample_all_tasks(&mut self) {
        loop {
            match self.snapshotter.snapshot(&mut self.stacks, &mut self.labels) {
                Snapshot::Complete(n) => {
                    let n = n.min(self.stacks.len());
                    for i in 0..n {
                        self.table.record(self.stacks[i], self.labels[i].take());
                    }
                    return;
                }
                Snapshot::Grow(hint) => self.grow_buffers(hint),
            }
        }
    }

    fn grow_buffers(&mut self, hint: usize) {
        // 10% overshoot absorbs tasks spawned between the hint and the
        // retry. Buffers never shrink, so steady state allocates nothing.
        let target = ((hint as f64) * 1.1).ceil() as usize;
        let new_len = target.max(self.stacks.len() + 1);
        debug!(
            "growing snapshot buffers from {} to {} slots",
            self.stacks.len(),
            new_len
        );
        self.stacks.resize(new_len, RawStack::default());
        self.labels.resize(new_len, None);
    }
}
