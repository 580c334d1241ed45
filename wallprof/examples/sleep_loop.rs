// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Profiles a handful of mostly-sleeping worker threads for three seconds
//! and writes `wall.pb.gz`, readable with `go tool pprof wall.pb.gz`.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wallprof::registry::{FrameTable, TaskRegistry};
use wallprof::Profiler;

fn main() -> anyhow::Result<()> {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let done = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::new();
    for id in 0..4 {
        let registry = registry.clone();
        let frames = frames.clone();
        let done = done.clone();
        workers.push(std::thread::spawn(move || {
            let main_stack = frames.stack(&[("worker_main", "sleep_loop.rs", 20)]);
            let labels = Arc::new(HashMap::from([(
                "worker".to_string(),
                id.to_string(),
            )]));
            let task = registry.register(main_stack, Some(labels));

            // Alternate between a short burst of work and a long sleep,
            // publishing the current stack at each transition the way a
            // runtime would at suspension points.
            while !done.load(Ordering::Relaxed) {
                task.set_stack(frames.stack(&[
                    ("spin", "sleep_loop.rs", 33),
                    ("worker_main", "sleep_loop.rs", 20),
                ]));
                std::hint::black_box((0..100_000).sum::<u64>());

                task.set_stack(frames.stack(&[
                    ("sleep", "sleep_loop.rs", 39),
                    ("worker_main", "sleep_loop.rs", 20),
                ]));
                std::thread::sleep(Duration::from_millis(40));
            }
        }));
    }

    let profiler = Profiler::new(
        Box::new(registry.snapshotter()),
        Box::new(frames.resolver()),
    );
    let stop = profiler.start(File::create("wall.pb.gz")?)?;
    std::thread::sleep(Duration::from_secs(3));
    stop.stop()?;

    done.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
    println!("wrote wall.pb.gz");
    Ok(())
}
