// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// The platform snapshot primitive cannot be invoked. Surfaced from
    /// `start`, before any sampling happens.
    #[error("task snapshots are not supported by this snapshotter")]
    SnapshotUnsupported,

    /// The output sink failed while the profile was being written. Partial
    /// writes may have reached the sink; the profile is considered lost.
    #[error("failed to write profile to sink")]
    Sink(#[from] io::Error),

    #[error("failed to encode profile")]
    Encode(#[from] prost::EncodeError),

    /// The driver thread is gone without acknowledging the stop signal.
    #[error("sampler driver terminated unexpectedly")]
    Driver,
}
