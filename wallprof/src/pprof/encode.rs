// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::time::SystemTime;

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use super::proto;
use crate::api::Frame;
use crate::error::ProfilerError;
use crate::internal::{FxIndexMap, FxIndexSet, StackTable};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Builds the pprof message for everything the table exports.
///
/// `actual_hz` is the effective sample rate measured over the run, not the
/// requested one; the advertised period is derived from it so downstream
/// tools see truthful wall time even when sampling was throttled.
pub fn build(
    table: &mut StackTable,
    actual_hz: i64,
    start: SystemTime,
    end: SystemTime,
) -> proto::Profile {
    let mut encoder = Encoder::new(actual_hz, start, end);
    let period = encoder.profile.period;

    for bucket in table.exported_buckets() {
        let location_ids: Vec<u64> = bucket
            .frames
            .iter()
            .map(|frame| encoder.location_id(frame))
            .collect();

        for dim in &bucket.dims {
            let labels = match dim.labels() {
                None => Vec::new(),
                Some(labels) => {
                    let mut pairs: Vec<(&str, &str)> = labels
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect();
                    pairs.sort_unstable();
                    pairs
                        .into_iter()
                        .map(|(k, v)| proto::Label {
                            key: encoder.intern(k),
                            str: encoder.intern(v),
                            num: 0,
                            num_unit: 0,
                        })
                        .collect()
                }
            };

            // Every dimension of the bucket shares the same location list.
            encoder.profile.samples.push(proto::Sample {
                location_ids: location_ids.clone(),
                values: vec![dim.count * period],
                labels,
            });
        }
    }

    encoder.finish()
}

/// Encodes the table as a gzipped pprof profile and hands the sink back.
pub fn write<W: Write>(
    table: &mut StackTable,
    sink: W,
    actual_hz: i64,
    start: SystemTime,
    end: SystemTime,
) -> Result<W, ProfilerError> {
    let profile = build(table, actual_hz, start, end);
    let mut buf = Vec::with_capacity(4096);
    profile.encode(&mut buf)?;

    let mut gz = GzEncoder::new(sink, Compression::default());
    gz.write_all(&buf)?;
    Ok(gz.finish()?)
}

struct Encoder {
    profile: proto::Profile,
    strings: FxIndexSet<String>,
    // (name, filename) string ids -> Function.id
    functions: FxIndexMap<(i64, i64), u64>,
    // (Function.id, line) -> Location.id
    locations: FxIndexMap<(u64, i64), u64>,
}

impl Encoder {
    fn new(actual_hz: i64, start: SystemTime, end: SystemTime) -> Self {
        let mut encoder = Self {
            profile: proto::Profile::default(),
            strings: Default::default(),
            functions: Default::default(),
            locations: Default::default(),
        };
        encoder.intern("");

        let wall = encoder.intern("wall");
        let nanoseconds = encoder.intern("nanoseconds");
        let value_type = proto::ValueType {
            r#type: wall,
            unit: nanoseconds,
        };
        encoder.profile.sample_types = vec![value_type];
        encoder.profile.period_type = Some(value_type);
        encoder.profile.period = NANOS_PER_SEC / actual_hz;

        encoder.profile.time_nanos = start
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos().min(i64::MAX as u128) as i64);
        encoder.profile.duration_nanos = end
            .duration_since(start)
            .map_or(0, |d| d.as_nanos().min(i64::MAX as u128) as i64);

        encoder.profile.mappings = vec![proto::Mapping {
            id: 1,
            has_functions: true,
            ..Default::default()
        }];

        encoder
    }

    fn intern(&mut self, s: &str) -> i64 {
        let index = match self.strings.get_index_of(s) {
            Some(index) => index,
            None => self.strings.insert_full(s.to_owned()).0,
        };
        index as i64
    }

    fn function_id(&mut self, frame: &Frame) -> u64 {
        let name = self.intern(&frame.function);
        let filename = self.intern(&frame.filename);
        match self.functions.get(&(name, filename)) {
            Some(&id) => id,
            None => {
                // pprof reserves id 0, so ids are offset by one.
                let id = self.functions.len() as u64 + 1;
                self.profile.functions.push(proto::Function {
                    id,
                    name,
                    system_name: name,
                    filename,
                });
                self.functions.insert((name, filename), id);
                id
            }
        }
    }

    fn location_id(&mut self, frame: &Frame) -> u64 {
        let function_id = self.function_id(frame);
        match self.locations.get(&(function_id, frame.line)) {
            Some(&id) => id,
            None => {
                let id = self.locations.len() as u64 + 1;
                self.profile.locations.push(proto::Location {
                    id,
                    mapping_id: 1,
                    address: 0,
                    lines: vec![proto::Line {
                        function_id,
                        line: frame.line,
                    }],
                    is_folded: false,
                });
                self.locations.insert((function_id, frame.line), id);
                id
            }
        }
    }

    fn finish(mut self) -> proto::Profile {
        self.profile.string_table = self.strings.into_iter().collect();
        self.profile
    }
}
