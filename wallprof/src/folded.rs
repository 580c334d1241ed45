// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folded-stack text output: one `root;…;leaf count` line per distinct
//! stack, in the format consumed by Brendan Gregg's FlameGraph tooling.

use std::io::Write;

use crate::error::ProfilerError;
use crate::internal::StackTable;

/// Encodes the table as folded-stack text and hands the sink back.
///
/// Labels are not represented in this format, so a bucket's dimensions
/// collapse into a single count. Lines are sorted lexicographically by the
/// joined stack so identical runs produce byte-identical output, and every
/// line, including the last, ends in a newline.
pub fn write<W: Write>(table: &mut StackTable, mut sink: W) -> Result<W, ProfilerError> {
    let mut lines: Vec<(String, i64)> = table
        .exported_buckets()
        .map(|bucket| {
            // Stored frames are leaf first; folded stacks read root first.
            let mut joined = String::new();
            for frame in bucket.frames.iter().rev() {
                if !joined.is_empty() {
                    joined.push(';');
                }
                joined.push_str(&frame.function);
            }
            let count = bucket.dims.iter().map(|dim| dim.count).sum();
            (joined, count)
        })
        .collect();
    lines.sort();

    for (stack, count) in lines {
        writeln!(sink, "{stack} {count}")?;
    }
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Frame, RawStack, StackResolver, TaskLabels};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct LetterResolver;

    impl StackResolver for LetterResolver {
        fn resolve(&mut self, raw: &RawStack) -> Vec<Frame> {
            raw.pcs()
                .iter()
                .map(|&pc| Frame {
                    function: char::from(b'a' + (pc as u8 - 1)).to_string(),
                    entry: pc,
                    ..Default::default()
                })
                .collect()
        }
    }

    fn render(table: &mut StackTable) -> String {
        let bytes = write(table, Vec::new()).expect("folded encode to succeed");
        String::from_utf8(bytes).expect("folded output to be utf-8")
    }

    #[test]
    fn stacks_are_root_first_sorted_and_newline_terminated() {
        let mut table = StackTable::new(Box::new(LetterResolver));
        // Leaf-first [c, a] renders as root-first "a;c".
        table.record(RawStack::from_pcs(&[3, 1]), None);
        table.record(RawStack::from_pcs(&[2]), None);
        table.record(RawStack::from_pcs(&[2]), None);

        assert_eq!(render(&mut table), "a;c 1\nb 2\n");
    }

    #[test]
    fn labels_fold_into_one_count() {
        let mut table = StackTable::new(Box::new(LetterResolver));
        let raw = RawStack::from_pcs(&[1]);
        let labels: TaskLabels =
            Arc::new(HashMap::from([("k".to_string(), "v".to_string())]));
        table.record(raw, None);
        table.record(raw, Some(labels));

        assert_eq!(render(&mut table), "a 2\n");
    }

    #[test]
    fn identical_runs_are_byte_identical() {
        let build = || {
            let mut table = StackTable::new(Box::new(LetterResolver));
            table.record(RawStack::from_pcs(&[2, 1]), None);
            table.record(RawStack::from_pcs(&[3]), None);
            table.record(RawStack::from_pcs(&[2, 1]), None);
            render(&mut table)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn ignored_frames_are_filtered_here_too() {
        let mut table = StackTable::new(Box::new(LetterResolver));
        table.record(RawStack::from_pcs(&[1]), None);
        table.record(RawStack::from_pcs(&[2]), None);
        table.set_ignored(&[Frame {
            entry: 1,
            ..Default::default()
        }]);

        assert_eq!(render(&mut table), "b 1\n");
    }
}
