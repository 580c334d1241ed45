// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use indexmap::map::Entry;

use super::{merge_dimensions, Dimension, FxIndexMap};
use crate::api::{Frame, RawStack, StackResolver, TaskLabels};

/// One distinct raw stack and everything observed for it: the symbolic
/// frames (resolved once, on first insertion) and one [`Dimension`] per
/// label set seen with this stack.
pub struct StackBucket {
    pub frames: Vec<Frame>,
    pub dims: Vec<Dimension>,
}

impl StackBucket {
    fn record(&mut self, labels: Option<TaskLabels>) {
        match labels {
            None => {
                // The unlabeled dimension is unique within a bucket, so the
                // first hit wins and there is nothing to merge later.
                match self.dims.iter_mut().find(|d| d.is_unlabeled()) {
                    Some(dim) => dim.count += 1,
                    None => self.dims.push(Dimension::new(None)),
                }
            }
            Some(handle) => {
                match self.dims.iter_mut().find(|d| d.matches_handle(&handle)) {
                    Some(dim) => dim.count += 1,
                    // Content-level deduplication happens at export; here we
                    // only pay for a pointer scan.
                    None => self.dims.push(Dimension::new(Some(handle))),
                }
            }
        }
    }

    fn contains_entry(&self, entries: &[u64]) -> bool {
        self.frames
            .iter()
            .any(|frame| entries.contains(&frame.entry))
    }
}

/// Content-addressed store of every stack observed while sampling, keyed by
/// the full PC vector.
///
/// Created when sampling starts, mutated only by the sampler driver, and
/// frozen once the driver acknowledges the stop signal. Buckets are born on
/// first observation and never removed.
pub struct StackTable {
    resolver: Box<dyn StackResolver>,
    stacks: FxIndexMap<RawStack, StackBucket>,
    ignored_entries: Vec<u64>,
}

impl StackTable {
    pub fn new(resolver: Box<dyn StackResolver>) -> Self {
        Self {
            resolver,
            stacks: Default::default(),
            ignored_entries: Vec::new(),
        }
    }

    /// Insert-or-update for one observation of `raw` under `labels`.
    ///
    /// Expected O(1) for the stack lookup, O(D) for the dimension scan where
    /// D is the number of distinct label sets seen with this stack.
    pub fn record(&mut self, raw: RawStack, labels: Option<TaskLabels>) {
        let bucket = match self.stacks.entry(raw) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut frames = self.resolver.resolve(&raw);
                if frames.is_empty() && !raw.is_empty() {
                    // A resolver must degrade per-PC rather than fail, but
                    // guard against one that returns nothing anyway.
                    frames = synthetic_frames(&raw);
                }
                entry.insert(StackBucket {
                    frames,
                    dims: Vec::new(),
                })
            }
        };
        bucket.record(labels);
    }

    /// Configures the self-filter: buckets whose frames share an entry
    /// address with any of `frames` are excluded from export.
    pub fn set_ignored(&mut self, frames: &[Frame]) {
        self.ignored_entries = frames.iter().map(|frame| frame.entry).collect();
    }

    /// All buckets that survive the self-filter, with their dimensions
    /// merged by canonical label key. Iteration order is insertion order.
    pub fn exported_buckets(&mut self) -> impl Iterator<Item = &StackBucket> {
        let ignored = self.ignored_entries.clone();
        self.stacks
            .values_mut()
            .filter(move |bucket| !bucket.contains_entry(&ignored))
            .map(|bucket| {
                merge_dimensions(&mut bucket.dims);
                &*bucket
            })
    }

    /// Total number of per-task observations recorded, across all buckets
    /// and dimensions.
    pub fn total_count(&self) -> i64 {
        self.stacks
            .values()
            .flat_map(|bucket| bucket.dims.iter())
            .map(|dim| dim.count)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

fn synthetic_frames(raw: &RawStack) -> Vec<Frame> {
    raw.pcs()
        .iter()
        .map(|&pc| Frame {
            entry: pc,
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Maps each PC to a one-frame stack named `fn<pc>` with entry == pc.
    struct PcResolver;

    impl StackResolver for PcResolver {
        fn resolve(&mut self, raw: &RawStack) -> Vec<Frame> {
            raw.pcs()
                .iter()
                .map(|&pc| Frame {
                    function: format!("fn{pc}"),
                    filename: format!("fn{pc}.rs"),
                    line: pc as i64,
                    entry: pc,
                })
                .collect()
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> TaskLabels {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn table() -> StackTable {
        StackTable::new(Box::new(PcResolver))
    }

    #[test]
    fn unlabeled_observations_share_one_dimension() {
        let mut t = table();
        let raw = RawStack::from_pcs(&[1, 2]);
        t.record(raw, None);
        t.record(raw, None);
        t.record(raw, None);

        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].dims.len(), 1);
        assert!(buckets[0].dims[0].is_unlabeled());
        assert_eq!(buckets[0].dims[0].count, 3);
    }

    #[test]
    fn same_handle_hits_the_pointer_fast_path() {
        let mut t = table();
        let raw = RawStack::from_pcs(&[1]);
        let l = labels(&[("k", "v")]);
        t.record(raw, Some(l.clone()));
        t.record(raw, Some(l));

        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets[0].dims.len(), 1);
        assert_eq!(buckets[0].dims[0].count, 2);
    }

    #[test]
    fn distinct_handles_with_equal_contents_merge_at_export() {
        let mut t = table();
        let raw = RawStack::from_pcs(&[1]);
        t.record(raw, Some(labels(&[("k", "v")])));
        t.record(raw, Some(labels(&[("k", "v")])));

        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets[0].dims.len(), 1);
        assert_eq!(buckets[0].dims[0].count, 2);
    }

    #[test]
    fn unlabeled_and_labeled_stay_separate() {
        let mut t = table();
        let raw = RawStack::from_pcs(&[1]);
        t.record(raw, None);
        t.record(raw, Some(labels(&[("k", "v")])));
        t.record(raw, None);

        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets[0].dims.len(), 2);
        assert_eq!(buckets[0].dims.iter().map(|d| d.count).sum::<i64>(), 3);
    }

    #[test]
    fn no_observation_is_dropped() {
        let mut t = table();
        for i in 0..10u64 {
            let raw = RawStack::from_pcs(&[i % 3 + 1]);
            let l = (i % 2 == 0).then(|| labels(&[("i", &(i % 2).to_string())]));
            t.record(raw, l);
        }
        assert_eq!(t.total_count(), 10);
    }

    #[test]
    fn frames_resolve_once_and_stay_leaf_first() {
        let mut t = table();
        let raw = RawStack::from_pcs(&[7, 8]);
        t.record(raw, None);
        t.record(raw, None);

        let buckets: Vec<_> = t.exported_buckets().collect();
        let frames = &buckets[0].frames;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "fn7");
        assert_eq!(frames[1].function, "fn8");
    }

    #[test]
    fn ignored_entry_filters_the_whole_bucket() {
        let mut t = table();
        t.record(RawStack::from_pcs(&[1, 2]), None);
        t.record(RawStack::from_pcs(&[3]), None);

        t.set_ignored(&[Frame {
            entry: 2,
            ..Default::default()
        }]);
        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].frames[0].function, "fn3");
    }

    #[test]
    fn empty_resolver_output_degrades_to_synthetic_frames() {
        struct NoneResolver;
        impl StackResolver for NoneResolver {
            fn resolve(&mut self, _raw: &RawStack) -> Vec<Frame> {
                Vec::new()
            }
        }

        let mut t = StackTable::new(Box::new(NoneResolver));
        t.record(RawStack::from_pcs(&[5, 6]), None);
        let buckets: Vec<_> = t.exported_buckets().collect();
        assert_eq!(buckets[0].frames.len(), 2);
        assert_eq!(buckets[0].frames[0].function, "");
        assert_eq!(buckets[0].frames[0].entry, 5);
        assert_eq!(buckets[0].frames[0].line, 0);
    }
}
