// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::api::TaskLabels;

/// One label set's accumulated sample count within a single stack bucket.
///
/// The canonical key is not computed while sampling is in progress; it is
/// built lazily at export and then used to merge dimensions whose handles
/// differed even though their contents coincide.
pub struct Dimension {
    labels: Option<TaskLabels>,
    key: Option<String>,
    pub count: i64,
}

impl Dimension {
    pub fn new(labels: Option<TaskLabels>) -> Self {
        Self {
            labels,
            key: None,
            count: 1,
        }
    }

    pub fn labels(&self) -> Option<&TaskLabels> {
        self.labels.as_ref()
    }

    pub fn is_unlabeled(&self) -> bool {
        self.labels.is_none()
    }

    /// Pointer-identity fast path. Content equality is deferred to the
    /// canonical key at export.
    pub fn matches_handle(&self, handle: &TaskLabels) -> bool {
        match &self.labels {
            Some(labels) => Arc::ptr_eq(labels, handle),
            None => false,
        }
    }

    pub(crate) fn build_key(&mut self) {
        if self.key.is_none() {
            self.key = Some(match &self.labels {
                None => String::new(),
                Some(labels) => canonical_key(labels),
            });
        }
    }

    /// The canonical key. Only valid after [`Dimension::build_key`]; the
    /// unlabeled dimension's key is the empty string.
    pub(crate) fn key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

/// Renders a label set as `k1:v1;k2:v2;…;` with keys sorted
/// lexicographically. Equal label sets render identically regardless of the
/// handle they arrived behind.
fn canonical_key(labels: &TaskLabels) -> String {
    let mut keys: Vec<&str> = labels.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut out = String::with_capacity(keys.len() * 16);
    for key in keys {
        out.push_str(key);
        out.push(':');
        out.push_str(&labels[key]);
        out.push(';');
    }
    out
}

/// Sorts dimensions by canonical key (unlabeled first, as the empty string)
/// and compacts adjacent equal keys by summing their counts. Count
/// preserving: the total over the slice is unchanged.
pub(crate) fn merge_dimensions(dims: &mut Vec<Dimension>) {
    for dim in dims.iter_mut() {
        dim.build_key();
    }
    dims.sort_by(|a, b| a.key().cmp(b.key()));

    let mut merged: Vec<Dimension> = Vec::with_capacity(dims.len());
    for dim in dims.drain(..) {
        match merged.last_mut() {
            Some(last) if last.key() == dim.key() => last.count += dim.count,
            _ => merged.push(dim),
        }
    }
    *dims = merged;
}
