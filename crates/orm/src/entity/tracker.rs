//! Change tracking
//!
//! A field is dirty while its current value differs from the baseline. Writing
//! the baseline value back makes it clean again. Association fields are
//! tracked by [`ChangeTracker::touch`] and stay dirty until the next reset,
//! since two unsaved targets cannot be told apart by key.

use std::collections::{BTreeMap, BTreeSet};

use crate::backends::DatabaseValue;

#[derive(Debug, Clone)]
pub struct ChangeTracker {
    baseline: BTreeMap<String, DatabaseValue>,
    dirty: BTreeSet<String>,
    touched: BTreeSet<String>,
    enabled: bool,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            baseline: BTreeMap::new(),
            dirty: BTreeSet::new(),
            touched: BTreeSet::new(),
            enabled: true,
        }
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by every mapped setter
    pub fn record_change(&mut self, field: &str, old: DatabaseValue, new: DatabaseValue) {
        if !self.enabled {
            return;
        }
        let baseline = self.baseline.entry(field.to_string()).or_insert(old);
        if *baseline == new && !self.touched.contains(field) {
            self.dirty.remove(field);
        } else {
            self.dirty.insert(field.to_string());
        }
    }

    /// Mark an association field as changed
    pub fn touch(&mut self, field: &str) {
        if !self.enabled {
            return;
        }
        self.touched.insert(field.to_string());
        self.dirty.insert(field.to_string());
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_field_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.dirty.iter().cloned().collect()
    }

    pub fn baseline_value(&self, field: &str) -> Option<&DatabaseValue> {
        self.baseline.get(field)
    }

    /// Re-arm tracking with committed values
    pub fn reset(&mut self, baseline: BTreeMap<String, DatabaseValue>) {
        self.baseline = baseline;
        self.dirty.clear();
        self.touched.clear();
    }

    /// Go back to the baseline of `earlier`, keeping edits made since then
    ///
    /// Dirtiness is recomputed against `current`. A field without a value on
    /// either side stays dirty if either tracker had it dirty.
    pub fn rebase(&mut self, earlier: &ChangeTracker, current: &BTreeMap<String, DatabaseValue>) {
        let recorded: BTreeSet<String> = self.dirty.union(&earlier.dirty).cloned().collect();
        self.touched.extend(earlier.touched.iter().cloned());
        self.baseline = earlier.baseline.clone();
        self.dirty = self.touched.clone();

        for field in recorded {
            if !current.contains_key(&field) || !self.baseline.contains_key(&field) {
                self.dirty.insert(field);
            }
        }
        for (field, value) in current {
            if self.baseline.get(field).is_some_and(|baseline| baseline != value) {
                self.dirty.insert(field.clone());
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}
