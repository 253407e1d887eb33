//! Append-only log of the settings applied to the live network.

use chrono::NaiveDateTime;

/// Settings applied at one decision time, in structure order.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRecord {
    pub time: NaiveDateTime,
    pub settings: Vec<f64>,
}

/// Every committed decision of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlHistory {
    structure_ids: Vec<String>,
    records: Vec<ControlRecord>,
}

impl ControlHistory {
    pub fn new(structure_ids: Vec<String>) -> Self {
        Self {
            structure_ids,
            records: Vec::new(),
        }
    }

    pub fn structure_ids(&self) -> &[String] {
        &self.structure_ids
    }

    pub fn records(&self) -> &[ControlRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a decision.
    ///
    /// # Panics
    ///
    /// Panics if `settings` does not hold one value per structure.
    pub fn push(&mut self, time: NaiveDateTime, settings: Vec<f64>) {
        assert_eq!(
            settings.len(),
            self.structure_ids.len(),
            "one setting per structure"
        );
        self.records.push(ControlRecord { time, settings });
    }

    /// Settings of the latest record, or fully open before the first decision.
    pub fn last_settings(&self) -> Vec<f64> {
        self.records
            .last()
            .map(|r| r.settings.clone())
            .unwrap_or_else(|| vec![1.0; self.structure_ids.len()])
    }

    /// Records sorted by time, led by a fully-open row at `start`.
    ///
    /// The leading row stands for the default setting in force before the
    /// first decision and replaces any record stamped exactly at `start`.
    pub fn consolidated(&self, start: NaiveDateTime) -> Vec<ControlRecord> {
        let mut rows = vec![ControlRecord {
            time: start,
            settings: vec![1.0; self.structure_ids.len()],
        }];
        rows.extend(self.records.iter().filter(|r| r.time != start).cloned());
        rows.sort_by_key(|r| r.time);
        rows
    }
}
