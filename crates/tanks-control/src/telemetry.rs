// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Telemetry
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Telemetry frames and the in-memory session history.
//!
//! Each published variable gets a fixed-capacity ring so a long session
//! keeps a bounded, allocation-free trace of its recent trajectory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tanks_types::state::NamedValues;

/// Message pushed to the transport on every telemetry tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Seconds since session start.
    pub timestamp: f64,
    pub variables: NamedValues,
    pub setpoints: NamedValues,
    pub controls: NamedValues,
}

/// A fixed-size circular buffer for a single telemetry channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircularChannel {
    data: Vec<f64>,
    capacity: usize,
    head: usize,
    count: usize,
}

impl CircularChannel {
    /// Capacity is at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0.0; capacity],
            capacity,
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    /// Returns the data in chronological order (oldest to newest).
    pub fn get_view(&self) -> Vec<f64> {
        let mut result = Vec::with_capacity(self.count);
        if self.count < self.capacity {
            result.extend_from_slice(&self.data[0..self.count]);
        } else {
            result.extend_from_slice(&self.data[self.head..self.capacity]);
            result.extend_from_slice(&self.data[0..self.head]);
        }
        result
    }

    pub fn latest(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let idx = if self.head == 0 {
            self.capacity - 1
        } else {
            self.head - 1
        };
        Some(self.data[idx])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

/// Per-key history of published telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryHistory {
    capacity: usize,
    timestamps: CircularChannel,
    variables: BTreeMap<String, CircularChannel>,
    controls: BTreeMap<String, CircularChannel>,
}

impl TelemetryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            timestamps: CircularChannel::new(capacity),
            variables: BTreeMap::new(),
            controls: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, frame: &TelemetryFrame) {
        self.timestamps.push(frame.timestamp);
        let capacity = self.capacity;
        for (key, value) in &frame.variables {
            self.variables
                .entry(key.clone())
                .or_insert_with(|| CircularChannel::new(capacity))
                .push(*value);
        }
        for (key, value) in &frame.controls {
            self.controls
                .entry(key.clone())
                .or_insert_with(|| CircularChannel::new(capacity))
                .push(*value);
        }
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.timestamps.get_view()
    }

    /// Recorded trajectory of a variable or control key, oldest first.
    pub fn series(&self, key: &str) -> Option<Vec<f64>> {
        self.variables
            .get(key)
            .or_else(|| self.controls.get(key))
            .map(CircularChannel::get_view)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.variables.clear();
        self.controls.clear();
    }
}
