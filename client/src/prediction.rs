//! Local input history for prediction and reconciliation
//!
//! The local car is driven by the client's own physics model, so inputs are
//! applied immediately and only recorded here. [`ClientPrediction::reconcile`]
//! keeps the latest authoritative view of the local player but does not
//! correct anything yet; replaying unacknowledged inputs on top of that view
//! is where a server-simulated mode would hook in.

use log::debug;
use shared::{PlayerInput, PlayerView, INPUT_HISTORY_CAPACITY};
use std::collections::VecDeque;

/// Distance in world units above which a reconcile is logged
const DIVERGENCE_LOG_THRESHOLD: f32 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub input: PlayerInput,
    pub dt: f32,
}

#[derive(Debug, Clone)]
pub struct ClientPrediction {
    history: VecDeque<InputRecord>,
    capacity: usize,
    last_authoritative: Option<PlayerView>,
}

impl ClientPrediction {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            last_authoritative: None,
        }
    }

    /// Records an input that has just been applied locally
    pub fn predict(&mut self, input: PlayerInput, dt: f32) {
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(InputRecord { input, dt });
    }

    /// Accepts the server's view of the local player
    ///
    /// Stores the view and performs no correction.
    pub fn reconcile(&mut self, server_view: PlayerView) {
        let reported = self
            .history
            .back()
            .and_then(|record| record.input.report.as_ref());

        if let Some(report) = reported {
            let distance = report
                .position
                .iter()
                .zip(server_view.position.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();

            if distance > DIVERGENCE_LOG_THRESHOLD {
                debug!(
                    "Server view of {} differs from local prediction by {:.2} units",
                    server_view.id, distance
                );
            }
        }

        self.last_authoritative = Some(server_view);
    }

    pub fn last_authoritative(&self) -> Option<&PlayerView> {
        self.last_authoritative.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &InputRecord> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_authoritative = None;
    }
}

impl Default for ClientPrediction {
    fn default() -> Self {
        Self::new(INPUT_HISTORY_CAPACITY)
    }
}
