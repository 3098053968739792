use anyhow::{anyhow, Result};
use std::collections::{HashSet, VecDeque};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::ClassLabels;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Replays a fixed sequence of per-frame detection lists.
///
/// Call N returns entry N of the script; once the script is exhausted every call returns
/// an empty list. Used to drive the control loop deterministically.
pub struct ScriptedBackend {
    script: VecDeque<Vec<Detection>>,
    labels: ClassLabels,
    calls: u64,
    failing_calls: HashSet<u64>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            labels: ClassLabels::default(),
            calls: 0,
            failing_calls: HashSet::new(),
        }
    }

    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Make the 1-based call `call` fail. The scripted entry for that call is consumed.
    pub fn fail_on_call(mut self, call: u64) -> Self {
        self.failing_calls.insert(call);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        let next = self.script.pop_front().unwrap_or_default();
        if self.failing_calls.contains(&self.calls) {
            return Err(anyhow!("scripted detector failure on call {}", self.calls));
        }
        Ok(next)
    }

    fn class_label(&self, class_id: u32) -> String {
        self.labels.resolve(class_id)
    }
}
