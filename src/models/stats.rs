use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`, UTC.
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_licenses: i64,
    pub active_licenses: i64,
    pub by_plan: BTreeMap<String, i64>,
    pub active_devices: i64,
    /// Daily `activate` entries over the last 30 days, oldest first.
    pub recent_activations: Vec<DailyCount>,
}

/// Per-item outcome of a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem<T> {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItem<T>>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            items: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn push_ok(&mut self, input: impl Into<String>, value: T) {
        self.succeeded += 1;
        self.items.push(BatchItem {
            input: input.into(),
            result: Some(value),
            error: None,
        });
    }

    pub fn push_err(&mut self, input: impl Into<String>, error: impl Into<String>) {
        self.failed += 1;
        self.items.push(BatchItem {
            input: input.into(),
            result: None,
            error: Some(error.into()),
        });
    }
}
