//! Assertion handle passed to every scenario.

use serde::Serialize;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionRecord {
    /// Position within the scenario, starting at 1
    pub index: usize,

    /// Whether the assertion held
    pub passed: bool,

    /// Message supplied by the scenario
    pub message: String,

    /// Expected/actual rendering for failed comparisons
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Receives assertions as they are made.
///
/// Middleware attaches observers to turn assertions into report output.
pub trait AssertionObserver: Send + Sync {
    /// Called once per assertion, in order.
    fn on_assertion(&self, scenario: &str, record: &AssertionRecord);
}

#[derive(Default)]
struct AssertionLog {
    records: Vec<AssertionRecord>,
    observers: Vec<Arc<dyn AssertionObserver>>,
}

/// Records pass/fail assertions for one scenario.
///
/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct Assertions {
    scenario: Arc<str>,
    log: Arc<Mutex<AssertionLog>>,
}

impl Assertions {
    /// Creates an empty handle for `scenario`.
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: Arc::from(scenario),
            log: Arc::new(Mutex::new(AssertionLog::default())),
        }
    }

    fn log(&self) -> MutexGuard<'_, AssertionLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches an observer for subsequent assertions.
    pub fn observe(&self, observer: Arc<dyn AssertionObserver>) {
        self.log().observers.push(observer);
    }

    fn record(&self, passed: bool, message: &str, detail: Option<String>) -> bool {
        let (record, observers) = {
            let mut log = self.log();
            let record = AssertionRecord {
                index: log.records.len() + 1,
                passed,
                message: message.to_string(),
                detail,
            };
            log.records.push(record.clone());
            (record, log.observers.clone())
        };
        for observer in observers {
            observer.on_assertion(&self.scenario, &record);
        }
        passed
    }

    /// Records an unconditional pass.
    pub fn pass(&self, message: &str) -> bool {
        self.record(true, message, None)
    }

    /// Records an unconditional failure.
    pub fn fail(&self, message: &str) -> bool {
        self.record(false, message, None)
    }

    /// Passes if `condition` holds.
    pub fn ok(&self, condition: bool, message: &str) -> bool {
        self.record(condition, message, None)
    }

    /// Passes if `actual == expected`.
    pub fn equal<T: PartialEq + Debug>(&self, actual: T, expected: T, message: &str) -> bool {
        if actual == expected {
            self.record(true, message, None)
        } else {
            let detail = format!("expected: {:?}, actual: {:?}", expected, actual);
            self.record(false, message, Some(detail))
        }
    }

    /// Passes if `actual != unexpected`.
    pub fn not_equal<T: PartialEq + Debug>(&self, actual: T, unexpected: T, message: &str) -> bool {
        if actual != unexpected {
            self.record(true, message, None)
        } else {
            let detail = format!("expected anything but: {:?}", unexpected);
            self.record(false, message, Some(detail))
        }
    }

    /// Returns a copy of all records so far.
    pub fn records(&self) -> Vec<AssertionRecord> {
        self.log().records.clone()
    }

    /// Returns the number of failed assertions.
    pub fn failures(&self) -> usize {
        self.log().records.iter().filter(|r| !r.passed).count()
    }

    /// Returns the scenario name.
    pub fn scenario(&self) -> &str {
        &self.scenario
    }
}
