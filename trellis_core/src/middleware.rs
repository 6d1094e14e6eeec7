//! Middleware: ordered wrappers around scenario execution.
//!
//! `combine(vec![a, b])` gives onion ordering: `a.before`, `b.before`,
//! scenario body, `b.after`, `a.after`. A wrapper may rewrite the
//! provisioning policy, observe assertions and annotate the outcome, but a
//! chain never lets a failing outcome come back out as `Passed`.

use crate::assertions::{AssertionObserver, AssertionRecord, Assertions};
use crate::error::HarnessResult;
use crate::orchestrator::ExecutionSummary;
use crate::player::ProvisioningPolicy;
use crate::scenario::{scenario_fn, ScenarioFn};

use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Result of one scenario as seen by middleware and the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// Body returned Ok and every assertion held
    Passed,
    /// Body returned Ok but at least one assertion failed
    Failed {
        /// Summary of the failure
        reason: String,
    },
    /// Body returned an error, panicked, timed out, or middleware rejected it
    Errored {
        /// The error
        reason: String,
    },
}

impl ScenarioOutcome {
    /// Returns true for `Passed`.
    pub fn is_passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed)
    }

    /// Returns the failure or error reason.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ScenarioOutcome::Passed => None,
            ScenarioOutcome::Failed { reason } | ScenarioOutcome::Errored { reason } => Some(reason.as_str()),
        }
    }
}

/// Per-scenario state threaded through the middleware hooks.
pub struct ScenarioRun {
    /// Scenario name
    pub name: String,

    /// Position in registration order, starting at 0
    pub index: usize,

    /// Policy applied to every player the scenario spawns
    pub policy: ProvisioningPolicy,

    /// Assertion handle the scenario will receive
    pub assertions: Assertions,

    /// Body the orchestrator invokes; a `before` hook may wrap or replace it
    pub body: ScenarioFn,
}

impl ScenarioRun {
    /// Creates the run state for a scenario with an empty body.
    pub fn new(name: &str, index: usize) -> Self {
        Self {
            name: name.to_string(),
            index,
            policy: ProvisioningPolicy::default(),
            assertions: Assertions::new(name),
            body: scenario_fn(|_ctx, _t| async { Ok(()) }),
        }
    }

    /// Sets the scenario body.
    pub fn with_body(mut self, body: ScenarioFn) -> Self {
        self.body = body;
        self
    }
}

/// A wrapper around scenario execution.
///
/// `before` may reject the run or wrap `run.body` before it is invoked.
/// If `before` fails, the scenario is recorded as errored and this
/// middleware's `after` is not called.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &str;

    /// Runs before the scenario body, outer to inner.
    async fn before(&self, _run: &mut ScenarioRun) -> HarnessResult<()> {
        Ok(())
    }

    /// Runs after the scenario settled, inner to outer.
    async fn after(&self, _run: &ScenarioRun, outcome: ScenarioOutcome) -> ScenarioOutcome {
        outcome
    }

    /// Runs once after every scenario finished.
    fn on_summary(&self, _summary: &ExecutionSummary) {}
}

/// Ordered middleware, itself a `Middleware` so chains nest.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

/// Composes wrappers; the first one is outermost.
pub fn combine(layers: Vec<Arc<dyn Middleware>>) -> MiddlewareChain {
    MiddlewareChain { layers }
}

impl MiddlewareChain {
    /// Returns the number of wrappers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if the chain has no wrappers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    async fn unwind(&self, entered: usize, run: &ScenarioRun, mut outcome: ScenarioOutcome) -> ScenarioOutcome {
        for layer in self.layers[..entered].iter().rev() {
            let failed = !outcome.is_passed();
            let next = layer.after(run, outcome.clone()).await;
            outcome = if failed && next.is_passed() {
                warn!("Middleware {} tried to clear failure of {}; keeping it", layer.name(), run.name);
                outcome
            } else {
                next
            };
        }
        outcome
    }
}

#[async_trait]
impl Middleware for MiddlewareChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn before(&self, run: &mut ScenarioRun) -> HarnessResult<()> {
        for (entered, layer) in self.layers.iter().enumerate() {
            if let Err(e) = layer.before(run).await {
                // Inner layers never ran; unwind the ones that did
                let outcome = ScenarioOutcome::Errored { reason: e.to_string() };
                self.unwind(entered, run, outcome).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn after(&self, run: &ScenarioRun, outcome: ScenarioOutcome) -> ScenarioOutcome {
        self.unwind(self.layers.len(), run, outcome).await
    }

    fn on_summary(&self, summary: &ExecutionSummary) {
        for layer in &self.layers {
            layer.on_summary(summary);
        }
    }
}

/// Forces every player onto the isolated local transport.
pub struct NetworkIsolation;

/// Returns the network-isolation middleware.
pub fn local_only() -> Arc<dyn Middleware> {
    Arc::new(NetworkIsolation)
}

#[async_trait]
impl Middleware for NetworkIsolation {
    fn name(&self) -> &str {
        "local_only"
    }

    async fn before(&self, run: &mut ScenarioRun) -> HarnessResult<()> {
        run.policy.force_local_only = true;
        Ok(())
    }
}

struct TapState {
    writer: Box<dyn Write + Send>,
    emitted: usize,
    failed: usize,
    started: bool,
}

impl TapState {
    fn line(&mut self, text: &str) {
        if !self.started {
            self.started = true;
            self.line("TAP version 13");
        }
        if let Err(e) = writeln!(self.writer, "{}", text) {
            warn!("TAP write failed: {}", e);
        }
    }

    fn test_point(&mut self, passed: bool, description: &str, detail: Option<&str>) {
        self.emitted += 1;
        if !passed {
            self.failed += 1;
        }
        let status = if passed { "ok" } else { "not ok" };
        let point = format!("{} {} {}", status, self.emitted, description);
        self.line(&point);
        if let Some(detail) = detail {
            self.line("  ---");
            self.line(&format!("  {}", detail));
            self.line("  ...");
        }
    }
}

fn lock(state: &Mutex<TapState>) -> MutexGuard<'_, TapState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reports each assertion as a TAP test point.
///
/// Scenario errors that happen outside an assertion (provisioning, rejected
/// calls, panics) are reported as an extra failing test point, so the TAP
/// stream fails whenever the run does.
pub struct ReportingAdapter {
    state: Arc<Mutex<TapState>>,
}

impl ReportingAdapter {
    /// Creates a reporter writing TAP to `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(TapState {
                writer: Box::new(writer),
                emitted: 0,
                failed: 0,
                started: false,
            })),
        }
    }

    /// Creates a reporter writing to stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Returns (test points emitted, failing test points).
    pub fn counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.emitted, state.failed)
    }
}

struct TapObserver {
    state: Arc<Mutex<TapState>>,
}

impl AssertionObserver for TapObserver {
    fn on_assertion(&self, _scenario: &str, record: &AssertionRecord) {
        lock(&self.state).test_point(record.passed, &record.message, record.detail.as_deref());
    }
}

#[async_trait]
impl Middleware for ReportingAdapter {
    fn name(&self) -> &str {
        "reporting"
    }

    async fn before(&self, run: &mut ScenarioRun) -> HarnessResult<()> {
        lock(&self.state).line(&format!("# {}", run.name));
        run.assertions.observe(Arc::new(TapObserver {
            state: Arc::clone(&self.state),
        }));
        Ok(())
    }

    async fn after(&self, run: &ScenarioRun, outcome: ScenarioOutcome) -> ScenarioOutcome {
        match &outcome {
            ScenarioOutcome::Passed => info!("✓ {} passed", run.name),
            ScenarioOutcome::Failed { reason } => error!("✗ {} failed: {}", run.name, reason),
            ScenarioOutcome::Errored { reason } => {
                error!("✗ {} errored: {}", run.name, reason);
                lock(&self.state).test_point(false, &format!("{} errored", run.name), Some(reason.as_str()));
            }
        }
        outcome
    }

    fn on_summary(&self, summary: &ExecutionSummary) {
        let mut state = lock(&self.state);
        let (emitted, failed) = (state.emitted, state.failed);
        state.line("");
        state.line(&format!("1..{}", emitted));
        state.line(&format!("# tests {}", emitted));
        state.line(&format!("# pass  {}", emitted - failed));
        if failed > 0 || !summary.all_passed() {
            state.line(&format!("# fail  {}", failed));
        } else {
            state.line("");
            state.line("# ok");
        }
    }
}
