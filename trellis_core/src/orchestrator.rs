//! Orchestrator - registers scenarios and runs them one after another.

use crate::assertions::{AssertionRecord, Assertions};
use crate::consistency::{ConsistencyStrategy, ConsistencyWaiter};
use crate::error::{HarnessError, HarnessResult};
use crate::middleware::{Middleware, MiddlewareChain, ScenarioOutcome, ScenarioRun};
use crate::player::Provisioner;
use crate::scenario::{scenario_fn, BoxFuture, ScenarioContext, ScenarioFn};

use serde::Serialize;
use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use trellis_env::{ConductorBackend, HarnessContext};

/// Orchestrator-wide settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How `consistency()` is satisfied
    pub consistency: ConsistencyStrategy,

    /// Bound on native consistency waits (None = unbounded)
    pub consistency_timeout: Option<Duration>,

    /// Bound on a whole scenario body (None = unbounded)
    pub scenario_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyStrategy::default(),
            consistency_timeout: None,
            scenario_timeout: None,
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub name: String,

    /// Position in registration order
    pub index: usize,

    /// Final outcome after middleware
    pub outcome: ScenarioOutcome,

    /// Every assertion the scenario made
    pub assertions: Vec<AssertionRecord>,

    /// Players shut down at teardown
    pub players_released: usize,

    /// Harness-clock time spent, in milliseconds
    pub duration_ms: u64,
}

/// Results of a whole run, in registration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    /// One report per registered scenario
    pub scenarios: Vec<ScenarioReport>,
}

impl ExecutionSummary {
    /// Returns the number of scenarios run.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Returns true if nothing ran.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Returns the number of passed scenarios.
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.outcome.is_passed()).count()
    }

    /// Returns the number of failed or errored scenarios.
    pub fn failed(&self) -> usize {
        self.len() - self.passed()
    }

    /// Returns true if every scenario passed.
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// Process exit code: 0 when every scenario passed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Looks a report up by scenario name.
    pub fn report(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Writes the summary as pretty JSON.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

struct Registration {
    name: String,
    body: ScenarioFn,
}

/// Runs registered scenarios against a conductor backend.
///
/// # Usage
///
/// ```ignore
/// let mut orchestrator = Orchestrator::new(config, backend, context)?
///     .with_middleware(combine(vec![Arc::new(ReportingAdapter::stdout()), local_only()]));
///
/// orchestrator.register_scenario("echo", |s, t| async move {
///     let players = s.players(&[player_config.clone()]).await?;
///     // install, call, s.consistency().await?, assert...
///     Ok(())
/// })?;
///
/// let summary = orchestrator.run().await;
/// std::process::exit(summary.exit_code());
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    provisioner: Arc<Provisioner>,
    waiter: Arc<ConsistencyWaiter>,
    context: Arc<dyn HarnessContext>,
    middleware: MiddlewareChain,
    scenarios: Vec<Registration>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    /// `ConsistencyUnavailable` if the config asks for native consistency and
    /// the backend has no convergence signal.
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn ConductorBackend>,
        context: Arc<dyn HarnessContext>,
    ) -> HarnessResult<Self> {
        let waiter = ConsistencyWaiter::select(
            config.consistency,
            backend.as_ref(),
            Arc::clone(&context),
            config.consistency_timeout,
        )?;
        info!("Consistency mode: {:?}", waiter.mode());

        Ok(Self {
            config,
            provisioner: Arc::new(Provisioner::new(backend, Arc::clone(&context))),
            waiter: Arc::new(waiter),
            context,
            middleware: MiddlewareChain::default(),
            scenarios: Vec::new(),
        })
    }

    /// Sets the middleware chain.
    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Registers an async scenario body.
    ///
    /// # Errors
    /// `DuplicateRegistration` if `name` is taken.
    pub fn register_scenario<F, Fut>(&mut self, name: &str, body: F) -> HarnessResult<()>
    where
        F: Fn(ScenarioContext, Assertions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        self.register(name, scenario_fn(body))
    }

    /// Registers an already boxed scenario body.
    pub fn register(&mut self, name: &str, body: ScenarioFn) -> HarnessResult<()> {
        if self.scenarios.iter().any(|s| s.name == name) {
            return Err(HarnessError::DuplicateRegistration(name.to_string()));
        }
        self.scenarios.push(Registration {
            name: name.to_string(),
            body,
        });
        Ok(())
    }

    /// Returns registered names in run order.
    pub fn scenario_names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs every scenario in registration order, one at a time.
    pub async fn run(&self) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();

        for (index, registration) in self.scenarios.iter().enumerate() {
            info!("Starting scenario: {} ({}/{})", registration.name, index + 1, self.scenarios.len());
            let report = self.run_one(index, registration).await;
            summary.scenarios.push(report);
        }

        self.middleware.on_summary(&summary);

        if summary.all_passed() {
            info!("✅ All {} scenarios passed", summary.len());
        } else {
            error!("❌ {}/{} scenarios failed", summary.failed(), summary.len());
        }
        summary
    }

    async fn run_one(&self, index: usize, registration: &Registration) -> ScenarioReport {
        let started = self.context.now();
        let mut run = ScenarioRun::new(&registration.name, index).with_body(Arc::clone(&registration.body));
        let mut players_released = 0;

        let outcome = match self.middleware.before(&mut run).await {
            Err(e) => {
                warn!("{} rejected by middleware: {}", registration.name, e);
                ScenarioOutcome::Errored { reason: e.to_string() }
            }
            Ok(()) => {
                let ctx = ScenarioContext::new(
                    &registration.name,
                    Arc::clone(&self.provisioner),
                    Arc::clone(&self.waiter),
                    run.policy.clone(),
                );
                let body = (run.body)(ctx.clone(), run.assertions.clone());
                let settled = self.execute(body).await;
                players_released = ctx.teardown().await;
                let outcome = classify(settled, &run.assertions);
                self.middleware.after(&run, outcome).await
            }
        };

        ScenarioReport {
            name: registration.name.clone(),
            index,
            outcome,
            assertions: run.assertions.records(),
            players_released,
            duration_ms: self.context.now().saturating_sub(started).as_millis() as u64,
        }
    }

    /// Runs a body on its own task so panics and timeouts stay inside this scenario.
    async fn execute(&self, body: BoxFuture<HarnessResult<()>>) -> HarnessResult<()> {
        let mut handle = tokio::spawn(body);

        let joined = match self.config.scenario_timeout {
            Some(bound) => match tokio::time::timeout(bound, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(HarnessError::ScenarioTimeout(bound.as_millis() as u64));
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| Err(panic_error(e)))
    }
}

fn panic_error(e: JoinError) -> HarnessError {
    if !e.is_panic() {
        return HarnessError::ScenarioPanicked("task cancelled".to_string());
    }
    let panic = e.into_panic();
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    HarnessError::ScenarioPanicked(reason)
}

fn classify(settled: HarnessResult<()>, assertions: &Assertions) -> ScenarioOutcome {
    match settled {
        Err(e) => ScenarioOutcome::Errored { reason: e.to_string() },
        Ok(()) => match assertions.failures() {
            0 => ScenarioOutcome::Passed,
            failed => ScenarioOutcome::Failed {
                reason: format!("{} of {} assertions failed", failed, assertions.records().len()),
            },
        },
    }
}
