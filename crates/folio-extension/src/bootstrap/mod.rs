//! Start-up sequencing.
//!
//! A [`Pipeline`] is an ordered list of named [`BootstrapStep`]s run once,
//! one after another, against a shared [`BootstrapContext`]. A step may
//! halt the pipeline on purpose (for example after redirecting to the
//! install wizard) or fail, which aborts it and redirects to the error route.

pub mod steps;

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{Capabilities, HostState};
use crate::error::ExtensionError;
use crate::loader::LoadReport;

/// Route shown after a failed bootstrap, unless configured otherwise.
pub const DEFAULT_ERROR_ROUTE: &str = "/error";

/// What a step wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halt,
}

#[async_trait]
pub trait BootstrapStep: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError>;
}

/// State threaded through every step of one application run.
#[derive(Debug)]
pub struct BootstrapContext {
    pub state: Arc<HostState>,
    pub caps: Capabilities,
    pub error_route: String,
    redirect: Option<String>,
    load_report: Option<LoadReport>,
}

impl BootstrapContext {
    /// The capability surface is built here, once, and shared by every step.
    pub fn new(state: Arc<HostState>) -> Self {
        let caps = state.capabilities();
        Self {
            state,
            caps,
            error_route: DEFAULT_ERROR_ROUTE.to_string(),
            redirect: None,
            load_report: None,
        }
    }

    pub fn with_error_route(mut self, route: impl Into<String>) -> Self {
        self.error_route = route.into();
        self
    }

    pub fn redirect_to(&mut self, path: impl Into<String>) {
        let path = path.into();
        tracing::info!(to = %path, "redirecting");
        self.redirect = Some(path);
    }

    /// Where the application should navigate instead of the requested page.
    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn set_load_report(&mut self, report: LoadReport) {
        self.load_report = Some(report);
    }

    pub fn load_report(&self) -> Option<&LoadReport> {
        self.load_report.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(usize),
    Halted(usize),
    Aborted(usize),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Complete,
    Halted { step: String },
    Aborted { step: String, error: String },
}

/// Ordered bootstrap steps, run at most once.
pub struct Pipeline {
    steps: Vec<Box<dyn BootstrapStep>>,
    state: PipelineState,
    outcome: Option<PipelineOutcome>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            state: PipelineState::Pending,
            outcome: None,
        }
    }

    pub fn step(mut self, step: impl BootstrapStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run every step in order until one halts or fails.
    ///
    /// A second call does not re-run anything; it returns the first outcome.
    pub async fn run(&mut self, ctx: &mut BootstrapContext) -> PipelineOutcome {
        if let Some(outcome) = &self.outcome {
            tracing::warn!("bootstrap pipeline already ran");
            return outcome.clone();
        }

        let outcome = self.run_steps(ctx).await;
        self.outcome = Some(outcome.clone());
        outcome
    }

    async fn run_steps(&mut self, ctx: &mut BootstrapContext) -> PipelineOutcome {
        for (index, step) in self.steps.iter().enumerate() {
            self.state = PipelineState::Running(index);
            let name = step.name().to_string();
            tracing::debug!(step = %name, index, "running bootstrap step");

            match step.run(ctx).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Halt) => {
                    tracing::info!(step = %name, "bootstrap halted");
                    self.state = PipelineState::Halted(index);
                    return PipelineOutcome::Halted { step: name };
                }
                Err(e) => {
                    tracing::error!(step = %name, "bootstrap step failed: {e}");
                    let error_route = ctx.error_route.clone();
                    ctx.redirect_to(error_route);
                    self.state = PipelineState::Aborted(index);
                    return PipelineOutcome::Aborted {
                        step: name,
                        error: e.to_string(),
                    };
                }
            }
        }

        self.state = PipelineState::Complete;
        tracing::info!(steps = self.steps.len(), "bootstrap complete");
        PipelineOutcome::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records its name into a shared log and returns a fixed result.
    struct Scripted {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        result: fn() -> Result<StepOutcome, ExtensionError>,
    }

    #[async_trait]
    impl BootstrapStep for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
            self.log.lock().unwrap().push(self.name);
            (self.result)()
        }
    }

    fn ok() -> Result<StepOutcome, ExtensionError> {
        Ok(StepOutcome::Continue)
    }

    fn halt() -> Result<StepOutcome, ExtensionError> {
        Ok(StepOutcome::Halt)
    }

    fn fail() -> Result<StepOutcome, ExtensionError> {
        Err(ExtensionError::step("settings", "backend unreachable"))
    }

    fn context() -> BootstrapContext {
        BootstrapContext::new(Arc::new(HostState::new(vec![]).unwrap()))
    }

    fn pipeline(
        script: &[(&'static str, fn() -> Result<StepOutcome, ExtensionError>)],
    ) -> (Pipeline, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        for &(name, result) in script {
            pipeline = pipeline.step(Scripted {
                name,
                log: Arc::clone(&log),
                result,
            });
        }
        (pipeline, log)
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (mut pipeline, log) = pipeline(&[("one", ok), ("two", ok), ("three", ok)]);
        assert_eq!(pipeline.state(), PipelineState::Pending);

        let mut ctx = context();
        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Complete);
        assert_eq!(*log.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(pipeline.state(), PipelineState::Complete);
        assert!(ctx.redirect().is_none());
    }

    #[tokio::test]
    async fn test_halt_stops_without_error_route() {
        let (mut pipeline, log) = pipeline(&[("one", ok), ("two", halt), ("three", ok)]);
        let mut ctx = context();

        let outcome = pipeline.run(&mut ctx).await;
        assert_eq!(outcome, PipelineOutcome::Halted { step: "two".into() });
        assert_eq!(*log.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(pipeline.state(), PipelineState::Halted(1));
        assert!(ctx.redirect().is_none());
    }

    #[tokio::test]
    async fn test_failure_aborts_and_redirects() {
        let (mut pipeline, log) = pipeline(&[("one", fail), ("two", ok)]);
        let mut ctx = context();

        let outcome = pipeline.run(&mut ctx).await;
        match outcome {
            PipelineOutcome::Aborted { step, error } => {
                assert_eq!(step, "one");
                assert!(error.contains("backend unreachable"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["one"]);
        assert_eq!(pipeline.state(), PipelineState::Aborted(0));
        assert_eq!(ctx.redirect(), Some("/error"));
    }

    #[tokio::test]
    async fn test_custom_error_route() {
        let (mut pipeline, _log) = pipeline(&[("one", fail)]);
        let mut ctx = context().with_error_route("/oops");
        pipeline.run(&mut ctx).await;
        assert_eq!(ctx.redirect(), Some("/oops"));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let (mut pipeline, log) = pipeline(&[("one", ok)]);
        let mut ctx = context();
        pipeline.run(&mut ctx).await;
        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Complete);
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
