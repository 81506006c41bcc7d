//! Convergence context and callback traits
//!
//! These traits let resources report progress, ask for confirmation and
//! resolve references without depending on a particular UI or deployment
//! implementation.

use anyhow::Result as AnyResult;
use std::sync::Arc;

use crate::diff::{Plan, PlanStep};
use crate::poll::{CancelToken, PollConfig};
use crate::reference::{NoReferences, ReferenceResolver};

/// Progress callback for convergence passes
pub trait ProgressCallback: Send {
    /// Called once a plan has been computed, before anything runs
    fn on_plan(&mut self, plan: &Plan);

    /// Called before a handler runs
    fn on_step_start(&mut self, resource: &str, step: &PlanStep);

    /// Called after a handler finished successfully
    fn on_step_complete(&mut self, resource: &str, step: &PlanStep);
}

/// Confirmation callback for destructive operations
pub trait ConfirmCallback: Send {
    /// Ask the operator to confirm an action
    ///
    /// # Returns
    /// `true` if the operator confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> AnyResult<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan(&mut self, _plan: &Plan) {}
    fn on_step_start(&mut self, _resource: &str, _step: &PlanStep) {}
    fn on_step_complete(&mut self, _resource: &str, _step: &PlanStep) {}
}

/// Progress callback that writes to the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_plan(&mut self, plan: &Plan) {
        if plan.is_empty() {
            log::debug!("{}: nothing to do", plan.resource);
            return;
        }
        log::info!(
            "{}: {} handler(s) to run: {}",
            plan.resource,
            plan.len(),
            plan.handler_names().join(", ")
        );
        for step in &plan.steps {
            for change in &step.changes {
                log::debug!("{}: [{}] {}", plan.resource, step.handler, change);
            }
        }
    }

    fn on_step_start(&mut self, resource: &str, step: &PlanStep) {
        log::debug!("{resource}: running {}", step.handler);
    }

    fn on_step_complete(&mut self, resource: &str, step: &PlanStep) {
        log::debug!("{resource}: {} done", step.handler);
    }
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> AnyResult<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> AnyResult<bool> {
        Ok(false)
    }
}

/// Collaborators available to a resource during `create` and `destroy`
pub struct ConvergeContext {
    pub progress: Box<dyn ProgressCallback>,
    pub confirm: Box<dyn ConfirmCallback>,
    pub resolver: Arc<dyn ReferenceResolver>,
    pub cancel: CancelToken,
    pub poll: PollConfig,
}

impl ConvergeContext {
    /// Logging progress, auto-confirm, no references
    pub fn new() -> Self {
        Self {
            progress: Box::new(LogProgress),
            confirm: Box::new(AutoConfirm),
            resolver: Arc::new(NoReferences),
            cancel: CancelToken::new(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressCallback + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_confirm(mut self, confirm: impl ConfirmCallback + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Ask for confirmation, treating callback failures as a refusal
    pub fn confirm(&mut self, prompt: &str) -> bool {
        match self.confirm.confirm(prompt) {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("confirmation failed: {e:#}");
                false
            }
        }
    }
}

impl Default for ConvergeContext {
    fn default() -> Self {
        Self::new()
    }
}
