//! Execution engine - runs planned handlers in order

use crate::context::ConvergeContext;
use crate::diff::Plan;
use crate::error::Result;
use crate::resource::Convergent;
use crate::types::{Config, CreateOptions, ExecuteSummary, Lifecycle};

/// Run every step of `plan` against `resource`.
///
/// Handlers run sequentially because later handlers read state written by
/// earlier ones. The first error stops execution; handlers that already
/// committed their state stay committed, so the next plan resumes after
/// them.
pub fn execute<R: Convergent>(
    resource: &mut R,
    plan: &Plan,
    options: &CreateOptions,
    ctx: &mut ConvergeContext,
) -> Result<ExecuteSummary> {
    let mut summary = ExecuteSummary::default();

    for step in &plan.steps {
        let action = *resource.handlers()[step.index].action();
        ctx.progress.on_step_start(&plan.resource, step);
        resource.apply(action, options, ctx)?;
        ctx.progress.on_step_complete(&plan.resource, step);
        summary.executed.push(step.handler.to_string());
    }

    Ok(summary)
}

/// Drive one convergence pass through the resource lifecycle.
///
/// * `STARTING` - resume the outstanding operation; nothing is planned
/// * `MISSING` / `UP` - plan, then execute the dirty handlers
pub fn realize<R: Convergent>(
    resource: &mut R,
    desired: &Config,
    options: &CreateOptions,
    ctx: &mut ConvergeContext,
) -> Result<ExecuteSummary> {
    let name = resource.state().resource().to_string();

    if resource.state().lifecycle()? == Lifecycle::Starting {
        log::info!("{name}: resuming operation in progress");
        resource.resume(ctx)?;
        return Ok(ExecuteSummary {
            executed: Vec::new(),
            resumed: true,
        });
    }

    let plan = resource.plan(desired)?;
    ctx.progress.on_plan(&plan);
    execute(resource, &plan, options, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProgressCallback;
    use crate::diff::PlanStep;
    use crate::error::{Error, ProviderError};
    use crate::handler::Handler;
    use crate::state::{MemoryStore, StateDict};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Create,
        Flag,
    }

    struct Fake {
        handlers: Vec<Handler<Step>>,
        state: StateDict,
        desired: Config,
        fail_flag: bool,
        resumed: usize,
    }

    impl Fake {
        fn new() -> Self {
            Self {
                handlers: vec![
                    Handler::new("create", &["cidrBlock"], Step::Create),
                    Handler::new("flag", &["mapPublicIpOnLaunch"], Step::Flag).after("create"),
                ],
                state: StateDict::new(Arc::new(MemoryStore::new()), "fake"),
                desired: Config::new(),
                fail_flag: false,
                resumed: 0,
            }
        }

        fn record(&self, key: &str) -> Result<()> {
            let mut tx = self.state.transaction();
            tx.set(key, self.desired.get(key).cloned().unwrap_or_default());
            tx.set_lifecycle(Lifecycle::Up)?;
            tx.commit()
        }
    }

    impl Convergent for Fake {
        type Action = Step;

        fn handlers(&self) -> &[Handler<Step>] {
            &self.handlers
        }

        fn reserved_keys(&self) -> &[&'static str] {
            &[]
        }

        fn state(&self) -> &StateDict {
            &self.state
        }

        fn apply(&mut self, action: Step, _: &CreateOptions, _: &mut ConvergeContext) -> Result<()> {
            match action {
                Step::Create => self.record("cidrBlock"),
                Step::Flag if self.fail_flag => Err(ProviderError::api("throttled").into()),
                Step::Flag => self.record("mapPublicIpOnLaunch"),
            }
        }

        fn resume(&mut self, _: &mut ConvergeContext) -> Result<()> {
            self.resumed += 1;
            let mut tx = self.state.transaction();
            tx.set_lifecycle(Lifecycle::Up)?;
            tx.commit()
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ProgressCallback for Recorder {
        fn on_plan(&mut self, plan: &Plan) {
            self.0.lock().unwrap().push(format!("plan:{}", plan.len()));
        }
        fn on_step_start(&mut self, _: &str, step: &PlanStep) {
            self.0.lock().unwrap().push(format!("start:{}", step.handler));
        }
        fn on_step_complete(&mut self, _: &str, step: &PlanStep) {
            self.0.lock().unwrap().push(format!("done:{}", step.handler));
        }
    }

    fn desired() -> Config {
        Config::from([
            ("cidrBlock".to_string(), json!("10.0.0.0/24")),
            ("mapPublicIpOnLaunch".to_string(), json!(true)),
        ])
    }

    #[test]
    fn test_realize_runs_plan_in_order() {
        let recorder = Recorder::default();
        let mut ctx = ConvergeContext::new().with_progress(recorder.clone());
        let mut fake = Fake::new();
        fake.desired = desired();

        let summary = realize(&mut fake, &desired(), &CreateOptions::default(), &mut ctx).unwrap();
        assert_eq!(summary.executed, vec!["create", "flag"]);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["plan:2", "start:create", "done:create", "start:flag", "done:flag"]
        );

        // Converged: a second pass does nothing
        let summary = realize(&mut fake, &desired(), &CreateOptions::default(), &mut ctx).unwrap();
        assert!(summary.is_noop());
    }

    #[test]
    fn test_failure_stops_and_next_pass_resumes() {
        let mut ctx = ConvergeContext::new();
        let mut fake = Fake::new();
        fake.desired = desired();
        fake.fail_flag = true;

        let err = realize(&mut fake, &desired(), &CreateOptions::default(), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(
            fake.plan(&desired()).unwrap().handler_names(),
            vec!["flag"]
        );

        fake.fail_flag = false;
        let summary = realize(&mut fake, &desired(), &CreateOptions::default(), &mut ctx).unwrap();
        assert_eq!(summary.executed, vec!["flag"]);
    }

    #[test]
    fn test_starting_resumes_without_planning() {
        let mut ctx = ConvergeContext::new();
        let mut fake = Fake::new();
        let mut tx = fake.state.transaction();
        tx.set_lifecycle(Lifecycle::Starting).unwrap();
        tx.commit().unwrap();

        let summary = realize(&mut fake, &desired(), &CreateOptions::default(), &mut ctx).unwrap();
        assert!(summary.resumed);
        assert!(summary.executed.is_empty());
        assert_eq!(fake.resumed, 1);
        assert_eq!(fake.state.lifecycle().unwrap(), Lifecycle::Up);
    }
}
