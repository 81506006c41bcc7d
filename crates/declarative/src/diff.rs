//! Diff computation: desired configuration vs recorded state
//!
//! Planning is pure. It reads the desired configuration, the recorded
//! state and the handler list, and returns the ordered handlers that must
//! run. Nothing is written and no provider is called, so a plan can be
//! shown before anything changes. Because executed handlers record the
//! keys they converged, re-planning after a partial run picks up where the
//! previous run stopped.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::{Dirtiness, Schedule};
use crate::handler::Handler;
use crate::types::Config;

/// How one key differs between recorded and desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    /// Not recorded yet, now desired
    Set,
    /// Recorded with a different value
    Update,
    /// Recorded, no longer desired
    Unset,
}

/// A single key difference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyChange {
    pub key: String,
    pub kind: ChangeKind,
    pub recorded: Option<Value>,
    pub desired: Option<Value>,
}

impl KeyChange {
    /// Compare one key. `null` and absent are the same thing.
    pub fn between(key: &str, recorded: Option<&Value>, desired: Option<&Value>) -> Option<Self> {
        let recorded = recorded.filter(|v| !v.is_null());
        let desired = desired.filter(|v| !v.is_null());

        let kind = match (recorded, desired) {
            (None, None) => return None,
            (None, Some(_)) => ChangeKind::Set,
            (Some(_), None) => ChangeKind::Unset,
            (Some(r), Some(d)) if r == d => return None,
            (Some(_), Some(_)) => ChangeKind::Update,
        };

        Some(Self {
            key: key.to_string(),
            kind,
            recorded: recorded.cloned(),
            desired: desired.cloned(),
        })
    }
}

impl fmt::Display for KeyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "-".to_string(), Value::to_string);
        let symbol = match self.kind {
            ChangeKind::Set => '+',
            ChangeKind::Update => '~',
            ChangeKind::Unset => '-',
        };
        write!(
            f,
            "{symbol} {}: {} => {}",
            self.key,
            show(&self.recorded),
            show(&self.desired)
        )
    }
}

/// Why a handler was scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepReason {
    /// One of its own keys changed
    Changed,
    /// A predecessor is being re-run
    Forced { by: String },
}

/// One handler to run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    /// Index into the resource's handler list
    pub index: usize,
    pub handler: &'static str,
    pub reason: StepReason,
    /// Changes to keys owned by this handler
    pub changes: Vec<KeyChange>,
}

/// Ordered sequence of dirty handlers for one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub resource: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.handler).collect()
    }

    pub fn contains(&self, handler: &str) -> bool {
        self.steps.iter().any(|s| s.handler == handler)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_plan(self)
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Keys recorded for the first time
    pub additions: usize,
    /// Keys whose value changes
    pub modifications: usize,
    /// Keys to drop
    pub removals: usize,
    /// Handlers re-run only because a predecessor runs
    pub forced: usize,
}

impl DiffSummary {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self::default();
        for step in &plan.steps {
            if matches!(step.reason, StepReason::Forced { .. }) {
                summary.forced += 1;
            }
            for change in &step.changes {
                match change.kind {
                    ChangeKind::Set => summary.additions += 1,
                    ChangeKind::Update => summary.modifications += 1,
                    ChangeKind::Unset => summary.removals += 1,
                }
            }
        }
        summary
    }

    /// Total number of key changes
    pub fn total(&self) -> usize {
        self.additions + self.modifications + self.removals
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0 || self.forced > 0
    }
}

/// Inputs of one planning call
pub struct Diff<'a, A> {
    resource: &'a str,
    desired: &'a Config,
    recorded: &'a Config,
    handlers: &'a [Handler<A>],
    reserved: &'a [&'a str],
}

impl<'a, A> Diff<'a, A> {
    pub fn new(
        resource: &'a str,
        desired: &'a Config,
        recorded: &'a Config,
        handlers: &'a [Handler<A>],
    ) -> Self {
        Self {
            resource,
            desired,
            recorded,
            handlers,
            reserved: &[],
        }
    }

    /// Keys that never belong to a handler and never make anything dirty
    pub fn with_reserved_keys(mut self, reserved: &'a [&'a str]) -> Self {
        self.reserved = reserved;
        self
    }

    fn is_reserved(&self, key: &str) -> bool {
        self.reserved.contains(&key)
    }

    /// Compute the ordered dirty handlers.
    pub fn plan(&self) -> Result<Plan> {
        let schedule = Schedule::build(self.handlers)?;
        self.check_ownership()?;

        let mut changes: Vec<Vec<KeyChange>> = Vec::with_capacity(self.handlers.len());
        let mut desired_any = Vec::with_capacity(self.handlers.len());
        for handler in self.handlers {
            let owned = handler.keys().iter().filter(|k| !self.is_reserved(k));
            let mut handler_changes = Vec::new();
            let mut wants_something = false;
            for key in owned {
                let desired = self.desired.get(*key);
                wants_something |= desired.is_some_and(|v| !v.is_null());
                if let Some(change) = KeyChange::between(key, self.recorded.get(*key), desired) {
                    handler_changes.push(change);
                }
            }
            changes.push(handler_changes);
            desired_any.push(wants_something);
        }

        let changed: Vec<bool> = changes.iter().map(|c| !c.is_empty()).collect();
        let dirtiness = schedule.propagate(&changed, &desired_any);

        let steps = schedule
            .order()
            .iter()
            .filter_map(|&i| {
                let reason = match dirtiness[i] {
                    Dirtiness::Clean => return None,
                    Dirtiness::Changed => StepReason::Changed,
                    Dirtiness::Forced { by } => StepReason::Forced { by: by.to_string() },
                };
                Some(PlanStep {
                    index: i,
                    handler: self.handlers[i].name(),
                    reason,
                    changes: std::mem::take(&mut changes[i]),
                })
            })
            .collect();

        Ok(Plan {
            resource: self.resource.to_string(),
            steps,
        })
    }

    /// Every non-reserved desired key must be owned by exactly one handler.
    fn check_ownership(&self) -> Result<()> {
        for key in self.desired.keys().filter(|k| !self.is_reserved(k)) {
            let mut owners = self.handlers.iter().filter(|h| h.owns(key));
            match (owners.next(), owners.next()) {
                (Some(_), None) => {}
                (None, _) => {
                    return Err(Error::UnownedKey {
                        resource: self.resource.to_string(),
                        key: key.clone(),
                    });
                }
                (Some(first), Some(second)) => {
                    return Err(Error::ConflictingOwnership {
                        key: key.clone(),
                        first: first.name().to_string(),
                        second: second.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Plan one convergence pass.
pub fn plan<A>(
    resource: &str,
    desired: &Config,
    recorded: &Config,
    handlers: &[Handler<A>],
    reserved: &[&str],
) -> Result<Plan> {
    Diff::new(resource, desired, recorded, handlers)
        .with_reserved_keys(reserved)
        .plan()
}
