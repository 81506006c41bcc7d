//! Resource traits for declarative state management
//!
//! A resource is one declared unit of infrastructure with a provider-side
//! representation and a persisted local record. [`Resource`] is the
//! surface the deployment layer drives; [`Convergent`] is what a resource
//! implements to let the engine plan and run its field handlers.

use std::collections::BTreeSet;
use std::fmt;

use crate::context::ConvergeContext;
use crate::diff::{Diff, Plan};
use crate::error::Result;
use crate::handler::Handler;
use crate::state::StateDict;
use crate::types::{Config, CreateOptions, Lifecycle, ResourceInfo};

/// Core trait for declared resources
///
/// # Example
///
/// ```ignore
/// let mut subnet = VpcSubnet::new("web", state, connector);
/// subnet.create(&desired, CreateOptions::default(), &mut ctx)?;
/// assert_eq!(subnet.lifecycle()?, Lifecycle::Up);
/// ```
pub trait Resource: Send + fmt::Debug {
    /// Name of the resource within its deployment
    fn name(&self) -> &str;

    /// Resource type, e.g. "vpc-subnet"
    fn resource_type(&self) -> &'static str;

    /// Type string for display, may include placement details
    fn show_type(&self) -> String {
        self.resource_type().to_string()
    }

    /// Provider-assigned identifier, if the resource exists
    fn resource_id(&self) -> Result<Option<String>>;

    fn lifecycle(&self) -> Result<Lifecycle>;

    /// Resources that must be created before this one
    fn create_after(&self, resources: &[ResourceInfo], desired: &Config) -> BTreeSet<String> {
        let _ = (resources, desired);
        BTreeSet::new()
    }

    /// Converge the resource to `desired`.
    fn create(
        &mut self,
        desired: &Config,
        options: CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()>;

    /// Remove the resource. Returns `false` if the operator declined.
    fn destroy(&mut self, wipe: bool, ctx: &mut ConvergeContext) -> Result<bool>;
}

/// A resource whose convergence is driven by field handlers.
pub trait Convergent {
    /// What a handler dispatches to
    type Action: Copy + fmt::Debug;

    /// Handlers in declaration order
    fn handlers(&self) -> &[Handler<Self::Action>];

    /// Keys never attributed to a handler
    fn reserved_keys(&self) -> &[&'static str];

    fn state(&self) -> &StateDict;

    /// Run one handler.
    ///
    /// Called only for handlers the plan marked dirty, strictly one at a
    /// time in plan order.
    fn apply(
        &mut self,
        action: Self::Action,
        options: &CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()>;

    /// Rediscover the outcome of an operation recorded as `STARTING`.
    fn resume(&mut self, ctx: &mut ConvergeContext) -> Result<()> {
        let _ = ctx;
        Err(crate::error::Error::UnexpectedState {
            resource: self.state().resource().to_string(),
            state: Lifecycle::Starting.to_string(),
        })
    }

    /// Plan a convergence pass without side effects.
    fn plan(&self, desired: &Config) -> Result<Plan> {
        let recorded = self.state().snapshot()?;
        Diff::new(self.state().resource(), desired, &recorded, self.handlers())
            .with_reserved_keys(self.reserved_keys())
            .plan()
    }
}
