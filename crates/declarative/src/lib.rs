//! # Declarative
//!
//! A diff and reconciliation engine for declared infrastructure resources.
//!
//! Given a resource's desired configuration and its previously recorded
//! state, the engine computes the minimal ordered set of field handlers
//! that must run to converge the real resource, runs them one at a time,
//! and persists state transactionally so an interrupted pass can be
//! re-driven.
//!
//! ## Core Concepts
//!
//! - **Handler**: one independently convergeable slice of a resource's
//!   configuration, owning a set of keys and running after declared
//!   predecessors
//! - **Schedule**: the validated dependency graph of a handler set, in
//!   stable topological order
//! - **Diff / Plan**: the ordered dirty handlers for one pass, computed
//!   without side effects
//! - **StateDict**: a resource's recorded keys, written through explicit
//!   transactions
//! - **Lifecycle**: `MISSING` → `STARTING` → `UP`
//!
//! ## Example
//!
//! ```
//! use declarative::{Config, Handler, plan};
//! use serde_json::json;
//!
//! let handlers = vec![
//!     Handler::new("create-subnet", &["zone", "cidrBlock", "vpcId"], ()),
//!     Handler::new("map-public-ip-on-launch", &["mapPublicIpOnLaunch"], ())
//!         .after("create-subnet"),
//! ];
//!
//! let desired = Config::from([
//!     ("vpcId".to_string(), json!("vpc-1")),
//!     ("cidrBlock".to_string(), json!("10.0.0.0/24")),
//!     ("zone".to_string(), json!("a")),
//! ]);
//!
//! let plan = plan("web", &desired, &Config::new(), &handlers, &["subnetId"])?;
//! assert_eq!(plan.handler_names(), vec!["create-subnet"]);
//! # Ok::<(), declarative::Error>(())
//! ```
//!
//! ## Collaborators
//!
//! The engine never talks to a provider itself. Resources receive:
//!
//! - [`StateStore`]: transactional persistence of recorded state
//! - [`ReferenceResolver`]: lookup of other resources' recorded attributes
//! - [`ProgressCallback`] / [`ConfirmCallback`]: operator interaction
//! - [`CancelToken`]: interruption of status polling

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handler;
pub mod poll;
pub mod reference;
pub mod resource;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, ConvergeContext, LogProgress, NoProgress,
    ProgressCallback,
};
pub use diff::{ChangeKind, Diff, DiffSummary, KeyChange, Plan, PlanStep, StepReason, plan};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::{execute, realize};
pub use graph::{Dirtiness, Schedule};
pub use handler::Handler;
pub use poll::{CancelToken, PollConfig, PollStatus, poll_until};
pub use reference::{NoReferences, ReferenceResolver, ResourceRef};
pub use resource::{Convergent, Resource};
pub use state::{MemoryStore, StateDict, StateStore, Transaction, WriteOp};
pub use types::{
    Config, CreateOptions, ExecuteSummary, Field, LIFECYCLE, LIFECYCLE_KEY, Lifecycle,
    ResourceInfo, from_config, to_config,
};
