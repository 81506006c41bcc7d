//! # Provision
//!
//! Declared cloud resources converged one field handler at a time.
//!
//! Each resource kind in [`resource`] maps a declared definition to
//! provider calls made through the client traits in [`provider`], with
//! state recorded in a [`statedb::SqliteStore`] shared by the whole
//! [`deployment::Deployment`]. Planning, ordering, and resumption are
//! handled by the [`declarative`] engine.
//!
//! ```no_run
//! use declarative::{CreateOptions, Resource};
//! use provision::config::DeploymentFile;
//! use provision::deployment::Deployment;
//! use provision::resource::RandomString;
//! use std::path::Path;
//!
//! let file = DeploymentFile::load(Path::new("deploy.toml"))?;
//! let deployment = Deployment::open(&file)?;
//! let mut ctx = deployment.context();
//!
//! let mut secret = RandomString::new(deployment.state("secret"));
//! if let Some(desired) = file.definition("secret") {
//!     secret.create(desired, CreateOptions::default(), &mut ctx)?;
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod deployment;
pub mod provider;
pub mod resource;

pub use config::DeploymentFile;
pub use deployment::{Deployment, StoreResolver};
