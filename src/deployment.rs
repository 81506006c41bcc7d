//! One deployment's shared state and cross-resource lookups

use anyhow::{Context, Result};
use declarative::{
    ConvergeContext, Error, Lifecycle, ReferenceResolver, ResourceInfo, ResourceRef, StateDict,
    StateStore,
};
use serde_json::Value;
use statedb::SqliteStore;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DeploymentFile;

/// Resolves `res-<name>` references against recorded state
pub struct StoreResolver {
    store: Arc<dyn StateStore>,
    types: BTreeMap<String, String>,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn StateStore>, resources: &[ResourceInfo]) -> Self {
        Self {
            store,
            types: resources
                .iter()
                .map(|r| (r.name.clone(), r.resource_type.clone()))
                .collect(),
        }
    }
}

impl ReferenceResolver for StoreResolver {
    fn attribute(
        &self,
        reference: &ResourceRef,
        resource_type: &str,
        key: &str,
    ) -> declarative::Result<String> {
        let unresolved = |reason: String| Error::Unresolved {
            reference: reference.to_string(),
            reason,
        };

        match self.types.get(&reference.name) {
            None => return Err(unresolved("no such resource in this deployment".to_string())),
            Some(actual) if actual != resource_type => {
                return Err(unresolved(format!(
                    "it is a {actual}, expected a {resource_type}"
                )));
            }
            Some(_) => {}
        }

        let state = StateDict::new(self.store.clone(), reference.name.as_str());
        if state.lifecycle()? != Lifecycle::Up {
            return Err(unresolved("the resource is not up yet".to_string()));
        }

        let attribute = reference.attribute.as_deref().unwrap_or(key);
        match state.get(attribute)? {
            Some(Value::String(value)) => Ok(value),
            Some(value) if !value.is_null() => Ok(value.to_string()),
            _ => Err(unresolved(format!("no '{attribute}' recorded"))),
        }
    }
}

/// Shared state of all resources declared in one deployment file
pub struct Deployment {
    store: Arc<dyn StateStore>,
    resources: Vec<ResourceInfo>,
}

impl Deployment {
    /// Open the state database named by the deployment file
    pub fn open(file: &DeploymentFile) -> Result<Self> {
        let path = file.state_path()?;
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Could not open state database {}", path.display()))?;
        log::debug!("Using state database {}", path.display());
        Ok(Self::with_store(Arc::new(store), file.resource_infos()))
    }

    pub fn with_store(store: Arc<dyn StateStore>, resources: Vec<ResourceInfo>) -> Self {
        Self { store, resources }
    }

    /// Declared resources
    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    /// Recorded state of one resource
    pub fn state(&self, name: &str) -> StateDict {
        StateDict::new(self.store.clone(), name)
    }

    /// Resources with recorded state that are no longer declared
    pub fn orphans(&self) -> declarative::Result<Vec<String>> {
        Ok(self
            .store
            .resources()?
            .into_iter()
            .filter(|name| !self.resources.iter().any(|r| &r.name == name))
            .collect())
    }

    pub fn resolver(&self) -> Arc<dyn ReferenceResolver> {
        Arc::new(StoreResolver::new(self.store.clone(), &self.resources))
    }

    /// Convergence context resolving references within this deployment
    pub fn context(&self) -> ConvergeContext {
        ConvergeContext::new().with_resolver(self.resolver())
    }
}
