//! Persisted per-resource state
//!
//! A [`StateStore`] maps `(resource, key)` to a JSON value and commits
//! batches of writes atomically. [`StateDict`] is one resource's view of
//! the store; all writes go through an explicit [`Transaction`] handle that
//! writes nothing unless it is committed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::types::{Config, Field, LIFECYCLE, Lifecycle};

/// One write inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Set a key to a value
    Set { key: String, value: Value },
    /// Remove a key
    Remove { key: String },
    /// Remove every key recorded for the resource
    Clear,
}

/// Transactional key-value persistence for resource state.
///
/// Implementations must apply all ops passed to one `commit` call
/// atomically and in order.
pub trait StateStore: Send + Sync {
    /// Read one recorded value
    fn read(&self, resource: &str, key: &str) -> Result<Option<Value>>;

    /// Read every recorded key for a resource
    fn read_all(&self, resource: &str) -> Result<Config>;

    /// Apply a batch of writes all-or-nothing
    fn commit(&self, resource: &str, ops: &[WriteOp]) -> Result<()>;

    /// Names of resources with at least one recorded key
    fn resources(&self) -> Result<Vec<String>>;
}

/// In-memory store, for tests and throwaway deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Config>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Config>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStore {
    fn read(&self, resource: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .lock()
            .get(resource)
            .and_then(|attrs| attrs.get(key))
            .cloned())
    }

    fn read_all(&self, resource: &str) -> Result<Config> {
        Ok(self.lock().get(resource).cloned().unwrap_or_default())
    }

    fn commit(&self, resource: &str, ops: &[WriteOp]) -> Result<()> {
        let mut data = self.lock();
        // Apply to a copy so the batch lands in one step
        let mut attrs = data.get(resource).cloned().unwrap_or_default();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    attrs.insert(key.clone(), value.clone());
                }
                WriteOp::Remove { key } => {
                    attrs.remove(key);
                }
                WriteOp::Clear => attrs.clear(),
            }
        }
        if attrs.is_empty() {
            data.remove(resource);
        } else {
            data.insert(resource.to_string(), attrs);
        }
        Ok(())
    }

    fn resources(&self) -> Result<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }
}

/// One resource's recorded state
#[derive(Clone)]
pub struct StateDict {
    store: Arc<dyn StateStore>,
    resource: String,
}

impl StateDict {
    pub fn new(store: Arc<dyn StateStore>, resource: impl Into<String>) -> Self {
        Self {
            store,
            resource: resource.into(),
        }
    }

    /// Name of the resource this dict belongs to
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.read(&self.resource, key)
    }

    pub fn get_field<T: DeserializeOwned>(&self, field: &Field<T>) -> Result<Option<T>> {
        let value = self.get(field.key())?;
        field.decode(value.as_ref())
    }

    /// Read a field, falling back to a default when unset
    pub fn get_or<T: DeserializeOwned>(&self, field: &Field<T>, default: T) -> Result<T> {
        Ok(self.get_field(field)?.unwrap_or(default))
    }

    /// All recorded keys
    pub fn snapshot(&self) -> Result<Config> {
        self.store.read_all(&self.resource)
    }

    pub fn lifecycle(&self) -> Result<Lifecycle> {
        self.get_or(&LIFECYCLE, Lifecycle::Missing)
    }

    /// Start a write batch
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            dict: self,
            ops: Vec::new(),
        }
    }
}

impl fmt::Debug for StateDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDict")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// A pending batch of writes against one [`StateDict`].
///
/// Dropping the transaction without calling [`Transaction::commit`]
/// discards every write, so an early return or a panic between the
/// provider call and the commit leaves recorded state untouched.
#[must_use = "a transaction writes nothing until it is committed"]
pub struct Transaction<'a> {
    dict: &'a StateDict,
    ops: Vec<WriteOp>,
}

impl Transaction<'_> {
    pub fn set(&mut self, key: &str, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Set {
            key: key.to_string(),
            value,
        });
        self
    }

    /// Set a typed field
    pub fn set_field<T: Serialize>(&mut self, field: &Field<T>, value: &T) -> Result<&mut Self> {
        let value = field.encode(value)?;
        Ok(self.set(field.key(), value))
    }

    /// Set or remove a typed field depending on `value`
    pub fn put_field<T: Serialize>(
        &mut self,
        field: &Field<T>,
        value: Option<&T>,
    ) -> Result<&mut Self> {
        match value {
            Some(v) => self.set_field(field, v),
            None => Ok(self.remove(field.key())),
        }
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.ops.push(WriteOp::Remove {
            key: key.to_string(),
        });
        self
    }

    /// Remove every recorded key, the lifecycle tag included
    pub fn clear(&mut self) -> &mut Self {
        self.ops.push(WriteOp::Clear);
        self
    }

    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) -> Result<&mut Self> {
        self.set_field(&LIFECYCLE, &lifecycle)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every write atomically
    pub fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        log::debug!(
            "{}: committing {} state write(s)",
            self.dict.resource,
            self.ops.len()
        );
        self.dict.store.commit(&self.dict.resource, &self.ops)
    }
}
