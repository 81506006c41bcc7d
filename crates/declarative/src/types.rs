//! Core types for declarative resource management

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// Desired configuration or recorded state: camelCase key to JSON value.
pub type Config = BTreeMap<String, Value>;

/// Key under which the lifecycle tag is persisted.
pub const LIFECYCLE_KEY: &str = "state";

/// Coarse-grained status of a resource's remote existence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Never created, or destroyed
    #[default]
    Missing,
    /// A creation request was issued and its outcome is not yet known
    Starting,
    /// Converged and confirmed
    Up,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Starting => "starting",
            Self::Up => "up",
        };
        f.write_str(s)
    }
}

/// A statically declared persisted field.
///
/// Each resource kind keeps a table of these so the set of persisted keys
/// and their value types is fixed at compile time.
pub struct Field<T> {
    key: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            _type: PhantomData,
        }
    }

    pub const fn key(&self) -> &'static str {
        self.key
    }
}

impl<T: DeserializeOwned> Field<T> {
    /// Decode this field from a raw value; `null` decodes as absent.
    pub fn decode(&self, value: Option<&Value>) -> Result<Option<T>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }
}

impl<T: Serialize> Field<T> {
    pub fn encode(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(Error::from)
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.key)
    }
}

/// The persisted lifecycle tag.
pub const LIFECYCLE: Field<Lifecycle> = Field::new(LIFECYCLE_KEY);

/// Flags supplied by the orchestrator for one `create` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Verify recorded state against the provider before converging
    pub check: bool,
    /// Permit changes that reboot a machine
    pub allow_reboot: bool,
    /// Permit changes that destroy and recreate the resource
    pub allow_recreate: bool,
}

impl CreateOptions {
    pub fn allowing_recreate() -> Self {
        Self {
            allow_recreate: true,
            ..Self::default()
        }
    }
}

/// Summary of one convergence pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    /// Handlers executed, in order
    pub executed: Vec<String>,
    /// Whether an in-flight operation was resumed instead of planning
    pub resumed: bool,
}

impl ExecuteSummary {
    /// Total number of handlers that ran
    pub fn total_changes(&self) -> usize {
        self.executed.len()
    }

    /// Whether the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty() && !self.resumed
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.executed.extend(other.executed.iter().cloned());
        self.resumed |= other.resumed;
    }
}

/// Metadata about a declared resource, for cross-resource ordering
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceInfo {
    pub name: String,
    pub resource_type: String,
}

impl ResourceInfo {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Build a `Config` from a serializable definition.
///
/// Non-object values yield an empty configuration.
pub fn to_config<T: Serialize>(definition: &T) -> Result<Config> {
    match serde_json::to_value(definition)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(Config::new()),
    }
}

/// Parse a typed definition out of a `Config`.
pub fn from_config<T: DeserializeOwned>(resource: &str, config: &Config) -> Result<T> {
    let object: serde_json::Map<String, Value> =
        config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(Value::Object(object)).map_err(|source| Error::InvalidConfig {
        resource: resource.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_decode_null_as_absent() {
        let field: Field<String> = Field::new("subnetId");
        assert_eq!(field.decode(None).unwrap(), None);
        assert_eq!(field.decode(Some(&Value::Null)).unwrap(), None);
        assert_eq!(
            field.decode(Some(&json!("subnet-1"))).unwrap(),
            Some("subnet-1".to_string())
        );
        assert!(field.decode(Some(&json!(3))).is_err());
    }

    #[test]
    fn test_lifecycle_encoding() {
        assert_eq!(LIFECYCLE.encode(&Lifecycle::Starting).unwrap(), json!("starting"));
        assert_eq!(
            LIFECYCLE.decode(Some(&json!("up"))).unwrap(),
            Some(Lifecycle::Up)
        );
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Def {
        cidr_block: String,
        #[serde(default)]
        map_public_ip_on_launch: Option<bool>,
    }

    #[test]
    fn test_config_conversion() {
        let def = Def {
            cidr_block: "10.0.0.0/24".into(),
            map_public_ip_on_launch: None,
        };
        let config = to_config(&def).unwrap();
        assert_eq!(config.get("cidrBlock"), Some(&json!("10.0.0.0/24")));
        assert_eq!(config.get("mapPublicIpOnLaunch"), Some(&Value::Null));

        let back: Def = from_config("subnet", &config).unwrap();
        assert_eq!(back, def);

        let bad = Config::from([("cidrBlock".to_string(), json!(1))]);
        let err = from_config::<Def>("subnet", &bad).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
