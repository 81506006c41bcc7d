//! Cross-resource references
//!
//! Configuration values of the form `res-<name>` (optionally followed by
//! `.<attribute>`) name another resource in the same deployment. They are
//! resolved through a [`ReferenceResolver`] rather than parsed ad hoc by
//! each resource.

use std::fmt;

use crate::error::{Error, Result};

const PREFIX: &str = "res-";

/// A parsed `res-<name>` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    pub attribute: Option<String>,
}

impl ResourceRef {
    /// Parse a configuration value; `None` if it is a literal.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix(PREFIX)?;
        if rest.is_empty() {
            return None;
        }
        let (name, attribute) = match rest.split_once('.') {
            Some((name, attr)) => (name, Some(attr.to_string())),
            None => (rest, None),
        };
        Some(Self {
            name: name.to_string(),
            attribute,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.name)?;
        if let Some(attr) = &self.attribute {
            write!(f, ".{attr}")?;
        }
        Ok(())
    }
}

/// Resolves references to live resources of the same deployment
pub trait ReferenceResolver: Send + Sync {
    /// Read attribute `key` recorded by the referenced resource, which must
    /// be of type `resource_type`.
    fn attribute(&self, reference: &ResourceRef, resource_type: &str, key: &str)
    -> Result<String>;

    /// Resolve `value` if it is a reference, otherwise return it unchanged.
    fn resolve(&self, value: &str, resource_type: &str, key: &str) -> Result<String> {
        match ResourceRef::parse(value) {
            Some(reference) => self.attribute(&reference, resource_type, key),
            None => Ok(value.to_string()),
        }
    }
}

/// Resolver for contexts with no other resources
pub struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn attribute(
        &self,
        reference: &ResourceRef,
        _resource_type: &str,
        _key: &str,
    ) -> Result<String> {
        Err(Error::Unresolved {
            reference: reference.to_string(),
            reason: "no deployment is attached".to_string(),
        })
    }
}
