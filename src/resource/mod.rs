//! Resource kinds built on the convergence engine
//!
//! Each kind declares its field handlers and typed persisted fields, and
//! talks to its provider through the traits in [`crate::provider`].

pub mod packet_device;
pub mod packet_ssh_key;
pub mod random_string;
pub mod vpc_subnet;

pub use packet_device::{DeviceDefinition, PacketDevice};
pub use packet_ssh_key::{PacketSshKey, SshKeyDefinition};
pub use random_string::{RandomString, RandomStringDefinition};
pub use vpc_subnet::{SubnetDefinition, VpcSubnet};

use declarative::{Config, Error, ResourceInfo, Transaction};
use std::collections::BTreeSet;

/// Resource type names
pub const VPC: &str = "vpc";
pub const VPC_SUBNET: &str = "vpc-subnet";
pub const RANDOM_STRING: &str = "random-string";
pub const PACKET_SSH_KEY: &str = "packet-ssh-key";
pub const PACKET_DEVICE: &str = "packet";

/// Record the declared value of each key, removing keys declared as absent.
///
/// Recording exactly what was declared keeps the next plan empty once the
/// handler has converged.
pub(crate) fn record_declared(tx: &mut Transaction<'_>, desired: &Config, keys: &[&str]) {
    for key in keys {
        match desired.get(*key) {
            Some(value) if !value.is_null() => {
                tx.set(key, value.clone());
            }
            _ => {
                tx.remove(key);
            }
        }
    }
}

/// Names of all resources of the given type
pub(crate) fn names_of_type(resources: &[ResourceInfo], resource_type: &str) -> BTreeSet<String> {
    resources
        .iter()
        .filter(|r| r.resource_type == resource_type)
        .map(|r| r.name.clone())
        .collect()
}

/// Error for a handler run before `create` supplied a definition
pub(crate) fn no_definition(resource: &str) -> Error {
    Error::MissingSetting {
        resource: resource.to_string(),
        message: "no definition supplied for this pass".to_string(),
    }
}

/// Error for a recorded identifier that should exist but does not
pub(crate) fn not_recorded(resource: &str, what: &str) -> Error {
    Error::MissingSetting {
        resource: resource.to_string(),
        message: format!("no {what} recorded"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use declarative::{ConvergeContext, NoProgress, PollConfig};
    use std::time::Duration;

    /// Quiet context that polls without sleeping
    pub fn context() -> ConvergeContext {
        ConvergeContext::new()
            .with_progress(NoProgress)
            .with_poll(PollConfig::new(Duration::ZERO))
    }
}
