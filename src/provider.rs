//! Provider client contracts
//!
//! Resources never call a cloud SDK directly. They connect through these
//! traits, so real clients and test fakes are interchangeable. Every call
//! reports a vanished remote object as [`ProviderError::NotFound`].

use declarative::{ProviderError, Result};
use std::collections::BTreeMap;

/// Result of a provider call
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// EC2
// ============================================================================

/// Parameters for creating a subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRequest {
    pub vpc_id: String,
    pub cidr_block: String,
    /// Availability zone; the provider picks one when `None`
    pub zone: Option<String>,
}

/// A subnet as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_id: String,
    pub availability_zone: String,
}

/// An EC2 client bound to one region and credential
pub trait Ec2Client: Send {
    fn create_subnet(&mut self, request: &SubnetRequest) -> ProviderResult<Subnet>;

    fn set_map_public_ip_on_launch(&mut self, subnet_id: &str, enabled: bool)
    -> ProviderResult<()>;

    fn delete_subnet(&mut self, subnet_id: &str) -> ProviderResult<()>;

    /// Add or overwrite tags on a resource
    fn create_tags(&mut self, resource_id: &str, tags: &BTreeMap<String, String>)
    -> ProviderResult<()>;
}

/// Opens EC2 clients
pub trait Ec2Connector: Send + Sync {
    fn connect(&self, region: &str, access_key_id: &str) -> ProviderResult<Box<dyn Ec2Client>>;
}

// ============================================================================
// Packet
// ============================================================================

/// Parameters for creating a bare-metal device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequest {
    pub project_id: String,
    pub hostname: String,
    pub plan: String,
    pub facility: String,
    pub operating_system: String,
    pub billing_cycle: String,
    pub spot_instance: bool,
    pub spot_price_max: Option<f64>,
    /// Owner ids of the keys allowed to log in
    pub user_ssh_keys: Vec<String>,
}

/// One address assigned to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddress {
    pub address: String,
    /// 4 or 6
    pub address_family: u8,
    pub public: bool,
}

/// A device as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    /// Provisioning state, e.g. "provisioning" or "active"
    pub state: String,
    pub ip_addresses: Vec<IpAddress>,
}

impl Device {
    /// First IPv4 address with the given visibility
    pub fn ipv4(&self, public: bool) -> Option<&str> {
        self.ip_addresses
            .iter()
            .find(|ip| ip.address_family == 4 && ip.public == public)
            .map(|ip| ip.address.as_str())
    }
}

/// An uploaded SSH key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKey {
    pub id: String,
    pub label: String,
    /// Owner reference, e.g. "/users/<id>"
    pub owner: String,
}

impl SshKey {
    /// Owner id parsed out of the owner reference
    pub fn owner_id(&self) -> Option<&str> {
        self.owner
            .strip_prefix("/users/")
            .map(|rest| rest.split('/').next().unwrap_or(rest))
            .filter(|id| !id.is_empty())
    }
}

/// A Packet API client bound to one auth token
pub trait PacketClient: Send {
    fn create_device(&mut self, request: &DeviceRequest) -> ProviderResult<Device>;

    fn get_device(&mut self, device_id: &str) -> ProviderResult<Device>;

    fn delete_device(&mut self, device_id: &str) -> ProviderResult<()>;

    fn create_ssh_key(&mut self, label: &str, public_key: &str) -> ProviderResult<SshKey>;

    fn get_ssh_key(&mut self, key_id: &str) -> ProviderResult<SshKey>;

    fn delete_ssh_key(&mut self, key_id: &str) -> ProviderResult<()>;
}

/// Opens Packet clients
pub trait PacketConnector: Send + Sync {
    fn connect(&self, auth_token: &str) -> ProviderResult<Box<dyn PacketClient>>;
}

// ============================================================================
// Key pairs
// ============================================================================

/// A freshly generated SSH key pair
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Generates SSH key pairs
pub trait KeyPairGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair>;
}

/// Treat a not-found response as success, logging what was missing.
pub(crate) fn tolerate_not_found(result: ProviderResult<()>, what: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            log::warn!("{what} was already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
