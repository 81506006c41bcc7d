//! Deployment file loading and credential resolution

use anyhow::{Context, Result};
use declarative::{Config, Error, ResourceInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::resource::{PACKET_DEVICE, PACKET_SSH_KEY, RANDOM_STRING, VPC_SUBNET};

/// Get the default state database path
pub fn default_state_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home
        .join(".local")
        .join("state")
        .join("provision")
        .join("deployments.db"))
}

// ============================================================================
// Deployment file
// ============================================================================

/// A deployment definition file
///
/// ```toml
/// stateFile = "~/deployments/web.db"
///
/// [resources.vpcSubnets.web]
/// region = "us-east-1"
/// vpcId = "res-main-vpc"
/// cidrBlock = "10.0.0.0/24"
///
/// [machines.builder.packet]
/// authToken = "..."
/// hostname = "builder"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFile {
    /// Path of the state database; `~` is expanded
    #[serde(default)]
    pub state_file: Option<String>,

    #[serde(default)]
    pub resources: ResourceSections,

    #[serde(default)]
    pub machines: BTreeMap<String, MachineSection>,
}

/// Declared resources grouped by kind
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSections {
    #[serde(default)]
    pub vpc_subnets: BTreeMap<String, Config>,

    #[serde(default)]
    pub random_strings: BTreeMap<String, Config>,

    #[serde(default, rename = "packetSSHKeys")]
    pub packet_ssh_keys: BTreeMap<String, Config>,
}

/// One declared machine, keyed by backend
#[derive(Debug, Default, Deserialize)]
pub struct MachineSection {
    #[serde(default)]
    pub packet: Option<Config>,
}

impl DeploymentFile {
    /// Load a deployment file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid deployment file {}", path.display()))
    }

    /// Parse a deployment file from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolved state database path
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => {
                let expanded = shellexpand::tilde(path);
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => default_state_path(),
        }
    }

    /// Every declared resource with its type, sorted by name within kind
    pub fn resource_infos(&self) -> Vec<ResourceInfo> {
        let sections = [
            (VPC_SUBNET, &self.resources.vpc_subnets),
            (RANDOM_STRING, &self.resources.random_strings),
            (PACKET_SSH_KEY, &self.resources.packet_ssh_keys),
        ];
        let mut infos: Vec<ResourceInfo> = sections
            .into_iter()
            .flat_map(|(kind, defs)| defs.keys().map(move |name| ResourceInfo::new(name, kind)))
            .collect();

        infos.extend(
            self.machines
                .iter()
                .filter(|(_, machine)| machine.packet.is_some())
                .map(|(name, _)| ResourceInfo::new(name, PACKET_DEVICE)),
        );
        infos
    }

    /// Desired configuration of a declared resource
    pub fn definition(&self, name: &str) -> Option<&Config> {
        self.resources
            .vpc_subnets
            .get(name)
            .or_else(|| self.resources.random_strings.get(name))
            .or_else(|| self.resources.packet_ssh_keys.get(name))
            .or_else(|| self.machines.get(name).and_then(|m| m.packet.as_ref()))
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Environment variables consulted for the EC2 access key id, in order
pub const ACCESS_KEY_ENV: &[&str] = &["EC2_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];

/// Resolve the EC2 access key id from the definition or the environment
pub fn resolve_access_key_id(resource: &str, declared: Option<&str>) -> declarative::Result<String> {
    resolve_access_key_id_with(resource, declared, |name| std::env::var(name).ok())
}

/// Resolve the EC2 access key id with a custom environment lookup
pub fn resolve_access_key_id_with(
    resource: &str,
    declared: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> declarative::Result<String> {
    declared
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ACCESS_KEY_ENV
                .iter()
                .find_map(|var| lookup(var).filter(|id| !id.is_empty()))
        })
        .ok_or_else(|| Error::MissingSetting {
            resource: resource.to_string(),
            message: "please set 'accessKeyId', $EC2_ACCESS_KEY or $AWS_ACCESS_KEY_ID".to_string(),
        })
}

/// Require a Packet auth token
pub fn require_auth_token(resource: &str, declared: Option<&str>) -> declarative::Result<String> {
    declared
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingSetting {
            resource: resource.to_string(),
            message: "please set the option authToken to create the resource".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
stateFile = "~/deployments/web.db"

[resources.vpcSubnets.web]
region = "us-east-1"
vpcId = "res-main-vpc"
cidrBlock = "10.0.0.0/24"
mapPublicIpOnLaunch = true

[resources.vpcSubnets.web.tags]
team = "infra"

[resources.randomStrings.secret]
length = 32

[resources.packetSSHKeys.deploy]
authToken = "token"
label = "deploy"

[machines.builder.packet]
authToken = "token"
projectId = "p-1"
hostname = "builder"
plan = "c3.small.x86"
facility = "ams1"
operatingSystem = "nixos_21_05"
billingCycle = "hourly"
userSSHKeys = ["res-deploy"]

[machines.elsewhere]
"#;

    #[test]
    fn test_parse_sections() {
        let file = DeploymentFile::parse(SAMPLE).unwrap();

        let web = file.definition("web").unwrap();
        assert_eq!(web.get("cidrBlock"), Some(&json!("10.0.0.0/24")));
        assert_eq!(web.get("mapPublicIpOnLaunch"), Some(&json!(true)));
        assert_eq!(web.get("tags"), Some(&json!({"team": "infra"})));

        let secret = file.definition("secret").unwrap();
        assert_eq!(secret.get("length"), Some(&json!(32)));

        let builder = file.definition("builder").unwrap();
        assert_eq!(builder.get("userSSHKeys"), Some(&json!(["res-deploy"])));
        assert!(file.definition("elsewhere").is_none());
    }

    #[test]
    fn test_resource_infos() {
        let file = DeploymentFile::parse(SAMPLE).unwrap();
        let infos = file.resource_infos();
        assert_eq!(infos, vec![
            ResourceInfo::new("web", VPC_SUBNET),
            ResourceInfo::new("secret", RANDOM_STRING),
            ResourceInfo::new("deploy", PACKET_SSH_KEY),
            ResourceInfo::new("builder", PACKET_DEVICE),
        ]);
    }

    #[test]
    fn test_state_path_expands_tilde() {
        let file = DeploymentFile::parse(SAMPLE).unwrap();
        let path = file.state_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("deployments/web.db"));
    }

    #[test]
    fn test_default_state_path() {
        let file = DeploymentFile::default();
        let path = file.state_path().unwrap();
        assert!(path.ends_with(".local/state/provision/deployments.db"));
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deploy.toml");
        fs::write(&path, "stateFile = 3").unwrap();

        let err = DeploymentFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("deploy.toml"));
    }

    #[test]
    fn test_access_key_fallback() {
        let env = |vars: &'static [(&'static str, &'static str)]| {
            move |name: &str| {
                vars.iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| (*v).to_string())
            }
        };

        let id = resolve_access_key_id_with("web", Some("AKIA1"), env(&[])).unwrap();
        assert_eq!(id, "AKIA1");

        let id = resolve_access_key_id_with(
            "web",
            None,
            env(&[("EC2_ACCESS_KEY", "AKIA2"), ("AWS_ACCESS_KEY_ID", "AKIA3")]),
        )
        .unwrap();
        assert_eq!(id, "AKIA2");

        let id =
            resolve_access_key_id_with("web", Some(""), env(&[("AWS_ACCESS_KEY_ID", "AKIA3")]))
                .unwrap();
        assert_eq!(id, "AKIA3");

        let err = resolve_access_key_id_with("web", None, env(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingSetting { .. }));
    }

    #[test]
    fn test_auth_token_required() {
        assert_eq!(require_auth_token("k", Some("t")).unwrap(), "t");
        assert!(matches!(
            require_auth_token("k", Some("")),
            Err(Error::MissingSetting { .. })
        ));
        assert!(require_auth_token("k", None).is_err());
    }
}
