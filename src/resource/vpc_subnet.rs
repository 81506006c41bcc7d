//! VPC subnet resource
//!
//! Two handlers: `create-subnet` places the subnet (region, zone, CIDR
//! block, VPC) and `map-public-ip-on-launch` toggles the public IP flag on
//! an existing subnet. Changing placement of a live subnet replaces it,
//! which needs recreation to be allowed.

use declarative::{
    Config, ConvergeContext, Convergent, CreateOptions, Error, Field, Handler, Lifecycle,
    Resource, ResourceInfo, Result, StateDict, from_config, realize,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::{VPC, VPC_SUBNET, names_of_type, no_definition, not_recorded, record_declared};
use crate::config::resolve_access_key_id;
use crate::provider::{Ec2Client, Ec2Connector, SubnetRequest, tolerate_not_found};

const SUBNET_ID: Field<String> = Field::new("subnetId");
const REGION: Field<String> = Field::new("region");
const AVAILABILITY_ZONE: Field<String> = Field::new("availabilityZone");
const RESOLVED_VPC_ID: Field<String> = Field::new("resolvedVpcId");
const ACCESS_KEY_ID: Field<String> = Field::new("accessKeyId");
const TAGS: Field<BTreeMap<String, String>> = Field::new("ec2.tags");

const CREATE_KEYS: &[&str] = &["region", "zone", "cidrBlock", "vpcId"];
const FLAG_KEYS: &[&str] = &["mapPublicIpOnLaunch"];
const RESERVED_KEYS: &[&str] = &["subnetId", "accessKeyId", "tags", "ec2.tags"];

/// Declared subnet configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDefinition {
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub cidr_block: String,
    /// VPC id, or `res-<name>` of a VPC in the same deployment
    pub vpc_id: String,
    #[serde(default)]
    pub map_public_ip_on_launch: Option<bool>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub enum SubnetAction {
    CreateSubnet,
    MapPublicIpOnLaunch,
}

/// Inputs of the pass in progress
struct Pass {
    definition: SubnetDefinition,
    access_key_id: String,
    desired: Config,
}

pub struct VpcSubnet {
    state: StateDict,
    handlers: Vec<Handler<SubnetAction>>,
    connector: Arc<dyn Ec2Connector>,
    client: Option<(String, String, Box<dyn Ec2Client>)>,
    pass: Option<Pass>,
}

impl VpcSubnet {
    pub fn new(state: StateDict, connector: Arc<dyn Ec2Connector>) -> Self {
        let handlers = vec![
            Handler::new("create-subnet", CREATE_KEYS, SubnetAction::CreateSubnet),
            Handler::new(
                "map-public-ip-on-launch",
                FLAG_KEYS,
                SubnetAction::MapPublicIpOnLaunch,
            )
            .after("create-subnet"),
        ];
        Self {
            state,
            handlers,
            connector,
            client: None,
            pass: None,
        }
    }

    fn pass(&self) -> Result<&Pass> {
        self.pass
            .as_ref()
            .ok_or_else(|| no_definition(self.state.resource()))
    }

    /// Client for `region`, reconnecting when the region or key changed
    fn connect(&mut self, region: &str, access_key_id: &str) -> Result<&mut dyn Ec2Client> {
        let client = match self.client.take() {
            Some((connected, key, client)) if connected == region && key == access_key_id => {
                client
            }
            _ => self.connector.connect(region, access_key_id)?,
        };
        let cached = self
            .client
            .insert((region.to_string(), access_key_id.to_string(), client));
        Ok(&mut *cached.2)
    }

    fn create_subnet(&mut self, options: &CreateOptions, ctx: &mut ConvergeContext) -> Result<()> {
        let name = self.state.resource().to_string();

        if self.state.lifecycle()? == Lifecycle::Up {
            if !options.allow_recreate {
                let subnet_id = self.state.get_or(&SUBNET_ID, String::new())?;
                return Err(Error::RecreateRequired {
                    resource: name,
                    detail: format!(
                        "subnet {subnet_id} definition changed and it needs to be recreated"
                    ),
                });
            }
            log::warn!("{name}: subnet definition changed, recreating...");
            self.delete_subnet()?;
        }

        let pass = self.pass()?;
        let region = pass.definition.region.clone();
        let access_key_id = pass.access_key_id.clone();
        let request = SubnetRequest {
            vpc_id: ctx.resolver.resolve(&pass.definition.vpc_id, VPC, "vpcId")?,
            cidr_block: pass.definition.cidr_block.clone(),
            zone: pass.definition.zone.clone(),
        };

        log::info!("{name}: creating subnet in vpc {}", request.vpc_id);
        let subnet = self
            .connect(&region, &access_key_id)?
            .create_subnet(&request)?;

        let pass = self.pass()?;
        let mut tx = self.state.transaction();
        record_declared(&mut tx, &pass.desired, CREATE_KEYS);
        tx.set_field(&SUBNET_ID, &subnet.subnet_id)?
            .set_field(&AVAILABILITY_ZONE, &subnet.availability_zone)?
            .set_field(&RESOLVED_VPC_ID, &request.vpc_id)?
            .set_field(&ACCESS_KEY_ID, &access_key_id)?
            .set_lifecycle(Lifecycle::Up)?
            // A new subnet starts from provider defaults
            .remove(FLAG_KEYS[0])
            .remove(TAGS.key());
        tx.commit()
    }

    fn map_public_ip_on_launch(&mut self) -> Result<()> {
        let name = self.state.resource().to_string();
        let subnet_id = self
            .state
            .get_field(&SUBNET_ID)?
            .ok_or_else(|| not_recorded(&name, "subnet id"))?;

        let pass = self.pass()?;
        let region = pass.definition.region.clone();
        let access_key_id = pass.access_key_id.clone();
        let enabled = pass.definition.map_public_ip_on_launch.unwrap_or(false);

        log::info!("{name}: setting map-public-ip-on-launch to {enabled}");
        self.connect(&region, &access_key_id)?
            .set_map_public_ip_on_launch(&subnet_id, enabled)?;

        let pass = self.pass()?;
        let mut tx = self.state.transaction();
        record_declared(&mut tx, &pass.desired, FLAG_KEYS);
        tx.commit()
    }

    /// Apply user tags when they differ from what was last applied
    fn update_tags(&mut self, check: bool) -> Result<()> {
        if self.state.lifecycle()? != Lifecycle::Up {
            return Ok(());
        }

        let pass = self.pass()?;
        let tags = pass.definition.tags.clone();
        let region = pass.definition.region.clone();
        let access_key_id = pass.access_key_id.clone();

        let applied = self.state.get_field(&TAGS)?.unwrap_or_default();
        if !check && applied == tags {
            return Ok(());
        }

        let name = self.state.resource().to_string();
        let subnet_id = self
            .state
            .get_field(&SUBNET_ID)?
            .ok_or_else(|| not_recorded(&name, "subnet id"))?;
        if !tags.is_empty() {
            log::debug!("{name}: tagging {subnet_id}");
            self.connect(&region, &access_key_id)?
                .create_tags(&subnet_id, &tags)?;
        }

        let mut tx = self.state.transaction();
        tx.set_field(&TAGS, &tags)?;
        tx.commit()
    }

    /// Delete the remote subnet and forget everything recorded about it
    fn delete_subnet(&mut self) -> Result<()> {
        let name = self.state.resource().to_string();
        let Some(subnet_id) = self.state.get_field(&SUBNET_ID)? else {
            return Ok(());
        };
        let region = self
            .state
            .get_field(&REGION)?
            .ok_or_else(|| not_recorded(&name, "region"))?;
        let access_key_id = match self.state.get_field(&ACCESS_KEY_ID)? {
            Some(id) => id,
            None => resolve_access_key_id(&name, None)?,
        };

        log::info!("{name}: deleting subnet {subnet_id}");
        let client = self.connect(&region, &access_key_id)?;
        tolerate_not_found(client.delete_subnet(&subnet_id), &format!("subnet {subnet_id}"))?;

        let mut tx = self.state.transaction();
        tx.clear();
        tx.commit()
    }
}

impl fmt::Debug for VpcSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpcSubnet")
            .field("name", &self.state.resource())
            .field("connected", &self.client.as_ref().map(|(region, _, _)| region))
            .finish_non_exhaustive()
    }
}

impl Convergent for VpcSubnet {
    type Action = SubnetAction;

    fn handlers(&self) -> &[Handler<SubnetAction>] {
        &self.handlers
    }

    fn reserved_keys(&self) -> &[&'static str] {
        RESERVED_KEYS
    }

    fn state(&self) -> &StateDict {
        &self.state
    }

    fn apply(
        &mut self,
        action: SubnetAction,
        options: &CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()> {
        match action {
            SubnetAction::CreateSubnet => self.create_subnet(options, ctx),
            SubnetAction::MapPublicIpOnLaunch => self.map_public_ip_on_launch(),
        }
    }
}

impl Resource for VpcSubnet {
    fn name(&self) -> &str {
        self.state.resource()
    }

    fn resource_type(&self) -> &'static str {
        VPC_SUBNET
    }

    fn show_type(&self) -> String {
        match self.state.get_field(&AVAILABILITY_ZONE) {
            Ok(Some(zone)) => format!("{VPC_SUBNET} [{zone}]"),
            _ => VPC_SUBNET.to_string(),
        }
    }

    fn resource_id(&self) -> Result<Option<String>> {
        self.state.get_field(&SUBNET_ID)
    }

    fn lifecycle(&self) -> Result<Lifecycle> {
        self.state.lifecycle()
    }

    fn create_after(&self, resources: &[ResourceInfo], _desired: &Config) -> BTreeSet<String> {
        names_of_type(resources, VPC)
    }

    fn create(
        &mut self,
        desired: &Config,
        options: CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()> {
        let name = self.state.resource().to_string();
        let definition: SubnetDefinition = from_config(&name, desired)?;
        let access_key_id = resolve_access_key_id(&name, definition.access_key_id.as_deref())?;
        if self.state.get_field(&SUBNET_ID)?.is_some()
            && self.state.get_field(&ACCESS_KEY_ID)?.as_deref() != Some(access_key_id.as_str())
        {
            let mut tx = self.state.transaction();
            tx.set_field(&ACCESS_KEY_ID, &access_key_id)?;
            tx.commit()?;
        }
        self.pass = Some(Pass {
            definition,
            access_key_id,
            desired: desired.clone(),
        });

        realize(self, desired, &options, ctx)?;
        self.update_tags(options.check)
    }

    fn destroy(&mut self, _wipe: bool, _ctx: &mut ConvergeContext) -> Result<bool> {
        if self.state.lifecycle()? != Lifecycle::Up {
            return Ok(true);
        }
        self.delete_subnet()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeCloud;
    use crate::resource::testing::context;
    use declarative::{MemoryStore, ReferenceResolver, ResourceRef};
    use serde_json::{Value, json};

    fn subnet(cloud: &FakeCloud) -> VpcSubnet {
        let state = StateDict::new(Arc::new(MemoryStore::new()), "web");
        VpcSubnet::new(state, Arc::new(cloud.clone()))
    }

    fn desired(pairs: &[(&str, Value)]) -> Config {
        let mut config = Config::from([
            ("region".to_string(), json!("us-east-1")),
            ("vpcId".to_string(), json!("vpc-1")),
            ("cidrBlock".to_string(), json!("10.0.0.0/24")),
            ("zone".to_string(), json!("a")),
            ("accessKeyId".to_string(), json!("AKIA1")),
        ]);
        for (key, value) in pairs {
            config.insert((*key).to_string(), value.clone());
        }
        config
    }

    #[test]
    fn test_first_create_runs_only_placement() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let desired = desired(&[]);

        let plan = subnet.plan(&desired).unwrap();
        assert_eq!(plan.handler_names(), vec!["create-subnet"]);

        subnet
            .create(&desired, CreateOptions::default(), &mut context())
            .unwrap();

        assert_eq!(subnet.lifecycle().unwrap(), Lifecycle::Up);
        assert_eq!(cloud.calls(), vec![
            "connect_ec2 us-east-1 AKIA1",
            "create_subnet vpc-1 10.0.0.0/24",
        ]);

        let recorded = subnet.state().snapshot().unwrap();
        assert_eq!(recorded.get("subnetId"), Some(&json!("subnet-1")));
        assert_eq!(recorded.get("vpcId"), Some(&json!("vpc-1")));
        assert_eq!(recorded.get("cidrBlock"), Some(&json!("10.0.0.0/24")));
        assert_eq!(recorded.get("zone"), Some(&json!("a")));
        assert_eq!(subnet.resource_id().unwrap().as_deref(), Some("subnet-1"));
        assert_eq!(subnet.show_type(), "vpc-subnet [a]");
    }

    #[test]
    fn test_converged_subnet_makes_no_calls() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let desired = desired(&[("mapPublicIpOnLaunch", json!(true))]);
        let mut ctx = context();

        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();
        cloud.clear_calls();

        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();
        assert!(cloud.calls().is_empty());
        assert!(subnet.plan(&desired).unwrap().is_empty());
    }

    #[test]
    fn test_flag_change_only_touches_flag() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();

        subnet
            .create(&desired(&[]), CreateOptions::default(), &mut ctx)
            .unwrap();
        cloud.clear_calls();

        let desired = desired(&[("mapPublicIpOnLaunch", json!(true))]);
        assert_eq!(subnet.plan(&desired).unwrap().handler_names(), vec![
            "map-public-ip-on-launch"
        ]);
        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();

        assert_eq!(cloud.count("create_subnet"), 0);
        assert_eq!(cloud.count("map_public_ip subnet-1 true"), 1);
        assert_eq!(
            subnet.state().get("mapPublicIpOnLaunch").unwrap(),
            Some(json!(true))
        );
    }

    #[test]
    fn test_new_access_key_reconnects() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();

        subnet
            .create(&desired(&[]), CreateOptions::default(), &mut ctx)
            .unwrap();
        subnet
            .create(
                &desired(&[("mapPublicIpOnLaunch", json!(true))]),
                CreateOptions::default(),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(cloud.count("connect_ec2"), 1);

        subnet
            .create(
                &desired(&[
                    ("accessKeyId", json!("AKIA2")),
                    ("mapPublicIpOnLaunch", json!(false)),
                ]),
                CreateOptions::default(),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(cloud.count("connect_ec2"), 2);
        assert_eq!(cloud.count("connect_ec2 us-east-1 AKIA2"), 1);
        assert_eq!(
            subnet.state().get("accessKeyId").unwrap(),
            Some(json!("AKIA2"))
        );
    }

    #[test]
    fn test_placement_change_requires_recreate() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();

        subnet
            .create(&desired(&[]), CreateOptions::default(), &mut ctx)
            .unwrap();
        let before = subnet.state().snapshot().unwrap();
        cloud.clear_calls();

        let changed = desired(&[("cidrBlock", json!("10.0.1.0/24"))]);
        let err = subnet
            .create(&changed, CreateOptions::default(), &mut ctx)
            .unwrap_err();

        assert!(matches!(err, Error::RecreateRequired { .. }));
        assert_eq!(subnet.state().snapshot().unwrap(), before);
        assert_eq!(cloud.count("create_subnet"), 0);
        assert_eq!(cloud.count("delete_subnet"), 0);
    }

    #[test]
    fn test_recreate_replaces_subnet_and_reapplies_flag() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();

        subnet
            .create(
                &desired(&[("mapPublicIpOnLaunch", json!(true))]),
                CreateOptions::default(),
                &mut ctx,
            )
            .unwrap();
        cloud.clear_calls();

        let changed = desired(&[
            ("cidrBlock", json!("10.0.1.0/24")),
            ("mapPublicIpOnLaunch", json!(true)),
        ]);
        subnet
            .create(&changed, CreateOptions::allowing_recreate(), &mut ctx)
            .unwrap();

        assert_eq!(cloud.calls(), vec![
            "delete_subnet subnet-1",
            "create_subnet vpc-1 10.0.1.0/24",
            "map_public_ip subnet-2 true",
        ]);
        assert_eq!(subnet.resource_id().unwrap().as_deref(), Some("subnet-2"));
        assert!(subnet.plan(&changed).unwrap().is_empty());
    }

    struct Vpcs;

    impl ReferenceResolver for Vpcs {
        fn attribute(&self, reference: &ResourceRef, resource_type: &str, key: &str) -> Result<String> {
            assert_eq!(resource_type, VPC);
            assert_eq!(key, "vpcId");
            Ok(format!("vpc-of-{}", reference.name))
        }
    }

    #[test]
    fn test_vpc_reference_is_resolved_but_declared_value_recorded() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context().with_resolver(Arc::new(Vpcs));
        let desired = desired(&[("vpcId", json!("res-main"))]);

        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();

        assert_eq!(cloud.count("create_subnet vpc-of-main"), 1);
        assert_eq!(subnet.state().get("vpcId").unwrap(), Some(json!("res-main")));
        assert_eq!(
            subnet.state().get("resolvedVpcId").unwrap(),
            Some(json!("vpc-of-main"))
        );
        assert!(subnet.plan(&desired).unwrap().is_empty());
    }

    #[test]
    fn test_tags_applied_on_change_or_check() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();
        let desired = desired(&[("tags", json!({"team": "infra"}))]);

        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();
        assert_eq!(cloud.count("create_tags subnet-1"), 1);
        assert_eq!(
            cloud.lock().tags["subnet-1"].get("team").map(String::as_str),
            Some("infra")
        );

        subnet
            .create(&desired, CreateOptions::default(), &mut ctx)
            .unwrap();
        assert_eq!(cloud.count("create_tags"), 1);

        let check = CreateOptions {
            check: true,
            ..CreateOptions::default()
        };
        subnet.create(&desired, check, &mut ctx).unwrap();
        assert_eq!(cloud.count("create_tags"), 2);
    }

    #[test]
    fn test_destroy() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let mut ctx = context();

        assert!(subnet.destroy(false, &mut ctx).unwrap());
        assert!(cloud.calls().is_empty());

        subnet
            .create(&desired(&[]), CreateOptions::default(), &mut ctx)
            .unwrap();
        assert!(subnet.destroy(false, &mut ctx).unwrap());

        assert_eq!(cloud.count("delete_subnet subnet-1"), 1);
        assert_eq!(subnet.lifecycle().unwrap(), Lifecycle::Missing);
        assert!(subnet.state().snapshot().unwrap().is_empty());
        assert!(cloud.lock().subnets.is_empty());
    }

    #[test]
    fn test_unowned_key_is_rejected() {
        let cloud = FakeCloud::new();
        let mut subnet = subnet(&cloud);
        let desired = desired(&[("ipv6CidrBlock", json!("::/64"))]);

        let err = subnet
            .create(&desired, CreateOptions::default(), &mut context())
            .unwrap_err();
        assert!(matches!(err, Error::UnownedKey { .. }));
        assert!(cloud.calls().is_empty());
    }

    #[test]
    fn test_create_after_vpcs() {
        let subnet = subnet(&FakeCloud::new());
        let infos = [
            ResourceInfo::new("main", VPC),
            ResourceInfo::new("web", VPC_SUBNET),
            ResourceInfo::new("secret", "random-string"),
        ];
        assert_eq!(
            subnet
                .create_after(&infos, &Config::new())
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["main"]
        );
    }
}
