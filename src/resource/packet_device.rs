//! Packet bare-metal device resource
//!
//! Creation is asynchronous at the provider. The device id is recorded
//! together with the `STARTING` tag before polling begins, so an
//! interrupted wait resumes on the next pass without issuing a second
//! create request.

use declarative::{
    Config, ConvergeContext, Convergent, CreateOptions, Error, Field, Handler, Lifecycle,
    PollStatus, Resource, ResourceInfo, Result, StateDict, from_config, poll_until, realize,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::{
    PACKET_DEVICE, PACKET_SSH_KEY, names_of_type, no_definition, not_recorded, record_declared,
};
use crate::config::require_auth_token;
use crate::provider::{DeviceRequest, PacketClient, PacketConnector, tolerate_not_found};

const DEVICE_ID: Field<String> = Field::new("deviceId");
const AUTH_TOKEN: Field<String> = Field::new("authToken");
const FACILITY: Field<String> = Field::new("facility");
const PUBLIC_IPV4: Field<String> = Field::new("publicIpv4");
const PRIVATE_IPV4: Field<String> = Field::new("privateIpv4");
const RESOLVED_SSH_KEYS: Field<Vec<String>> = Field::new("resolvedSSHKeys");

const DEVICE_KEYS: &[&str] = &[
    "projectId",
    "hostname",
    "plan",
    "facility",
    "operatingSystem",
    "billingCycle",
    "spotInstance",
    "spotPriceMax",
    "userSSHKeys",
];
const RESERVED_KEYS: &[&str] = &["authToken"];

/// Declared device configuration, the `packet` section of a machine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDefinition {
    #[serde(default)]
    pub auth_token: Option<String>,
    pub project_id: String,
    pub hostname: String,
    pub plan: String,
    pub facility: String,
    pub operating_system: String,
    #[serde(default = "default_billing_cycle")]
    pub billing_cycle: String,
    #[serde(default)]
    pub spot_instance: bool,
    #[serde(default)]
    pub spot_price_max: Option<f64>,
    /// Owner ids, or `res-<name>` of SSH key resources
    #[serde(default, rename = "userSSHKeys")]
    pub user_ssh_keys: Vec<String>,
}

fn default_billing_cycle() -> String {
    "hourly".to_string()
}

#[derive(Debug, Clone, Copy)]
pub enum DeviceAction {
    CreateDevice,
}

struct Pass {
    definition: DeviceDefinition,
    desired: Config,
}

pub struct PacketDevice {
    state: StateDict,
    handlers: Vec<Handler<DeviceAction>>,
    connector: Arc<dyn PacketConnector>,
    client: Option<Box<dyn PacketClient>>,
    pass: Option<Pass>,
}

impl PacketDevice {
    pub fn new(state: StateDict, connector: Arc<dyn PacketConnector>) -> Self {
        Self {
            state,
            handlers: vec![Handler::new(
                "create-device",
                DEVICE_KEYS,
                DeviceAction::CreateDevice,
            )],
            connector,
            client: None,
            pass: None,
        }
    }

    pub fn public_ipv4(&self) -> Result<Option<String>> {
        self.state.get_field(&PUBLIC_IPV4)
    }

    pub fn private_ipv4(&self) -> Result<Option<String>> {
        self.state.get_field(&PRIVATE_IPV4)
    }

    fn client(&mut self) -> Result<&mut dyn PacketClient> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let token = self
                    .state
                    .get_field(&AUTH_TOKEN)?
                    .ok_or_else(|| not_recorded(self.state.resource(), "auth token"))?;
                self.connector.connect(&token)?
            }
        };
        Ok(&mut **self.client.insert(client))
    }

    fn create_device(&mut self, options: &CreateOptions, ctx: &mut ConvergeContext) -> Result<()> {
        let name = self.state.resource().to_string();

        if self.state.lifecycle()? == Lifecycle::Up {
            if !options.allow_recreate {
                let device_id = self.state.get_or(&DEVICE_ID, String::new())?;
                return Err(Error::RecreateRequired {
                    resource: name,
                    detail: format!(
                        "device {device_id} definition changed and it needs to be recreated"
                    ),
                });
            }
            log::warn!("{name}: device definition changed, recreating...");
            self.delete_device()?;
            self.reset()?;
        }

        let definition = &self
            .pass
            .as_ref()
            .ok_or_else(|| no_definition(&name))?
            .definition;
        let user_ssh_keys = definition
            .user_ssh_keys
            .iter()
            .map(|key| ctx.resolver.resolve(key, PACKET_SSH_KEY, "owner"))
            .collect::<Result<Vec<_>>>()?;
        let request = DeviceRequest {
            project_id: definition.project_id.clone(),
            hostname: definition.hostname.clone(),
            plan: definition.plan.clone(),
            facility: definition.facility.clone(),
            operating_system: definition.operating_system.clone(),
            billing_cycle: definition.billing_cycle.clone(),
            spot_instance: definition.spot_instance,
            spot_price_max: definition.spot_price_max,
            user_ssh_keys,
        };

        log::info!(
            "{name}: creating Packet instance (facility {}, plan {}, billing cycle {})",
            request.facility,
            request.plan,
            request.billing_cycle
        );
        let device = self.client()?.create_device(&request)?;

        let pass = self.pass.as_ref().ok_or_else(|| no_definition(&name))?;
        let mut tx = self.state.transaction();
        record_declared(&mut tx, &pass.desired, DEVICE_KEYS);
        tx.set_field(&DEVICE_ID, &device.id)?
            .set_field(&RESOLVED_SSH_KEYS, &request.user_ssh_keys)?
            .set_lifecycle(Lifecycle::Starting)?;
        tx.commit()?;

        self.wait_for_device(&device.id, ctx)
    }

    /// Poll until the device is active, then record its addresses
    fn wait_for_device(&mut self, device_id: &str, ctx: &ConvergeContext) -> Result<()> {
        let name = self.state.resource().to_string();
        log::info!("{name}: waiting for IP address...");

        let what = format!("Packet device {device_id}");
        let client = self.client()?;
        let outcome = poll_until(&ctx.poll, &ctx.cancel, &what, || {
            match client.get_device(device_id) {
                Ok(device) if device.state == "active" => Ok(PollStatus::Ready(device)),
                Ok(device) if device.state == "provisioning" => Ok(PollStatus::Pending(device.state)),
                Ok(device) => Err(Error::UnexpectedState {
                    resource: name.clone(),
                    state: device.state,
                }),
                Err(e) if e.is_not_found() => Ok(PollStatus::Gone),
                Err(e) => Err(e.into()),
            }
        })?;

        match outcome {
            Some(device) => {
                let public = device.ipv4(true);
                let private = device.ipv4(false);
                log::info!(
                    "{name}: {} / {}",
                    public.unwrap_or("-"),
                    private.unwrap_or("-")
                );
                let public = public.map(str::to_string);
                let private = private.map(str::to_string);
                let mut tx = self.state.transaction();
                tx.put_field(&PUBLIC_IPV4, public.as_ref())?
                    .put_field(&PRIVATE_IPV4, private.as_ref())?
                    .set_lifecycle(Lifecycle::Up)?;
                tx.commit()
            }
            None => {
                log::warn!("{name}: machine {device_id} was already deleted");
                self.reset()
            }
        }
    }

    /// Delete the remote device, if any
    fn delete_device(&mut self) -> Result<()> {
        if let Some(device_id) = self.state.get_field(&DEVICE_ID)? {
            log::info!("{}: destroying Packet machine {device_id}...", self.state.resource());
            let result = self.client()?.delete_device(&device_id);
            tolerate_not_found(result, &format!("machine {device_id}"))?;
        }
        Ok(())
    }

    /// Forget everything recorded, the credential included
    fn forget(&self) -> Result<()> {
        let mut tx = self.state.transaction();
        tx.clear();
        tx.commit()
    }

    /// Forget the device, keeping only the credential
    fn reset(&self) -> Result<()> {
        let token = self.state.get_field(&AUTH_TOKEN)?;
        let mut tx = self.state.transaction();
        tx.clear().put_field(&AUTH_TOKEN, token.as_ref())?;
        tx.commit()
    }

    /// Reset a live device that no longer exists at the provider
    fn check_remote(&mut self) -> Result<()> {
        let Some(device_id) = self.state.get_field(&DEVICE_ID)? else {
            return Ok(());
        };
        match self.client()?.get_device(&device_id) {
            Ok(device) => {
                log::debug!("{}: device is {}", self.state.resource(), device.state);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                log::warn!(
                    "{}: machine {device_id} was already deleted",
                    self.state.resource()
                );
                self.reset()
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for PacketDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDevice")
            .field("name", &self.state.resource())
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Convergent for PacketDevice {
    type Action = DeviceAction;

    fn handlers(&self) -> &[Handler<DeviceAction>] {
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
        action: DeviceAction,
        options: &CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()> {
        match action {
            DeviceAction::CreateDevice => self.create_device(options, ctx),
        }
    }

    fn resume(&mut self, ctx: &mut ConvergeContext) -> Result<()> {
        match self.state.get_field(&DEVICE_ID)? {
            Some(device_id) => self.wait_for_device(&device_id, ctx),
            None => {
                log::warn!(
                    "{}: starting without a device id, starting over",
                    self.state.resource()
                );
                self.reset()
            }
        }
    }
}

impl Resource for PacketDevice {
    fn name(&self) -> &str {
        self.state.resource()
    }

    fn resource_type(&self) -> &'static str {
        PACKET_DEVICE
    }

    fn show_type(&self) -> String {
        match self.state.get_field(&FACILITY) {
            Ok(Some(facility)) => format!("{PACKET_DEVICE} [{facility}]"),
            _ => PACKET_DEVICE.to_string(),
        }
    }

    fn resource_id(&self) -> Result<Option<String>> {
        self.state.get_field(&DEVICE_ID)
    }

    fn lifecycle(&self) -> Result<Lifecycle> {
        self.state.lifecycle()
    }

    fn create_after(&self, resources: &[ResourceInfo], _desired: &Config) -> BTreeSet<String> {
        names_of_type(resources, PACKET_SSH_KEY)
    }

    fn create(
        &mut self,
        desired: &Config,
        options: CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()> {
        let name = self.state.resource().to_string();
        let definition: DeviceDefinition = from_config(&name, desired)?;
        let token = require_auth_token(&name, definition.auth_token.as_deref())?;

        if self.state.get_field(&AUTH_TOKEN)?.as_deref() != Some(token.as_str()) {
            self.client = None;
            let mut tx = self.state.transaction();
            tx.set_field(&AUTH_TOKEN, &token)?;
            tx.commit()?;
        }
        self.pass = Some(Pass {
            definition,
            desired: desired.clone(),
        });

        if options.check && self.state.lifecycle()? == Lifecycle::Up {
            self.check_remote()?;
        }

        realize(self, desired, &options, ctx)?;
        Ok(())
    }

    fn destroy(&mut self, _wipe: bool, ctx: &mut ConvergeContext) -> Result<bool> {
        if self.state.get_field(&DEVICE_ID)?.is_none() {
            if !self.state.snapshot()?.is_empty() {
                self.forget()?;
            }
            return Ok(true);
        }
        let prompt = format!(
            "are you sure you want to destroy Packet machine {}?",
            self.state.resource()
        );
        if !ctx.confirm(&prompt) {
            return Ok(false);
        }

        self.delete_device()?;
        self.forget()?;
        Ok(true)
    }
}
