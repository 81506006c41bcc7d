//! Packet SSH key resource
//!
//! The key pair is generated locally once and kept in state; the `upload`
//! handler registers its public half with Packet under the declared label.

use declarative::{
    Config, ConvergeContext, Convergent, CreateOptions, Field, Handler, Lifecycle, ProviderError,
    Resource, Result, StateDict, from_config, realize,
};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::{PACKET_SSH_KEY, no_definition, not_recorded, record_declared};
use crate::config::require_auth_token;
use crate::provider::{KeyPairGenerator, PacketClient, PacketConnector, tolerate_not_found};

const KEY_ID: Field<String> = Field::new("keyId");
const OWNER: Field<String> = Field::new("owner");
const AUTH_TOKEN: Field<String> = Field::new("authToken");
const PUBLIC_KEY: Field<String> = Field::new("publicKey");
const PRIVATE_KEY: Field<String> = Field::new("privateKey");

const UPLOAD_KEYS: &[&str] = &["label"];
const RESERVED_KEYS: &[&str] = &["authToken"];

/// Declared SSH key configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyDefinition {
    #[serde(default)]
    pub auth_token: Option<String>,
    pub label: String,
}

#[derive(Debug, Clone, Copy)]
pub enum SshKeyAction {
    Upload,
}

struct Pass {
    definition: SshKeyDefinition,
    desired: Config,
}

pub struct PacketSshKey {
    state: StateDict,
    handlers: Vec<Handler<SshKeyAction>>,
    connector: Arc<dyn PacketConnector>,
    generator: Arc<dyn KeyPairGenerator>,
    client: Option<Box<dyn PacketClient>>,
    pass: Option<Pass>,
}

impl PacketSshKey {
    pub fn new(
        state: StateDict,
        connector: Arc<dyn PacketConnector>,
        generator: Arc<dyn KeyPairGenerator>,
    ) -> Self {
        Self {
            state,
            handlers: vec![Handler::new("upload", UPLOAD_KEYS, SshKeyAction::Upload)],
            connector,
            generator,
            client: None,
            pass: None,
        }
    }

    /// Owner id other resources authorize for login
    pub fn owner(&self) -> Result<Option<String>> {
        self.state.get_field(&OWNER)
    }

    pub fn private_key(&self) -> Result<Option<String>> {
        self.state.get_field(&PRIVATE_KEY)
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

    /// Generate the key pair unless one is already recorded
    fn ensure_key_pair(&self) -> Result<()> {
        if self.state.get_field(&PUBLIC_KEY)?.is_some() {
            return Ok(());
        }
        log::debug!("{}: generating key pair", self.state.resource());
        let pair = self.generator.generate()?;
        let mut tx = self.state.transaction();
        tx.set_field(&PUBLIC_KEY, &pair.public_key)?
            .set_field(&PRIVATE_KEY, &pair.private_key)?;
        tx.commit()
    }

    /// Forget the remote key when it was removed behind our back
    fn check_remote(&mut self) -> Result<()> {
        let Some(key_id) = self.state.get_field(&KEY_ID)? else {
            return Ok(());
        };
        match self.client()?.get_ssh_key(&key_id) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                log::warn!(
                    "{}: ssh key {key_id} no longer exists, uploading again",
                    self.state.resource()
                );
                self.reset()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Back to MISSING, keeping the local key pair and credentials
    fn reset(&self) -> Result<()> {
        let mut tx = self.state.transaction();
        tx.remove(KEY_ID.key())
            .remove(OWNER.key())
            .remove(UPLOAD_KEYS[0])
            .set_lifecycle(Lifecycle::Missing)?;
        tx.commit()
    }

    fn upload(&mut self) -> Result<()> {
        let name = self.state.resource().to_string();
        let label = self
            .pass
            .as_ref()
            .ok_or_else(|| no_definition(&name))?
            .definition
            .label
            .clone();
        let public_key = self
            .state
            .get_field(&PUBLIC_KEY)?
            .ok_or_else(|| not_recorded(&name, "public key"))?;

        // A relabel replaces the uploaded key; forget it before uploading
        if let Some(key_id) = self.state.get_field(&KEY_ID)? {
            log::info!("{name}: replacing Packet ssh key {key_id}");
            let result = self.client()?.delete_ssh_key(&key_id);
            tolerate_not_found(result, &format!("ssh key {key_id}"))?;
            self.reset()?;
        }

        log::info!("{name}: uploading Packet ssh key...");
        let key = self.client()?.create_ssh_key(&label, &public_key)?;
        let owner = key
            .owner_id()
            .ok_or_else(|| ProviderError::api(format!("unexpected key owner '{}'", key.owner)))?
            .to_string();

        let pass = self.pass.as_ref().ok_or_else(|| no_definition(&name))?;
        let mut tx = self.state.transaction();
        record_declared(&mut tx, &pass.desired, UPLOAD_KEYS);
        tx.set_field(&KEY_ID, &key.id)?
            .set_field(&OWNER, &owner)?
            .set_lifecycle(Lifecycle::Up)?;
        tx.commit()
    }
}

impl fmt::Debug for PacketSshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketSshKey")
            .field("name", &self.state.resource())
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Convergent for PacketSshKey {
    type Action = SshKeyAction;

    fn handlers(&self) -> &[Handler<SshKeyAction>] {
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
        action: SshKeyAction,
        _options: &CreateOptions,
        _ctx: &mut ConvergeContext,
    ) -> Result<()> {
        match action {
            SshKeyAction::Upload => self.upload(),
        }
    }
}

impl Resource for PacketSshKey {
    fn name(&self) -> &str {
        self.state.resource()
    }

    fn resource_type(&self) -> &'static str {
        PACKET_SSH_KEY
    }

    fn resource_id(&self) -> Result<Option<String>> {
        self.state.get_field(&KEY_ID)
    }

    fn lifecycle(&self) -> Result<Lifecycle> {
        self.state.lifecycle()
    }

    fn create(
        &mut self,
        desired: &Config,
        options: CreateOptions,
        ctx: &mut ConvergeContext,
    ) -> Result<()> {
        let name = self.state.resource().to_string();
        let definition: SshKeyDefinition = from_config(&name, desired)?;
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

        self.ensure_key_pair()?;
        if options.check && self.state.lifecycle()? == Lifecycle::Up {
            self.check_remote()?;
        }

        realize(self, desired, &options, ctx)?;
        Ok(())
    }

    fn destroy(&mut self, _wipe: bool, _ctx: &mut ConvergeContext) -> Result<bool> {
        if self.state.lifecycle()? == Lifecycle::Up {
            let key_id = self
                .state
                .get_field(&KEY_ID)?
                .ok_or_else(|| not_recorded(self.state.resource(), "key id"))?;
            log::info!(
                "{}: deleting Packet ssh key {key_id}...",
                self.state.resource()
            );
            let result = self.client()?.delete_ssh_key(&key_id);
            tolerate_not_found(result, &format!("ssh key {key_id}"))?;
        }

        let mut tx = self.state.transaction();
        tx.clear();
        tx.commit()?;
        Ok(true)
    }
}
