//! Random string resource

use declarative::{
    Config, ConvergeContext, Convergent, CreateOptions, Error, Field, Handler, Lifecycle,
    Resource, Result, StateDict, from_config, realize,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;

use super::{RANDOM_STRING, no_definition, record_declared};

const GENERATED: Field<String> = Field::new("generatedString");

const GENERATE_KEYS: &[&str] = &["length"];

/// Declared random string configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RandomStringDefinition {
    pub length: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum RandomStringAction {
    Generate,
}

#[derive(Debug)]
pub struct RandomString {
    state: StateDict,
    handlers: Vec<Handler<RandomStringAction>>,
    pass: Option<(RandomStringDefinition, Config)>,
}

impl RandomString {
    pub fn new(state: StateDict) -> Self {
        Self {
            state,
            handlers: vec![Handler::new(
                "generate",
                GENERATE_KEYS,
                RandomStringAction::Generate,
            )],
            pass: None,
        }
    }

    /// The generated value, once the resource is up
    pub fn value(&self) -> Result<Option<String>> {
        self.state.get_field(&GENERATED)
    }

    fn generate(&self, options: &CreateOptions) -> Result<()> {
        let name = self.state.resource();
        if self.state.lifecycle()? == Lifecycle::Up && !options.allow_recreate {
            return Err(Error::RecreateRequired {
                resource: name.to_string(),
                detail: "length changed and the string would be regenerated".to_string(),
            });
        }

        let (definition, desired) = self.pass.as_ref().ok_or_else(|| no_definition(name))?;
        log::info!(
            "{name}: generating a random string of length {}",
            definition.length
        );
        let value = generate_string(definition.length);

        let mut tx = self.state.transaction();
        record_declared(&mut tx, desired, GENERATE_KEYS);
        tx.set_field(&GENERATED, &value)?
            .set_lifecycle(Lifecycle::Up)?;
        tx.commit()
    }
}

fn generate_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

impl Convergent for RandomString {
    type Action = RandomStringAction;

    fn handlers(&self) -> &[Handler<RandomStringAction>] {
        &self.handlers
    }

    fn reserved_keys(&self) -> &[&'static str] {
        &[]
    }

    fn state(&self) -> &StateDict {
        &self.state
    }

    fn apply(
        &mut self,
        action: RandomStringAction,
        options: &CreateOptions,
        _ctx: &mut ConvergeContext,
    ) -> Result<()> {
        match action {
            RandomStringAction::Generate => self.generate(options),
        }
    }
}

impl Resource for RandomString {
    fn name(&self) -> &str {
        self.state.resource()
    }

    fn resource_type(&self) -> &'static str {
        RANDOM_STRING
    }

    fn resource_id(&self) -> Result<Option<String>> {
        Ok(None)
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
        let definition = from_config(self.state.resource(), desired)?;
        self.pass = Some((definition, desired.clone()));
        realize(self, desired, &options, ctx)?;
        Ok(())
    }

    fn destroy(&mut self, _wipe: bool, _ctx: &mut ConvergeContext) -> Result<bool> {
        if self.state.lifecycle()? == Lifecycle::Up {
            let mut tx = self.state.transaction();
            tx.clear();
            tx.commit()?;
        }
        Ok(true)
    }
}
