use std::collections::HashMap;

use chisel_registry::{Registry, RegistryError};
use tracing::debug;

use crate::spec::{CommandError, CommandSpec};

/// A registered command: the declarative spec plus the host-supplied
/// handler payload (the server stores an async closure here).
#[derive(Debug)]
pub struct CommandDef<H> {
    pub spec: CommandSpec,
    pub handler: H,
}

/// Name/activator-unique command table. Activators (aliases) resolve to
/// the owning command; both namespaces are lowercase.
pub struct CommandRegistry<H> {
    commands: Registry<CommandDef<H>>,
    activators: HashMap<String, String>,
}

impl<H> CommandRegistry<H> {
    pub fn new() -> Self {
        Self {
            commands: Registry::new("command"),
            activators: HashMap::new(),
        }
    }

    pub fn register(&mut self, def: CommandDef<H>, overwrite: bool) -> Result<(), RegistryError> {
        let name = def.spec.name.to_ascii_lowercase();
        let activators: Vec<String> = def
            .spec
            .activators
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();
        for activator in &activators {
            if let Some(owner) = self.activators.get(activator) {
                if owner != &name && !overwrite {
                    return Err(RegistryError::Duplicate {
                        category: "command activator",
                        name: activator.clone(),
                    });
                }
            }
        }
        debug!(command = %name, ?activators, "registering command");
        self.commands.register(name.clone(), def, overwrite)?;
        for activator in activators {
            self.activators.insert(activator, name.clone());
        }
        Ok(())
    }

    /// Resolve a command by name first, then by activator.
    pub fn resolve(&self, token: &str) -> Result<&CommandDef<H>, CommandError> {
        let token = token.to_ascii_lowercase();
        if let Some(def) = self.commands.get(&token) {
            return Ok(def);
        }
        if let Some(name) = self.activators.get(&token) {
            if let Some(def) = self.commands.get(name) {
                return Ok(def);
            }
        }
        Err(CommandError::UnknownCommand(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDef<H>> {
        self.commands.iter().map(|(_, def)| def)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<H> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Enforce op gating and the disabled-command list. Returns an optional
/// warning for ops running a disabled command.
pub fn check_access(
    spec: &CommandSpec,
    is_op: bool,
    disabled: &[String],
) -> Result<Option<&'static str>, CommandError> {
    let mut warning = None;
    if disabled.iter().any(|d| d.eq_ignore_ascii_case(spec.name)) {
        if is_op {
            warning = Some("&4[WARNING] &fThis Command Is Disabled, But You Are an OP!");
        } else {
            return Err(CommandError::Disabled);
        }
    }
    if spec.op_only && !is_op {
        return Err(CommandError::NotOperator);
    }
    Ok(warning)
}
