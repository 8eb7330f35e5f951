use crate::context::CommandContext;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Who may run a command regardless of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerGate {
    #[default]
    Anyone,
    /// Owner or sudo user.
    SudoOrOwner,
    /// Configured owners only.
    OwnerOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub owner: OwnerGate,
    pub group_only: bool,
    pub admin_only: bool,
    pub bot_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    General,
    Owner,
    Group,
    Games,
}

impl Category {
    pub fn title(self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Owner => "Owner",
            Self::Group => "Group",
            Self::Games => "Games",
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()>;
}

pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub usage: Option<String>,
    pub category: Category,
    pub capabilities: Capabilities,
    pub cooldown: Option<Duration>,
    handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new<H>(name: &str, description: &str, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        Self {
            name: name.to_lowercase(),
            aliases: Vec::new(),
            description: description.to_string(),
            usage: None,
            category: Category::General,
            capabilities: Capabilities::default(),
            cooldown: None,
            handler: Arc::new(handler),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_lowercase());
        self
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = Some(usage.to_string());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn owner_only(mut self) -> Self {
        self.capabilities.owner = OwnerGate::OwnerOnly;
        self
    }

    pub fn sudo(mut self) -> Self {
        self.capabilities.owner = OwnerGate::SudoOrOwner;
        self
    }

    pub fn group_only(mut self) -> Self {
        self.capabilities.group_only = true;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.capabilities.admin_only = true;
        self
    }

    pub fn bot_admin(mut self) -> Self {
        self.capabilities.bot_admin = true;
        self
    }

    /// Overrides the default per-sender cooldown for this command.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn handler(&self) -> Arc<dyn CommandHandler> {
        Arc::clone(&self.handler)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("category", &self.category)
            .field("capabilities", &self.capabilities)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command name cannot be empty")]
    EmptyName,
    #[error("command name '{0}' contains whitespace")]
    InvalidName(String),
    #[error("command name '{0}' is already registered")]
    Duplicate(String),
}

/// Commands in registration order, looked up by name or alias.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec) -> Result<(), RegistryError> {
        let mut seen = Vec::new();
        for name in spec.names() {
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if name.chars().any(char::is_whitespace) {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
            if self.index.contains_key(name) || seen.contains(&name) {
                return Err(RegistryError::Duplicate(name.to_string()));
            }
            seen.push(name);
        }

        let position = self.commands.len();
        for name in spec.names() {
            self.index.insert(name.to_string(), position);
        }
        self.commands.push(spec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|&position| self.commands.get(position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn run(&self, _ctx: &mut CommandContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lookup_by_name_and_alias_is_case_insensitive() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("Help", "list commands", Noop).alias("menu"))
            .expect("register");

        assert_eq!(registry.lookup("HELP").map(|s| s.name.as_str()), Some("help"));
        assert_eq!(registry.lookup("Menu").map(|s| s.name.as_str()), Some("help"));
        assert!(registry.lookup("nope").is_none());
    }

    #[test]
    fn duplicate_names_and_aliases_are_rejected() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("kick", "remove users", Noop).alias("remove"))
            .expect("register");

        assert_eq!(
            registry.register(CommandSpec::new("remove", "dup", Noop)),
            Err(RegistryError::Duplicate("remove".to_string()))
        );
        assert_eq!(
            registry.register(CommandSpec::new("ban", "dup alias", Noop).alias("kick")),
            Err(RegistryError::Duplicate("kick".to_string()))
        );
        assert_eq!(
            registry.register(CommandSpec::new("x", "self dup", Noop).alias("x")),
            Err(RegistryError::Duplicate("x".to_string()))
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("ban").is_none());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut registry = CommandRegistry::new();
        assert_eq!(
            registry.register(CommandSpec::new("", "empty", Noop)),
            Err(RegistryError::EmptyName)
        );
        assert_eq!(
            registry.register(CommandSpec::new("two words", "space", Noop)),
            Err(RegistryError::InvalidName("two words".to_string()))
        );
    }

    #[test]
    fn builder_sets_capabilities() {
        let spec = CommandSpec::new("kick", "remove users", Noop)
            .group_only()
            .admin_only()
            .bot_admin()
            .sudo()
            .cooldown(Duration::from_secs(3));
        assert_eq!(
            spec.capabilities,
            Capabilities {
                owner: OwnerGate::SudoOrOwner,
                group_only: true,
                admin_only: true,
                bot_admin: true,
            }
        );
        assert_eq!(spec.cooldown, Some(Duration::from_secs(3)));
    }
}
