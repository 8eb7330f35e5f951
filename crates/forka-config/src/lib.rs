//! Forka Configuration
//!
//! TOML configuration loading with environment variable overrides

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const ENV_BOT_NAME: &str = "BOT_NAME";
pub const ENV_PREFIX: &str = "PREFIX";
pub const ENV_OWNER_NUMBER: &str = "OWNER_NUMBER";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub policy: Option<PolicyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Comma-separated owner phone numbers.
    #[serde(default)]
    pub owners: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    /// Minimum interval between two commands of the same sender.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Reply to senders refused by private mode instead of staying silent.
    #[serde(default)]
    pub announce_private_mode: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            prefix: default_prefix(),
            owners: String::new(),
            owner_name: None,
            cooldown_ms: default_cooldown_ms(),
            announce_private_mode: false,
        }
    }
}

impl BotConfig {
    /// Owner numbers reduced to their digits, empty entries dropped.
    pub fn owner_numbers(&self) -> Vec<String> {
        self.owners
            .split(',')
            .map(|entry| entry.chars().filter(char::is_ascii_digit).collect::<String>())
            .filter(|digits| !digits.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_group_ttl_ms")]
    pub group_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group_ttl_ms: default_group_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    pub allowlist: Option<Vec<String>>,
    pub denylist: Option<Vec<String>>,
}

fn default_bot_name() -> String {
    "Forka".to_string()
}

fn default_prefix() -> String {
    ".".to_string()
}

fn default_cooldown_ms() -> u64 {
    1800
}

fn default_group_ttl_ms() -> u64 {
    5000
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise starts from defaults. Environment
    /// overrides apply either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("forka").join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(name) = non_empty(ENV_BOT_NAME) {
            self.bot.name = name.trim().to_string();
        }
        if let Some(prefix) = non_empty(ENV_PREFIX) {
            self.bot.prefix = prefix.trim().to_string();
        }
        if let Some(owners) = non_empty(ENV_OWNER_NUMBER) {
            self.bot.owners = owners;
        }
    }

    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(data_dir) = &self.core.data_dir {
            if data_dir == "~" || data_dir.starts_with("~/") {
                let home =
                    dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Home directory not found"))?;
                if data_dir == "~" {
                    Ok(home)
                } else {
                    Ok(home.join(data_dir.trim_start_matches("~/")))
                }
            } else {
                Ok(PathBuf::from(data_dir))
            }
        } else {
            let home =
                dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Home directory not found"))?;
            Ok(home.join(".forka"))
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bot.name.trim().is_empty() {
            anyhow::bail!("bot.name cannot be empty");
        }

        let prefix = &self.bot.prefix;
        if prefix.is_empty() {
            anyhow::bail!("bot.prefix cannot be empty");
        }
        if prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("bot.prefix cannot contain whitespace");
        }
        if prefix.chars().count() > 3 {
            anyhow::bail!("bot.prefix must be at most 3 characters");
        }

        let mut seen = HashSet::new();
        for entry in self.bot.owners.split(',') {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                anyhow::bail!("bot.owners entry '{}' contains no digits", trimmed);
            }
            if !seen.insert(digits.clone()) {
                anyhow::bail!("Duplicate owner number '{}'", digits);
            }
        }

        if self.bot.cooldown_ms > 60_000 {
            anyhow::bail!("bot.cooldown_ms must be in range 0..=60000");
        }

        if self.cache.group_ttl_ms == 0 || self.cache.group_ttl_ms > 30 * 60 * 1000 {
            anyhow::bail!("cache.group_ttl_ms must be in range 1..=1800000");
        }

        if let Some(policy) = &self.policy {
            for item in policy.allowlist.iter().flatten() {
                if item.trim().is_empty() {
                    anyhow::bail!("policy.allowlist contains an empty conversation id");
                }
            }
            for item in policy.denylist.iter().flatten() {
                if item.trim().is_empty() {
                    anyhow::bail!("policy.denylist contains an empty conversation id");
                }
            }
        }

        if let Some(level) = &self.core.log_level {
            if level.trim().is_empty() {
                anyhow::bail!("core.log_level cannot be empty");
            }
        }

        Ok(())
    }

    /// Starter configuration written by `forka config init`.
    pub fn template() -> &'static str {
        r#"[core]
# data_dir = "~/.forka"
log_level = "info"

[bot]
name = "Forka"
prefix = "."
# Comma-separated owner numbers, e.g. "393331234567,15551234567"
owners = ""
cooldown_ms = 1800
announce_private_mode = false

[cache]
group_ttl_ms = 5000

# [policy]
# allowlist = ["120363041234567890@g.us"]
# denylist = []
"#
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::collections::HashMap;

    fn parse_config(input: &str) -> Config {
        let cfg: Config = toml::from_str(input).expect("valid TOML");
        cfg
    }

    #[test]
    fn defaults_match_original_bot() {
        let cfg = parse_config("");
        assert_eq!(cfg.bot.name, "Forka");
        assert_eq!(cfg.bot.prefix, ".");
        assert_eq!(cfg.bot.cooldown_ms, 1800);
        assert_eq!(cfg.cache.group_ttl_ms, 5000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn owner_numbers_are_split_and_reduced_to_digits() {
        let cfg = parse_config(
            r#"
[bot]
owners = "+39 333 123 4567, 1-555-1234 ,,"
"#,
        );
        assert_eq!(cfg.bot.owner_numbers(), vec!["393331234567", "15551234"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_owner_without_digits() {
        let cfg = parse_config(
            r#"
[bot]
owners = "393331234567,owner"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_owner() {
        let cfg = parse_config(
            r#"
[bot]
owners = "+39 333 1234567,393331234567"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_whitespace_prefix() {
        let cfg = parse_config(
            r#"
[bot]
prefix = "! "
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let cfg = parse_config(
            r#"
[cache]
group_ttl_ms = 0
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_policy_entry() {
        let cfg = parse_config(
            r#"
[policy]
denylist = [" "]
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_bot_fields() {
        let mut cfg = parse_config(
            r#"
[bot]
name = "Forka"
prefix = "."
"#,
        );
        let env: HashMap<&str, &str> = [
            ("BOT_NAME", "Sentinel"),
            ("PREFIX", "!"),
            ("OWNER_NUMBER", "5551234"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.bot.name, "Sentinel");
        assert_eq!(cfg.bot.prefix, "!");
        assert_eq!(cfg.bot.owner_numbers(), vec!["5551234"]);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = parse_config("");
        cfg.apply_overrides_from(|_| Some("  ".to_string()));
        assert_eq!(cfg.bot.prefix, ".");
    }

    #[test]
    fn template_is_valid() {
        let cfg = parse_config(Config::template());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_data_dir_is_used_verbatim() {
        let cfg = parse_config(
            r#"
[core]
data_dir = "/var/lib/forka"
"#,
        );
        assert_eq!(
            cfg.data_dir().expect("data dir"),
            std::path::PathBuf::from("/var/lib/forka")
        );
    }
}
