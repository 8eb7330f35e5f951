use crate::context::{mention_tag, CommandContext};
use crate::registry::CommandHandler;
use anyhow::Result;
use async_trait::async_trait;
use forka_identity::CanonicalId;
use forka_storage::BotMode;
use std::fmt::Write;

pub struct Mode;

#[async_trait]
impl CommandHandler for Mode {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let Some(requested) = ctx.args.first() else {
            let mode = ctx.settings.mode()?;
            return ctx.reply(format!("⚙️ Mode: *{}*", mode)).await;
        };

        let mode = match requested.parse::<BotMode>() {
            Ok(mode) => mode,
            Err(_) => {
                let usage = format!("Usage: {} public|private", ctx.prefixed("mode"));
                return ctx.reply(usage).await;
            }
        };
        ctx.settings.set_mode(mode)?;
        ctx.reply(format!("✅ Mode set to *{}*", mode)).await
    }
}

/// Identities a sudo command applies to. Only exact identities qualify.
fn sudo_targets(ctx: &CommandContext<'_>) -> Vec<CanonicalId> {
    let mut targets: Vec<CanonicalId> = Vec::new();
    for address in ctx.targets() {
        if let Some(id) = ctx.permissions.resolve(&address).trusted() {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }
    }
    targets
}

pub struct AddSudo;

#[async_trait]
impl CommandHandler for AddSudo {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let targets = sudo_targets(ctx);
        if targets.is_empty() {
            let usage = format!("Usage: {} @user | number", ctx.prefixed("addsudo"));
            return ctx.reply(usage).await;
        }

        let granted_by = ctx.permissions.resolve(&ctx.message.sender).trusted().cloned();
        let mut text = String::from("🛡️ *Sudo*\n");
        for id in &targets {
            let status = if ctx.settings.add_sudo(id, granted_by.as_ref())? {
                "added"
            } else {
                "already sudo"
            };
            let _ = write!(text, "\n{} {}", id, status);
        }
        ctx.reply(text).await
    }
}

pub struct DelSudo;

#[async_trait]
impl CommandHandler for DelSudo {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let targets = sudo_targets(ctx);
        if targets.is_empty() {
            let usage = format!("Usage: {} @user | number", ctx.prefixed("delsudo"));
            return ctx.reply(usage).await;
        }

        let mut text = String::from("🛡️ *Sudo*\n");
        for id in &targets {
            let status = if ctx.settings.remove_sudo(id)? {
                "removed"
            } else {
                "was not sudo"
            };
            let _ = write!(text, "\n{} {}", id, status);
        }
        ctx.reply(text).await
    }
}

pub struct ListSudo;

#[async_trait]
impl CommandHandler for ListSudo {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let users = ctx.settings.sudo_users()?;
        if users.is_empty() {
            return ctx.reply("🛡️ No sudo users").await;
        }

        let addresses: Vec<String> = users
            .iter()
            .map(|id| ctx.permissions.identity().resolve_address(id))
            .collect();
        let mut text = format!("🛡️ *Sudo users* ({})\n", users.len());
        for (i, address) in addresses.iter().enumerate() {
            let _ = write!(text, "\n{}. {}", i + 1, mention_tag(address));
        }
        ctx.reply_with_mentions(text, addresses).await
    }
}
