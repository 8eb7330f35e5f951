use crate::context::{mention_tag, CommandContext};
use crate::registry::CommandHandler;
use anyhow::Result;
use async_trait::async_trait;
use forka_identity::Normalized;
use std::fmt::Write;

pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let registry = ctx.registry;
        let mut sections: Vec<(crate::registry::Category, Vec<String>)> = Vec::new();

        for spec in registry.iter() {
            if !ctx.may_run(spec).await {
                continue;
            }
            let mut line = format!("{}{}", ctx.bot.prefix, spec.name);
            if !spec.aliases.is_empty() {
                let _ = write!(line, " ({})", spec.aliases.join(", "));
            }
            let _ = write!(line, " - {}", spec.description);

            match sections.iter_mut().find(|(category, _)| *category == spec.category) {
                Some((_, lines)) => lines.push(line),
                None => sections.push((spec.category, vec![line])),
            }
        }
        sections.sort_by_key(|(category, _)| *category);

        let mut text = format!("🤖 *{}*\n", ctx.bot.name);
        for (category, lines) in sections {
            let _ = write!(text, "\n*{}*\n{}\n", category.title(), lines.join("\n"));
        }
        ctx.reply(text.trim_end().to_string()).await
    }
}

pub struct WhoAmI;

#[async_trait]
impl CommandHandler for WhoAmI {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let identity = match &ctx.sender {
            Normalized::Exact(id) => id.to_string(),
            Normalized::Lossy(id) => format!("{} (approximate)", id),
            Normalized::Conversation(_) | Normalized::Unknown => "unknown".to_string(),
        };
        let owner = ctx.is_owner();
        let sudo = ctx.is_sudo_or_owner() && !owner;
        let mode = ctx.settings.mode()?;

        let mut text = format!(
            "👤 *Who am I*\n\nIdentity : {}\nOwner    : {}\nSudo     : {}",
            identity,
            yes_no(owner),
            yes_no(sudo)
        );
        if ctx.is_group() {
            let admin = ctx
                .group_access()
                .await
                .is_some_and(|access| access.sender_is_admin);
            let _ = write!(text, "\nAdmin    : {}", yes_no(admin));
        }
        let _ = write!(text, "\nMode     : {}", mode);

        let mentions = vec![ctx.message.sender.clone()];
        ctx.reply_with_mentions(text, mentions).await
    }
}

pub struct Owner;

#[async_trait]
impl CommandHandler for Owner {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let owners = ctx.permissions.owners();
        if owners.is_empty() {
            return ctx.reply("👑 No owner configured").await;
        }

        let addresses: Vec<String> = owners
            .iter()
            .map(|id| ctx.permissions.identity().resolve_address(id))
            .collect();
        let name = ctx.bot.owner_name.as_deref().unwrap_or("Owner");
        let mut text = format!("👑 *{}*\n", name);
        for address in &addresses {
            let _ = write!(text, "\n{}", mention_tag(address));
        }
        ctx.reply_with_mentions(text, addresses).await
    }
}

pub struct Alive;

#[async_trait]
impl CommandHandler for Alive {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let mode = ctx.settings.mode()?;
        let number = ctx
            .permissions
            .resolve(ctx.permissions.agent_address())
            .into_identity()
            .map(|id| format!("+{}", id))
            .unwrap_or_else(|| "unknown".to_string());

        let text = format!(
            "🤖 *{}* is alive\n\nUptime  : {}\nPrefix  : {}\nOwner   : {}\nNumber  : {}\nMode    : {}\nVersion : {}",
            ctx.bot.name,
            format_uptime(ctx.started_at.elapsed().as_secs()),
            ctx.bot.prefix,
            ctx.bot.owner_name.as_deref().unwrap_or("Owner"),
            number,
            mode,
            env!("CARGO_PKG_VERSION")
        );
        let mentions = vec![ctx.message.sender.clone()];
        ctx.reply_with_mentions(text, mentions).await
    }
}

pub struct Runtime;

#[async_trait]
impl CommandHandler for Runtime {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let text = format!("⏱️ *Runtime*\n\n{}", format_uptime(ctx.started_at.elapsed().as_secs()));
        ctx.reply(text).await
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}
