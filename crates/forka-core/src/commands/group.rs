use crate::context::{mention_tag, CommandContext};
use crate::registry::CommandHandler;
use anyhow::Result;
use async_trait::async_trait;
use forka_identity::CanonicalId;
use forka_ipc::{AdminLevel, GroupSetting, ParticipantAction};
use forka_policy::GroupAccess;
use std::fmt::Write;
use tracing::warn;

const INVITE_BASE_URL: &str = "https://chat.whatsapp.com/";
const DESCRIPTION_PREVIEW_CHARS: usize = 120;

/// Loaded group access, or a reply explaining that members are unavailable.
async fn require_members(ctx: &mut CommandContext<'_>) -> Result<Option<GroupAccess>> {
    let access = ctx.group_access().await;
    match access {
        Some(access) if access.snapshot.authoritative => Ok(Some(access)),
        _ => {
            ctx.reply("❌ Could not load group members").await?;
            Ok(None)
        }
    }
}

async fn report_failure(ctx: &mut CommandContext<'_>, error: anyhow::Error) -> Result<()> {
    warn!(
        "{} failed in {}: {}",
        ctx.command,
        ctx.conversation_id(),
        error
    );
    ctx.reply(format!("❌ Failed: {}", error)).await
}

pub struct Add;

#[async_trait]
impl CommandHandler for Add {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let number = ctx.args.first().map(String::as_str).unwrap_or_default();
        let Some(id) = CanonicalId::from_number(number) else {
            let usage = format!("Usage: {} 628123456789", ctx.prefixed("add"));
            return ctx.reply(usage).await;
        };

        let address = id.primary_address();
        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx
            .platform
            .update_participants(&conversation_id, &[address], ParticipantAction::Add)
            .await;
        match result {
            Ok(()) => {
                ctx.invalidate_group();
                ctx.reply(format!("✅ Added +{}", id)).await
            }
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

/// kick, promote and demote.
pub struct UpdateParticipants(pub ParticipantAction);

impl UpdateParticipants {
    fn done(&self) -> &'static str {
        match self.0 {
            ParticipantAction::Add => "Added",
            ParticipantAction::Remove => "Removed",
            ParticipantAction::Promote => "Promoted",
            ParticipantAction::Demote => "Demoted",
        }
    }
}

#[async_trait]
impl CommandHandler for UpdateParticipants {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let agent = ctx.permissions.agent_address().to_string();
        let targets: Vec<String> = ctx
            .targets()
            .into_iter()
            .filter(|address| !ctx.permissions.identity().same_participant(address, &agent))
            .collect();
        if targets.is_empty() {
            let hint = if self.0 == ParticipantAction::Remove {
                "Mention someone to kick"
            } else {
                "Mention someone"
            };
            return ctx.reply(hint).await;
        }

        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx
            .platform
            .update_participants(&conversation_id, &targets, self.0)
            .await;
        match result {
            Ok(()) => {
                ctx.invalidate_group();
                let text = format!("✅ {} {} user(s)", self.done(), targets.len());
                ctx.reply(text).await
            }
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

pub struct Lock;

#[async_trait]
impl CommandHandler for Lock {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let mode = ctx.args.first().map(|arg| arg.to_lowercase());
        let (setting, state) = match mode.as_deref() {
            Some("open") => (GroupSetting::NotAnnouncement, "open"),
            Some("close") => (GroupSetting::Announcement, "closed"),
            _ => {
                let usage = format!("Usage: {} open / close", ctx.prefixed("group"));
                return ctx.reply(usage).await;
            }
        };

        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx.platform.update_setting(&conversation_id, setting).await;
        match result {
            Ok(()) => {
                ctx.invalidate_group();
                ctx.reply(format!("✅ Group is now {} for non-admins", state))
                    .await
            }
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

pub struct SetName;

#[async_trait]
impl CommandHandler for SetName {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let name = ctx.rest();
        if name.is_empty() {
            let usage = format!("Usage: {} New Group Name", ctx.prefixed("setname"));
            return ctx.reply(usage).await;
        }

        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx
            .platform
            .update_setting(&conversation_id, GroupSetting::Subject(name))
            .await;
        match result {
            Ok(()) => {
                ctx.invalidate_group();
                ctx.reply("✅ Group name updated").await
            }
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

pub struct SetDescription;

#[async_trait]
impl CommandHandler for SetDescription {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let description = ctx.rest();
        if description.is_empty() {
            let usage = format!("Usage: {} New description", ctx.prefixed("setdesc"));
            return ctx.reply(usage).await;
        }

        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx
            .platform
            .update_setting(&conversation_id, GroupSetting::Description(description))
            .await;
        match result {
            Ok(()) => {
                ctx.invalidate_group();
                ctx.reply("✅ Group description updated").await
            }
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

pub struct Link;

#[async_trait]
impl CommandHandler for Link {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let conversation_id = ctx.conversation_id().to_string();
        let result = ctx.platform.invite_code(&conversation_id).await;
        match result {
            Ok(code) => ctx.reply(format!("🔗 {}{}", INVITE_BASE_URL, code)).await,
            Err(e) => report_failure(ctx, e).await,
        }
    }
}

pub struct TagAll;

#[async_trait]
impl CommandHandler for TagAll {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let Some(access) = require_members(ctx).await? else {
            return Ok(());
        };

        let rest = ctx.rest();
        let headline = if rest.is_empty() {
            "Attention everyone!"
        } else {
            rest.as_str()
        };
        let members: Vec<String> = access
            .snapshot
            .participants
            .iter()
            .map(|p| p.address.clone())
            .collect();

        let mut text = format!("📢 *{}*\n", headline);
        for (i, address) in members.iter().enumerate() {
            let _ = write!(text, "\n{}. {}", i + 1, mention_tag(address));
        }
        ctx.reply_with_mentions(text, members).await
    }
}

pub struct Admins;

#[async_trait]
impl CommandHandler for Admins {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let Some(access) = require_members(ctx).await? else {
            return Ok(());
        };

        let admins: Vec<_> = access.snapshot.admins().collect();
        let mut text = format!("👑 *ADMINS* ({})\n", admins.len());
        for (i, admin) in admins.iter().enumerate() {
            let _ = write!(text, "\n{}. {}", i + 1, mention_tag(&admin.address));
            if admin.admin == AdminLevel::SuperAdmin {
                text.push_str(" 👑 Creator");
            }
        }
        let mentions = admins.iter().map(|a| a.address.clone()).collect();
        ctx.reply_with_mentions(text, mentions).await
    }
}

pub struct Info;

#[async_trait]
impl CommandHandler for Info {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let Some(access) = require_members(ctx).await? else {
            return Ok(());
        };
        let snapshot = &access.snapshot;

        let description: String = snapshot
            .description
            .as_deref()
            .filter(|desc| !desc.trim().is_empty())
            .map(|desc| desc.chars().take(DESCRIPTION_PREVIEW_CHARS).collect())
            .unwrap_or_else(|| "No description".to_string());
        let id = snapshot
            .conversation_id
            .split('@')
            .next()
            .unwrap_or(&snapshot.conversation_id);

        let text = format!(
            "📊 *GROUP INFO*\n\nName    : {}\nID      : {}\nMembers : {}\nAdmins  : {}\nLocked  : {}\nDesc    : {}",
            snapshot.subject.as_deref().unwrap_or("-"),
            id,
            snapshot.len(),
            snapshot.admins().count(),
            if snapshot.announce { "Yes" } else { "No" },
            description
        );
        ctx.reply(text).await
    }
}

pub struct Refresh;

#[async_trait]
impl CommandHandler for Refresh {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        ctx.invalidate_group();
        let Some(access) = require_members(ctx).await? else {
            return Ok(());
        };
        let text = format!(
            "🔄 Group data refreshed: {} members, bot admin: {}",
            access.snapshot.len(),
            if access.agent_is_admin() { "yes" } else { "no" }
        );
        ctx.reply(text).await
    }
}
