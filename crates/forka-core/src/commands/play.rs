use crate::context::{mention_tag, CommandContext};
use crate::games::{Mark, MoveOutcome, MoveReport};
use crate::registry::CommandHandler;
use anyhow::Result;
use async_trait::async_trait;
use forka_identity::IdentityCache;
use std::fmt::Write;

pub struct TicTacToe;

#[async_trait]
impl CommandHandler for TicTacToe {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let Some(sender_id) = ctx.sender_id().cloned() else {
            return Ok(());
        };
        let conversation_id = ctx.conversation_id().to_string();

        if ctx.args.first().is_some_and(|arg| arg.eq_ignore_ascii_case("end")) {
            let is_player = ctx
                .games
                .get(&conversation_id)
                .map(|game| game.is_player(&sender_id));
            let text = match is_player {
                None => "No game is running in this chat".to_string(),
                Some(false) if !ctx.is_sudo_or_owner() => {
                    "Only the players can end this game".to_string()
                }
                Some(_) => {
                    ctx.games.end(&conversation_id);
                    "🛑 Game ended".to_string()
                }
            };
            return ctx.reply(text).await;
        }

        let started = ctx
            .games
            .start(&conversation_id, sender_id)
            .map(|game| game.render());
        let board = match started {
            Ok(board) => board,
            Err(e) => {
                let text = format!("❌ {}. Send {} to stop it.", e, ctx.prefixed("ttt end"));
                return ctx.reply(text).await;
            }
        };

        let creator = ctx.message.sender.clone();
        let text = format!(
            "🎮 *Tic-tac-toe*\n\n{}\n\n{} plays {}. Anyone can join as {} by sending {}<1-9>.",
            board,
            mention_tag(&creator),
            Mark::X.symbol(),
            Mark::O.symbol(),
            ctx.bot.prefix
        );
        ctx.reply_with_mentions(text, vec![creator]).await
    }
}

pub struct Leaderboard;

#[async_trait]
impl CommandHandler for Leaderboard {
    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let entries = ctx.games.leaderboard(ctx.conversation_id());
        if entries.is_empty() {
            return ctx.reply("🏆 No wins yet").await;
        }

        let mut text = String::from("🏆 *Leaderboard*\n");
        let mut mentions = Vec::with_capacity(entries.len());
        for (i, (id, wins)) in entries.iter().enumerate() {
            let address = ctx.permissions.identity().resolve_address(id);
            let _ = write!(text, "\n{}. {}: {}", i + 1, mention_tag(&address), wins);
            mentions.push(address);
        }
        ctx.reply_with_mentions(text, mentions).await
    }
}

/// Reply text and mentions describing a move that was just played.
pub(crate) fn describe_move(
    report: &MoveReport,
    identity: &IdentityCache,
    prefix: &str,
) -> (String, Vec<String>) {
    let board = report.game.render();
    match &report.outcome {
        MoveOutcome::Won { winner, mark } => {
            let address = identity.resolve_address(winner);
            let text = format!(
                "{}\n\n🏆 {} {} wins!",
                board,
                mark.symbol(),
                mention_tag(&address)
            );
            (text, vec![address])
        }
        MoveOutcome::Draw => (format!("{}\n\n🤝 It's a draw!", board), Vec::new()),
        MoveOutcome::Continue { next } => match report.game.player(*next) {
            Some(player) => {
                let address = identity.resolve_address(player);
                let text = format!(
                    "{}\n\nTurn: {} {}",
                    board,
                    next.symbol(),
                    mention_tag(&address)
                );
                (text, vec![address])
            }
            None => (
                format!(
                    "{}\n\nWaiting for {}: send {}<1-9> to join",
                    board,
                    next.symbol(),
                    prefix
                ),
                Vec::new(),
            ),
        },
    }
}
