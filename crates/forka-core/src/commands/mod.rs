//! Built-in commands.

mod general;
mod group;
mod owner;
mod play;

pub(crate) use play::describe_move;

use crate::registry::{Category, CommandRegistry, CommandSpec, RegistryError};
use forka_ipc::ParticipantAction;

pub fn builtin_registry() -> Result<CommandRegistry, RegistryError> {
    let mut registry = CommandRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

pub fn register_builtins(registry: &mut CommandRegistry) -> Result<(), RegistryError> {
    use Category::{Games, General, Group, Owner};

    // General
    registry.register(
        CommandSpec::new("help", "List the commands you can use here", general::Help)
            .alias("menu")
            .category(General),
    )?;
    registry.register(
        CommandSpec::new("whoami", "Show your identity and roles", general::WhoAmI)
            .category(General),
    )?;
    registry.register(
        CommandSpec::new("alive", "Show bot status", general::Alive)
            .alias("ping")
            .alias("botinfo")
            .category(General),
    )?;
    registry.register(
        CommandSpec::new("owner", "Show the bot owner", general::Owner).category(General),
    )?;
    registry.register(
        CommandSpec::new("runtime", "Show bot uptime", general::Runtime)
            .alias("uptime")
            .category(General),
    )?;

    // Owner
    registry.register(
        CommandSpec::new("mode", "Show or switch public/private mode", owner::Mode)
            .usage("mode [public|private]")
            .category(Owner)
            .owner_only(),
    )?;
    registry.register(
        CommandSpec::new("addsudo", "Grant sudo to users", owner::AddSudo)
            .usage("addsudo @user | number")
            .category(Owner)
            .owner_only(),
    )?;
    registry.register(
        CommandSpec::new("delsudo", "Revoke sudo from users", owner::DelSudo)
            .usage("delsudo @user | number")
            .category(Owner)
            .owner_only(),
    )?;
    registry.register(
        CommandSpec::new("listsudo", "List sudo users", owner::ListSudo)
            .alias("sudolist")
            .category(Owner)
            .sudo(),
    )?;

    // Group administration
    registry.register(
        CommandSpec::new("add", "Add a number to the group", group::Add)
            .usage("add 628123456789")
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin(),
    )?;
    let participant_commands = [
        ("kick", "Remove mentioned users", ParticipantAction::Remove),
        ("promote", "Make mentioned users admin", ParticipantAction::Promote),
        ("demote", "Remove admin from mentioned users", ParticipantAction::Demote),
    ];
    for (name, description, action) in participant_commands {
        let mut spec = CommandSpec::new(name, description, group::UpdateParticipants(action))
            .usage(&format!("{} @user", name))
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin();
        if action == ParticipantAction::Remove {
            spec = spec.alias("remove");
        }
        registry.register(spec)?;
    }
    registry.register(
        CommandSpec::new("group", "Open or close the group", group::Lock)
            .usage("group open|close")
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin(),
    )?;
    registry.register(
        CommandSpec::new("setname", "Change the group name", group::SetName)
            .usage("setname New Group Name")
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin(),
    )?;
    registry.register(
        CommandSpec::new("setdesc", "Change the group description", group::SetDescription)
            .usage("setdesc New description")
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin(),
    )?;
    registry.register(
        CommandSpec::new("link", "Get the group invite link", group::Link)
            .category(Group)
            .group_only()
            .admin_only()
            .bot_admin(),
    )?;
    registry.register(
        CommandSpec::new("tagall", "Mention every member", group::TagAll)
            .usage("tagall [message]")
            .category(Group)
            .group_only()
            .admin_only(),
    )?;
    registry.register(
        CommandSpec::new("admins", "List group admins", group::Admins)
            .category(Group)
            .group_only(),
    )?;
    registry.register(
        CommandSpec::new("groupinfo", "Show group details", group::Info)
            .category(Group)
            .group_only(),
    )?;
    registry.register(
        CommandSpec::new("refresh", "Reload group members and roles", group::Refresh)
            .category(Group)
            .group_only()
            .admin_only(),
    )?;

    // Games
    registry.register(
        CommandSpec::new("ttt", "Start or end a tic-tac-toe game", play::TicTacToe)
            .alias("tictactoe")
            .usage("ttt [end]")
            .category(Games)
            .group_only(),
    )?;
    registry.register(
        CommandSpec::new("leaderboard", "Tic-tac-toe wins in this group", play::Leaderboard)
            .alias("lb")
            .category(Games)
            .group_only(),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OwnerGate;

    #[test]
    fn builtins_register_without_conflicts() {
        let registry = builtin_registry().expect("builtins");
        assert_eq!(registry.len(), 23);
        for name in ["menu", "ping", "botinfo", "uptime", "sudolist", "remove", "tictactoe", "lb"] {
            assert!(registry.lookup(name).is_some(), "{}", name);
        }
    }

    #[test]
    fn capability_table_matches_command_roles() {
        let registry = builtin_registry().expect("builtins");
        let caps = |name: &str| registry.lookup(name).expect(name).capabilities;

        assert_eq!(caps("mode").owner, OwnerGate::OwnerOnly);
        assert_eq!(caps("addsudo").owner, OwnerGate::OwnerOnly);
        assert_eq!(caps("listsudo").owner, OwnerGate::SudoOrOwner);

        let kick = caps("kick");
        assert!(kick.group_only && kick.admin_only && kick.bot_admin);
        let tagall = caps("tagall");
        assert!(tagall.admin_only && !tagall.bot_admin);
        let admins = caps("admins");
        assert!(admins.group_only && !admins.admin_only);
        assert_eq!(caps("help"), Default::default());
    }
}
