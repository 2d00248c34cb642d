//! Per-role command tables.
//!
//! Each role maps to a fixed, statically known slice of [`CommandSpec`]s.
//! Nothing is ever registered at runtime, so what a role can do is fully
//! auditable here.

use crate::autocomplete;
use crate::role::Role;

/// How the dispatcher executes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Signout,
    Config,
    Userctl,
    Capture,
    Service,
    Firewall,
}

/// One entry in a role's command table.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: CommandKind,
    /// Completion vocabulary for the tokens after the command name.
    pub complete: Option<fn(&[&str]) -> Vec<String>>,
}

const HELP: CommandSpec = CommandSpec {
    name: "help",
    help: "list the commands available to your role",
    kind: CommandKind::Help,
    complete: None,
};

const SIGNOUT: CommandSpec = CommandSpec {
    name: "signout",
    help: "log out and return to the login prompt",
    kind: CommandKind::Signout,
    complete: None,
};

const CONFIG: CommandSpec = CommandSpec {
    name: "config",
    help: "inspect and edit configuration files",
    kind: CommandKind::Config,
    complete: Some(autocomplete::complete_config),
};

const USERCTL: CommandSpec = CommandSpec {
    name: "userctl",
    help: "manage accounts and roles",
    kind: CommandKind::Userctl,
    complete: Some(autocomplete::complete_userctl),
};

const TCPDUMP: CommandSpec = CommandSpec {
    name: "tcpdump",
    help: "run a restricted packet capture (ctrl-c to stop)",
    kind: CommandKind::Capture,
    complete: None,
};

const SYSTEMCTL: CommandSpec = CommandSpec {
    name: "systemctl",
    help: "control whitelisted services",
    kind: CommandKind::Service,
    complete: Some(autocomplete::complete_service),
};

const IPTABLES: CommandSpec = CommandSpec {
    name: "iptables",
    help: "inspect and edit firewall rules",
    kind: CommandKind::Firewall,
    complete: Some(autocomplete::complete_firewall),
};

static ROOT_TABLE: &[CommandSpec] = &[HELP, SIGNOUT, CONFIG, USERCTL, TCPDUMP, SYSTEMCTL, IPTABLES];
static ADMIN_TABLE: &[CommandSpec] = &[HELP, SIGNOUT, CONFIG, TCPDUMP, SYSTEMCTL];
static OPERATOR_TABLE: &[CommandSpec] = &[HELP, SIGNOUT, TCPDUMP];
static VIEWER_TABLE: &[CommandSpec] = &[HELP, SIGNOUT];

/// The command table for one role.
pub fn command_table(role: Role) -> &'static [CommandSpec] {
    match role {
        Role::Root => ROOT_TABLE,
        Role::Admin => ADMIN_TABLE,
        Role::Operator => OPERATOR_TABLE,
        Role::Viewer => VIEWER_TABLE,
    }
}

/// Look up a command in the role's table.
pub fn lookup(role: Role, name: &str) -> Option<&'static CommandSpec> {
    command_table(role).iter().find(|c| c.name == name)
}

/// True when some role knows the command. Used to tell a permission denial
/// apart from a typo; the root table is the superset of all tables.
pub fn known_anywhere(name: &str) -> bool {
    ROOT_TABLE.iter().any(|c| c.name == name)
}

/// The `help` output for a role.
pub fn help_text(role: Role) -> String {
    let mut out = String::from("available commands:\n");
    for spec in command_table(role) {
        out.push_str(&format!("  {:<10} {}\n", spec.name, spec.help));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_table_is_the_superset() {
        for role in [Role::Admin, Role::Operator, Role::Viewer] {
            for spec in command_table(role) {
                assert!(
                    lookup(Role::Root, spec.name).is_some(),
                    "{} missing from root table",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn every_role_can_help_and_signout() {
        for role in [Role::Root, Role::Admin, Role::Operator, Role::Viewer] {
            assert!(lookup(role, "help").is_some());
            assert!(lookup(role, "signout").is_some());
        }
    }

    #[test]
    fn privileged_commands_are_scoped() {
        assert!(lookup(Role::Root, "userctl").is_some());
        assert!(lookup(Role::Admin, "userctl").is_none());
        assert!(lookup(Role::Admin, "systemctl").is_some());
        assert!(lookup(Role::Operator, "systemctl").is_none());
        assert!(lookup(Role::Operator, "tcpdump").is_some());
        assert!(lookup(Role::Viewer, "tcpdump").is_none());
    }

    #[test]
    fn help_text_covers_the_whole_table() {
        let text = help_text(Role::Root);
        for spec in command_table(Role::Root) {
            assert!(text.contains(spec.name));
        }
    }

    #[test]
    fn unknown_names_are_known_nowhere() {
        assert!(!known_anywhere("bash"));
        assert!(known_anywhere("iptables"));
    }
}
