//! Prefix-based tab completion against a role's command table.
//!
//! Completion vocabularies are static, so for a fixed table the same
//! partial input always yields the same outcome.

use webcli_tools::{firewall, service};

use crate::commands::command_table;
use crate::config;
use crate::protocol::CompletionReply;
use crate::role::Role;
use crate::users;

/// Complete `partial` for a role. One candidate replaces the whole input
/// (with a trailing space so typing can continue), several are listed, and
/// none is a no-match.
pub fn complete(role: Role, partial: &str) -> CompletionReply {
    let mut tokens: Vec<&str> = partial.split_whitespace().collect();
    if partial.ends_with(' ') || tokens.is_empty() {
        tokens.push("");
    }
    let table = command_table(role);

    if tokens.len() == 1 {
        let candidates: Vec<String> = table
            .iter()
            .map(|c| c.name.to_string())
            .filter(|name| name.starts_with(tokens[0]))
            .collect();
        return reduce(candidates);
    }

    let Some(spec) = table.iter().find(|c| c.name == tokens[0]) else {
        return CompletionReply::NoMatch;
    };
    let Some(complete_fn) = spec.complete else {
        return CompletionReply::NoMatch;
    };
    let candidates: Vec<String> = complete_fn(&tokens[1..])
        .into_iter()
        .map(|suffix| format!("{} {}", spec.name, suffix))
        .collect();
    reduce(candidates)
}

fn reduce(mut candidates: Vec<String>) -> CompletionReply {
    candidates.sort();
    candidates.dedup();
    match candidates.len() {
        0 => CompletionReply::NoMatch,
        1 => CompletionReply::Replace {
            value: format!("{} ", candidates.remove(0)),
        },
        _ => CompletionReply::Matches { candidates },
    }
}

pub(crate) fn complete_userctl(tokens: &[&str]) -> Vec<String> {
    match tokens {
        [partial] => users::SUBCOMMANDS
            .iter()
            .filter(|s| s.starts_with(partial))
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn complete_service(tokens: &[&str]) -> Vec<String> {
    match tokens {
        [partial] => service::ALLOWED_SUBCOMMANDS
            .iter()
            .filter(|s| s.starts_with(partial))
            .map(|s| s.to_string())
            .collect(),
        [sub, partial] if service::ALLOWED_SUBCOMMANDS.contains(sub) => {
            let lowered = partial.to_ascii_lowercase();
            let bare = service::strip_unit_suffix(&lowered);
            service::ALLOWED_UNITS
                .iter()
                .filter(|unit| unit.starts_with(bare))
                .map(|unit| format!("{sub} {unit}.service"))
                .collect()
        }
        _ => Vec::new(),
    }
}

pub(crate) fn complete_firewall(tokens: &[&str]) -> Vec<String> {
    match tokens {
        [partial] => firewall::ACTIONS
            .iter()
            .filter(|a| a.starts_with(partial))
            .map(|a| a.to_string())
            .collect(),
        [action, partial] if firewall::ACTIONS.contains(action) => firewall::TABLES
            .iter()
            .filter(|t| t.starts_with(partial))
            .map(|t| format!("{action} {t}"))
            .collect(),
        [action, table, partial] if firewall::ACTIONS.contains(action) => {
            let upper = partial.to_ascii_uppercase();
            firewall::CHAINS
                .iter()
                .filter(|c| c.starts_with(&upper))
                .map(|c| format!("{action} {table} {c}"))
                .collect()
        }
        _ => Vec::new(),
    }
}

pub(crate) fn complete_config(tokens: &[&str]) -> Vec<String> {
    match tokens {
        [partial] => config::SUBCOMMANDS
            .iter()
            .filter(|s| s.starts_with(partial))
            .map(|s| s.to_string())
            .collect(),
        [sub, partial] if config::SUBCOMMANDS.contains(sub) && *sub != "list" => {
            config::MANAGED_FILES
                .iter()
                .map(|(name, _)| *name)
                .filter(|name| name.starts_with(partial))
                .map(|name| format!("{sub} {name}"))
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_lists_the_whole_table() {
        let CompletionReply::Matches { candidates } = complete(Role::Viewer, "") else {
            panic!("expected matches");
        };
        assert_eq!(candidates, vec!["help".to_string(), "signout".to_string()]);
    }

    #[test]
    fn unique_prefix_replaces_with_trailing_space() {
        let reply = complete(Role::Root, "user");
        assert_eq!(
            reply,
            CompletionReply::Replace {
                value: "userctl ".into()
            }
        );
    }

    #[test]
    fn ambiguous_prefix_lists_sorted_candidates() {
        let CompletionReply::Matches { candidates } = complete(Role::Root, "s") else {
            panic!("expected matches");
        };
        assert_eq!(
            candidates,
            vec!["signout".to_string(), "systemctl".to_string()]
        );
    }

    #[test]
    fn no_match_for_unknown_prefix() {
        assert_eq!(complete(Role::Root, "xyz"), CompletionReply::NoMatch);
    }

    #[test]
    fn role_scoping_applies() {
        // tcpdump is not in the viewer table
        assert_eq!(complete(Role::Viewer, "tcp"), CompletionReply::NoMatch);
        assert!(matches!(
            complete(Role::Operator, "tcp"),
            CompletionReply::Replace { .. }
        ));
    }

    #[test]
    fn subcommand_vocabularies_are_reached() {
        let reply = complete(Role::Root, "userctl a");
        assert_eq!(
            reply,
            CompletionReply::Replace {
                value: "userctl add ".into()
            }
        );

        let reply = complete(Role::Root, "systemctl restart n");
        assert_eq!(
            reply,
            CompletionReply::Replace {
                value: "systemctl restart nginx.service ".into()
            }
        );

        let reply = complete(Role::Root, "iptables block filter IN");
        assert_eq!(
            reply,
            CompletionReply::Replace {
                value: "iptables block filter INPUT ".into()
            }
        );
    }

    #[test]
    fn trailing_space_starts_a_new_token() {
        let CompletionReply::Matches { candidates } = complete(Role::Root, "userctl ") else {
            panic!("expected matches");
        };
        assert_eq!(candidates.len(), users::SUBCOMMANDS.len());
    }

    #[test]
    fn config_completion_offers_files() {
        let reply = complete(Role::Admin, "config show s");
        assert_eq!(
            reply,
            CompletionReply::Replace {
                value: "config show settings.toml ".into()
            }
        );
    }

    #[test]
    fn completion_is_idempotent() {
        for partial in ["", "s", "user", "systemctl re", "nonsense here"] {
            assert_eq!(
                complete(Role::Root, partial),
                complete(Role::Root, partial),
                "{partial:?} not stable"
            );
        }
    }
}
