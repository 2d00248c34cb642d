//! Firewall runner.
//!
//! Exposes four structured actions over the packet-filter tool: list and
//! flush a table/chain, and block or unblock a single source address.
//! Tables and chains come from fixed whitelists; addresses must parse as
//! real IPs before they reach the argv.

use std::net::IpAddr;
use std::path::PathBuf;

use tracing::info;

use crate::error::{Error, Result};
use crate::process;

/// Actions offered to the operator.
pub const ACTIONS: &[&str] = &["list", "flush", "block", "unblock"];

/// Tables that may be inspected or modified.
pub const TABLES: &[&str] = &["filter", "nat", "mangle", "raw", "security"];

/// Built-in chains that may be referenced.
pub const CHAINS: &[&str] = &["INPUT", "OUTPUT", "FORWARD", "PREROUTING", "POSTROUTING"];

/// Firewall runner configuration.
#[derive(Debug, Clone)]
pub struct FirewallConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/iptables"),
            timeout_secs: 30,
        }
    }
}

/// Runner for the packet-filter tool.
#[derive(Debug, Clone)]
pub struct FirewallRunner {
    config: FirewallConfig,
}

impl FirewallRunner {
    pub fn new(config: FirewallConfig) -> Self {
        Self { config }
    }

    /// Execute one firewall action. `args` are the tokens after the command
    /// name, e.g. `["block", "filter", "INPUT", "10.0.0.9"]`.
    pub async fn run(&self, args: &[String]) -> Result<String> {
        let action = args
            .first()
            .ok_or_else(|| Error::Rejected("usage: iptables <list|flush|block|unblock>".into()))?
            .to_ascii_lowercase();

        let (header, argv) = match action.as_str() {
            "list" => {
                let (table, chain) = table_and_chain(&args[1..])?;
                let mut argv = vec![
                    "-t".to_string(),
                    table.clone(),
                    "-L".to_string(),
                    "-n".to_string(),
                    "-v".to_string(),
                ];
                if let Some(chain) = &chain {
                    argv.push(chain.clone());
                }
                (describe("listing rules in", &table, chain.as_deref()), argv)
            }
            "flush" => {
                let (table, chain) = table_and_chain(&args[1..])?;
                let mut argv = vec!["-t".to_string(), table.clone(), "-F".to_string()];
                if let Some(chain) = &chain {
                    argv.push(chain.clone());
                }
                (describe("flushing", &table, chain.as_deref()), argv)
            }
            "block" | "unblock" => {
                let [table, chain, addr] = &args[1..] else {
                    return Err(Error::Rejected(format!(
                        "usage: iptables {action} <table> <chain> <ip>"
                    )));
                };
                let table = checked_table(table)?;
                let chain = checked_chain(chain)?;
                let addr: IpAddr = addr
                    .parse()
                    .map_err(|_| Error::Rejected(format!("invalid ip address '{addr}'")))?;
                let rule_flag = if action == "block" { "-A" } else { "-D" };
                let argv = vec![
                    "-t".to_string(),
                    table.clone(),
                    rule_flag.to_string(),
                    chain.clone(),
                    "-s".to_string(),
                    addr.to_string(),
                    "-j".to_string(),
                    "DROP".to_string(),
                ];
                let verb = if action == "block" {
                    "blocking"
                } else {
                    "unblocking"
                };
                (format!("{verb} {addr} in {table}/{chain}"), argv)
            }
            other => {
                return Err(Error::Rejected(format!(
                    "unsupported firewall action '{other}'"
                )));
            }
        };

        info!(action = %action, "firewall command");
        let out = process::run_captured(
            &self.config.binary,
            &argv,
            "iptables",
            self.config.timeout_secs,
        )
        .await?;

        let mut text = header;
        if !out.stdout.is_empty() {
            text.push('\n');
            text.push_str(out.stdout.trim_end());
        }
        if !out.stderr.is_empty() {
            text.push('\n');
            text.push_str(out.stderr.trim_end());
        }
        if out.exit_code != 0 {
            text.push_str(&format!("\n(exit code {})", out.exit_code));
        }
        Ok(text)
    }
}

fn checked_table(table: &str) -> Result<String> {
    let table = table.to_ascii_lowercase();
    if !TABLES.contains(&table.as_str()) {
        return Err(Error::Rejected(format!("invalid table '{table}'")));
    }
    Ok(table)
}

fn checked_chain(chain: &str) -> Result<String> {
    let chain = chain.to_ascii_uppercase();
    if !CHAINS.contains(&chain.as_str()) {
        return Err(Error::Rejected(format!("invalid chain '{chain}'")));
    }
    Ok(chain)
}

/// list/flush take an optional table (default `filter`) and optional chain.
fn table_and_chain(rest: &[String]) -> Result<(String, Option<String>)> {
    let table = match rest.first() {
        Some(t) => checked_table(t)?,
        None => "filter".to_string(),
    };
    let chain = match rest.get(1) {
        Some(c) => Some(checked_chain(c)?),
        None => None,
    };
    if rest.len() > 2 {
        return Err(Error::Rejected("too many arguments".into()));
    }
    Ok((table, chain))
}

fn describe(verb: &str, table: &str, chain: Option<&str>) -> String {
    match chain {
        Some(chain) => format!("{verb} table '{table}', chain '{chain}'"),
        None => format!("{verb} table '{table}'"),
    }
}
