//! Line parsing and role-routed command dispatch.

use tracing::warn;

use crate::commands::{self, CommandKind};
use crate::config;
use crate::error::{Error, Result};
use crate::session::{Services, SessionIo};
use crate::users::{self, Principal};

/// What the session loop should do after a dispatched line.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Return to the login prompt.
    Signout,
    /// Start a streaming capture job with these raw tokens.
    Capture(Vec<String>),
}

/// Parse one accepted command line and run its handler.
///
/// Handler failures come back as a single user-visible line and never end
/// the session; only transport loss propagates as an error.
pub async fn dispatch(
    io: &mut SessionIo,
    services: &Services,
    actor: &Principal,
    line: &str,
) -> Result<Flow> {
    let tokens = match shell_words::split(line) {
        Ok(tokens) => tokens,
        Err(_) => {
            io.send_line("❌ could not parse command (unbalanced quotes)");
            return Ok(Flow::Continue);
        }
    };
    let Some(name) = tokens.first() else {
        return Ok(Flow::Continue);
    };
    let args = &tokens[1..];

    let Some(spec) = commands::lookup(actor.role, name) else {
        if commands::known_anywhere(name) {
            io.send_line(format!(
                "❌ permission denied: '{name}' is not available to your role"
            ));
        } else {
            io.send_line(format!("❓ unknown command '{name}' (try 'help')"));
        }
        return Ok(Flow::Continue);
    };

    let outcome = match spec.kind {
        CommandKind::Help => {
            io.send_line(commands::help_text(actor.role));
            Ok(())
        }
        CommandKind::Signout => {
            io.send_line("🚪 signing out.");
            return Ok(Flow::Signout);
        }
        CommandKind::Capture => return Ok(Flow::Capture(args.to_vec())),
        CommandKind::Config => config::run_config(io, services, actor, args).await,
        CommandKind::Userctl => users::run_userctl(io, &services.users, actor, args).await,
        CommandKind::Service => run_service(io, services, args).await,
        CommandKind::Firewall => run_firewall(io, services, args).await,
    };

    match outcome {
        Ok(()) => Ok(Flow::Continue),
        Err(Error::Transport) => Err(Error::Transport),
        Err(err) => {
            warn!(command = %name, user = %actor.username, error = %err, "command failed");
            io.send_line(format!("❌ {err}"));
            Ok(Flow::Continue)
        }
    }
}

async fn run_service(io: &mut SessionIo, services: &Services, args: &[String]) -> Result<()> {
    let [subcommand, unit] = args else {
        io.send_line("usage: systemctl <subcommand> <unit>");
        return Ok(());
    };
    io.send_line(format!("🛠 systemctl {subcommand} {unit}"));
    let text = services.service.run(subcommand, unit).await?;
    if !text.is_empty() {
        io.send_line(text);
    }
    Ok(())
}

async fn run_firewall(io: &mut SessionIo, services: &Services, args: &[String]) -> Result<()> {
    let text = services.firewall.run(args).await?;
    io.send_line(text);
    Ok(())
}
