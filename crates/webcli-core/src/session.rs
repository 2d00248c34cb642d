//! Per-connection session state machine.
//!
//! One session runs per transport connection. It owns all mutable
//! per-connection state (authentication progress, command history, the
//! foreground-job slot) and is driven entirely over channels, so the
//! transport layer stays a thin pump. Teardown always reaps any running
//! job: no privileged subprocess outlives its session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use webcli_tools::{CaptureRunner, FirewallRunner, JobSlot, ServiceRunner};

use crate::autocomplete;
use crate::config::ConfigManager;
use crate::dispatch::{self, Flow};
use crate::error::{Error, Result};
use crate::protocol::{ClientFrame, CompletionReply, ServerFrame};
use crate::users::{Principal, UserStore};

/// Limits applied to every session.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Failed logins allowed before the connection is closed.
    pub max_auth_attempts: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_auth_attempts: 3,
        }
    }
}

/// Everything a session needs to execute commands. One instance is shared
/// by all connections; the stores are file-backed and the runners hold
/// only configuration.
pub struct Services {
    pub users: UserStore,
    pub config: ConfigManager,
    pub capture: CaptureRunner,
    pub service: ServiceRunner,
    pub firewall: FirewallRunner,
    pub limits: SessionLimits,
}

/// Lifecycle states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUsername,
    AwaitingPassword,
    Authenticated,
    Terminated,
}

/// Channel-facing half of a session: outbound frames, inbound frames, and
/// the command history.
pub struct SessionIo {
    outbound: mpsc::UnboundedSender<ServerFrame>,
    inbound: mpsc::UnboundedReceiver<ClientFrame>,
    history: Vec<String>,
}

impl SessionIo {
    pub fn send(&self, frame: ServerFrame) {
        let _ = self.outbound.send(frame);
    }

    pub fn send_line(&self, text: impl Into<String>) {
        self.send(ServerFrame::Output { text: text.into() });
    }

    pub fn send_prompt(&self, label: impl Into<String>, masked: bool) {
        self.send(ServerFrame::Prompt {
            label: label.into(),
            masked,
        });
    }

    /// Accepted command lines, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Prompt for one line of input. `Ok(None)` means the user interrupted
    /// the interactive flow. Masked lines are never recorded anywhere.
    pub async fn read_line(&mut self, label: &str, masked: bool) -> Result<Option<String>> {
        self.send_prompt(label, masked);
        loop {
            match self.inbound.recv().await {
                None => return Err(Error::Transport),
                Some(ClientFrame::Line { text }) => return Ok(Some(text)),
                Some(ClientFrame::Interrupt) => return Ok(None),
                Some(ClientFrame::Tab { .. }) => {
                    // no completion inside interactive prompts
                    self.send(ServerFrame::Completion {
                        reply: CompletionReply::NoMatch,
                    });
                }
            }
        }
    }
}

enum SessionEvent {
    JobFinished(u64),
}

/// One connection's state machine: login, the authenticated shell, and
/// teardown.
pub struct Session {
    id: Uuid,
    state: SessionState,
    io: SessionIo,
    job: JobSlot,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    pub fn new(
        inbound: mpsc::UnboundedReceiver<ClientFrame>,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            state: SessionState::AwaitingUsername,
            io: SessionIo {
                outbound,
                inbound,
                history: Vec::new(),
            },
            job: JobSlot::default(),
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion, then tear down. This is the single
    /// close hook: disconnects, idle timeouts, and auth exhaustion all end
    /// here, and any foreground job is reaped before it returns.
    pub async fn run(mut self, services: Arc<Services>) {
        info!(session = %self.id, "session opened");
        let result = self.drive(&services).await;
        self.teardown().await;
        self.state = SessionState::Terminated;
        match result {
            Ok(()) => info!(session = %self.id, "session closed"),
            Err(Error::Transport) => info!(session = %self.id, "connection dropped"),
            Err(e) => warn!(session = %self.id, error = %e, "session ended with error"),
        }
    }

    async fn drive(&mut self, services: &Services) -> Result<()> {
        loop {
            let Some(principal) = self.login(services).await? else {
                // attempt budget exhausted
                return Ok(());
            };
            self.state = SessionState::Authenticated;
            info!(
                session = %self.id,
                user = %principal.username,
                role = %principal.role,
                "login"
            );
            self.io.send_line(format!(
                "✅ welcome {}! your role is '{}'. type 'help' for commands.",
                principal.username, principal.role
            ));

            // Ok(()) from the shell means signout; transport loss is an Err.
            self.shell(services, &principal).await?;
            self.io.send_line("🔄 signed out; returning to login.");
            self.state = SessionState::AwaitingUsername;
        }
    }

    /// The authentication sub-state machine. `Ok(Some)` on success,
    /// `Ok(None)` once the attempt budget is exhausted.
    async fn login(&mut self, services: &Services) -> Result<Option<Principal>> {
        let mut attempts = 0u32;
        loop {
            self.state = SessionState::AwaitingUsername;
            let Some(username) = self.io.read_line("login: ", false).await? else {
                continue;
            };
            let username = username.trim().to_string();
            if username.is_empty() {
                continue;
            }

            self.state = SessionState::AwaitingPassword;
            let Some(password) = self.io.read_line("password: ", true).await? else {
                continue;
            };

            match services.users.authenticate(&username, &password) {
                Ok(principal) => return Ok(Some(principal)),
                Err(_) => {
                    debug!(session = %self.id, user = %username, "login failed");
                    attempts += 1;
                    self.io.send_line("❌ authentication failed.");
                    if attempts >= services.limits.max_auth_attempts {
                        self.io
                            .send_line("too many failed attempts; closing connection.");
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// The authenticated command loop. Returns `Ok(())` on signout.
    async fn shell(&mut self, services: &Services, actor: &Principal) -> Result<()> {
        let prompt = actor.role.prompt_label();
        let mut need_prompt = true;
        loop {
            if need_prompt && !self.job.busy() {
                self.io.send_prompt(&prompt, false);
            }
            need_prompt = true;

            tokio::select! {
                event = self.events_rx.recv() => {
                    if let Some(SessionEvent::JobFinished(seq)) = event {
                        self.job.clear(seq);
                        debug!(session = %self.id, "foreground job slot cleared");
                    }
                }
                frame = self.io.inbound.recv() => match frame {
                    None => return Err(Error::Transport),
                    Some(ClientFrame::Tab { partial }) => {
                        let reply = autocomplete::complete(actor.role, &partial);
                        self.io.send(ServerFrame::Completion { reply });
                        need_prompt = false;
                    }
                    Some(ClientFrame::Interrupt) => {
                        // interrupt with no job is a silent no-op
                        if self.job.interrupt() {
                            debug!(session = %self.id, "foreground job interrupted");
                        }
                        need_prompt = false;
                    }
                    Some(ClientFrame::Line { text }) => {
                        if self.job.busy() {
                            self.io.send_line(
                                "⚠️ a job is already running; interrupt it with ctrl-c.",
                            );
                            continue;
                        }
                        let line = text.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        self.io.history.push(line.clone());
                        match dispatch::dispatch(&mut self.io, services, actor, &line).await? {
                            Flow::Continue => {}
                            Flow::Signout => return Ok(()),
                            Flow::Capture(args) => self.start_capture(services, actor, &args),
                        }
                    }
                }
            }
        }
    }

    /// Validate, spawn, and register a streaming capture job, forwarding
    /// its output to the transport as it arrives.
    fn start_capture(&mut self, services: &Services, actor: &Principal, args: &[String]) {
        if self.job.busy() {
            self.io
                .send_line("⚠️ a job is already running; interrupt it with ctrl-c.");
            return;
        }

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let job = match services.capture.start(args, line_tx) {
            Ok(job) => job,
            Err(e) => {
                self.io.send_line(format!("❌ {e}"));
                return;
            }
        };
        info!(
            session = %self.id,
            user = %actor.username,
            command = %job.command_line(),
            "capture job started"
        );
        self.io
            .send_line(format!("🐾 running: {} (ctrl-c to stop)", job.command_line()));

        let seq = match self.job.put(job) {
            Ok(seq) => seq,
            Err(e) => {
                // unreachable after the busy() check, but fail loudly
                self.io.send_line(format!("❌ {e}"));
                return;
            }
        };

        let outbound = self.io.outbound.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                let _ = outbound.send(ServerFrame::Output { text: line });
            }
            // the line channel closes only after the pump task has reaped
            // the child, so this marks the slot truly free
            let _ = events.send(SessionEvent::JobFinished(seq));
        });
    }

    /// Reap any foreground job. After this returns the session owns no
    /// running process.
    async fn teardown(&mut self) {
        if let Some(job) = self.job.take() {
            info!(
                session = %self.id,
                command = %job.command_line(),
                "terminating foreground job at teardown"
            );
            job.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_await_a_username() {
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let session = Session::new(in_rx, out_tx);
        assert_eq!(session.state(), SessionState::AwaitingUsername);
    }

    #[test]
    fn default_attempt_budget_is_three() {
        assert_eq!(SessionLimits::default().max_auth_attempts, 3);
    }
}
