//! Session and command core of the webcli restricted shell.
//!
//! One [`session::Session`] runs per connection: it authenticates the user,
//! resolves a [`role::Role`], and routes command lines through the
//! role-scoped dispatcher. Tab completion and interrupts arrive as
//! side-channel frames and never enter the normal dispatch path.

#![forbid(unsafe_code)]

pub mod atomic;
pub mod autocomplete;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod role;
pub mod session;
pub mod users;

pub use config::ConfigManager;
pub use error::{Error, Result};
pub use protocol::{ClientFrame, CompletionReply, ServerFrame};
pub use role::Role;
pub use session::{Services, Session, SessionLimits, SessionState};
pub use users::{Principal, UserStore};
