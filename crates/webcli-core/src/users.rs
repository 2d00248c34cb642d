//! User and credential stores plus the `userctl` command flows.
//!
//! Account metadata and password hashes live in two separate JSON files
//! (`users.json`, `shadow.json`), each rewritten atomically on every change.
//! Secrets are bcrypt hashes; plaintext is never persisted, logged, or
//! echoed, and a failed login never reveals whether the account exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::atomic::atomic_write;
use crate::error::{Error, Result};
use crate::role::Role;
use crate::session::SessionIo;

/// Identity of an authenticated account. Immutable for the lifetime of a
/// session; role changes take effect on the next login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    pub username: String,
    pub role: Role,
}

/// On-disk account record (`users.json`, keyed by username).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    userid: u64,
    username: String,
    role: Role,
}

/// `userctl` subcommands, shared with the autocomplete engine.
pub(crate) const SUBCOMMANDS: &[&str] = &["add", "del", "edit", "list"];

fn valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    first_ok
        && name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// File-backed user and credential stores.
pub struct UserStore {
    users_path: PathBuf,
    shadow_path: PathBuf,
    cost: u32,
}

impl UserStore {
    pub fn new(dir: &Path) -> Self {
        Self::with_cost(dir, bcrypt::DEFAULT_COST)
    }

    /// Use a non-default bcrypt cost. Tests use a low cost for speed.
    pub fn with_cost(dir: &Path, cost: u32) -> Self {
        Self {
            users_path: dir.join("users.json"),
            shadow_path: dir.join("shadow.json"),
            cost,
        }
    }

    fn load_users(&self) -> Result<BTreeMap<String, UserRecord>> {
        load_json(&self.users_path)
    }

    fn save_users(&self, users: &BTreeMap<String, UserRecord>) -> Result<()> {
        save_json(&self.users_path, users)
    }

    fn load_hashes(&self) -> Result<BTreeMap<String, String>> {
        load_json(&self.shadow_path)
    }

    fn save_hashes(&self, hashes: &BTreeMap<String, String>) -> Result<()> {
        save_json(&self.shadow_path, hashes)
    }

    /// Verify credentials. Unknown user, missing hash, and wrong password
    /// all yield the same [`Error::AuthFailure`].
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Principal> {
        let users = self.load_users().map_err(|e| {
            warn!(error = %e, "user store unreadable");
            Error::AuthFailure
        })?;
        let Some(user) = users.get(username) else {
            return Err(Error::AuthFailure);
        };
        let hashes = self.load_hashes().map_err(|e| {
            warn!(error = %e, "credential store unreadable");
            Error::AuthFailure
        })?;
        let Some(stored) = hashes.get(&user.userid.to_string()) else {
            return Err(Error::AuthFailure);
        };
        if !bcrypt::verify(password, stored).unwrap_or(false) {
            return Err(Error::AuthFailure);
        }
        self.maybe_rehash(user.userid, password, stored);
        Ok(Principal {
            id: user.userid,
            username: user.username.clone(),
            role: user.role,
        })
    }

    /// Upgrade the stored hash after a successful login if its cost factor
    /// is below the configured one. Failure to persist is non-fatal.
    fn maybe_rehash(&self, id: u64, password: &str, stored: &str) {
        let stored_cost = stored.split('$').nth(2).and_then(|c| c.parse::<u32>().ok());
        if !stored_cost.is_some_and(|c| c < self.cost) {
            return;
        }
        match bcrypt::hash(password, self.cost) {
            Ok(upgraded) => {
                let result = self
                    .load_hashes()
                    .and_then(|mut hashes| {
                        hashes.insert(id.to_string(), upgraded);
                        self.save_hashes(&hashes)
                    });
                if let Err(e) = result {
                    warn!(error = %e, "hash upgrade not persisted");
                } else {
                    info!(userid = id, "password hash upgraded");
                }
            }
            Err(e) => warn!(error = %e, "hash upgrade failed"),
        }
    }

    /// Look up one account by username.
    pub fn get(&self, username: &str) -> Result<Option<Principal>> {
        Ok(self.load_users()?.get(username).map(|u| Principal {
            id: u.userid,
            username: u.username.clone(),
            role: u.role,
        }))
    }

    /// All accounts, most privileged first.
    pub fn list(&self) -> Result<Vec<Principal>> {
        let mut all: Vec<Principal> = self
            .load_users()?
            .values()
            .map(|u| Principal {
                id: u.userid,
                username: u.username.clone(),
                role: u.role,
            })
            .collect();
        all.sort_by(|a, b| b.role.cmp(&a.role).then_with(|| a.username.cmp(&b.username)));
        Ok(all)
    }

    /// First-run provisioning: create an account with no actor checks.
    /// Only the installer and tests call this.
    pub fn seed(&self, username: &str, password: &str, role: Role) -> Result<Principal> {
        self.insert(username, password, role)
    }

    /// Create an account on behalf of `actor`. The actor can never assign
    /// a role above their own, and root is never assignable.
    pub fn add(
        &self,
        actor: &Principal,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<Principal> {
        ensure_assignable(actor, role)?;
        let created = self.insert(username, password, role)?;
        info!(user = username, role = %role, by = %actor.username, "user added");
        Ok(created)
    }

    fn insert(&self, username: &str, password: &str, role: Role) -> Result<Principal> {
        if !valid_username(username) {
            return Err(Error::Rejected(format!("invalid username '{username}'")));
        }
        let mut users = self.load_users()?;
        if users.contains_key(username) {
            return Err(Error::Rejected(format!("user '{username}' already exists")));
        }
        let id = users.values().map(|u| u.userid).max().unwrap_or(0) + 1;
        let hash = hash_password(password, self.cost)?;
        let mut hashes = self.load_hashes()?;
        users.insert(
            username.to_string(),
            UserRecord {
                userid: id,
                username: username.to_string(),
                role,
            },
        );
        self.save_users(&users)?;
        hashes.insert(id.to_string(), hash);
        self.save_hashes(&hashes)?;
        Ok(Principal {
            id,
            username: username.to_string(),
            role,
        })
    }

    /// Delete an account. Root only.
    pub fn delete(&self, actor: &Principal, username: &str) -> Result<()> {
        if actor.role < Role::Root {
            return Err(Error::Denied("only root may delete users".into()));
        }
        let mut users = self.load_users()?;
        let Some(removed) = users.remove(username) else {
            return Err(Error::Rejected(format!("user '{username}' not found")));
        };
        let mut hashes = self.load_hashes()?;
        hashes.remove(&removed.userid.to_string());
        self.save_users(&users)?;
        self.save_hashes(&hashes)?;
        info!(user = username, by = %actor.username, "user deleted");
        Ok(())
    }

    /// Change a password. Root may change anyone's; others only their own.
    pub fn set_password(&self, actor: &Principal, username: &str, password: &str) -> Result<()> {
        if actor.role < Role::Root && actor.username != username {
            return Err(Error::Denied(
                "only root may change another user's password".into(),
            ));
        }
        let users = self.load_users()?;
        let Some(user) = users.get(username) else {
            return Err(Error::Rejected(format!("user '{username}' not found")));
        };
        let hash = hash_password(password, self.cost)?;
        let mut hashes = self.load_hashes()?;
        hashes.insert(user.userid.to_string(), hash);
        self.save_hashes(&hashes)?;
        info!(user = username, by = %actor.username, "password changed");
        Ok(())
    }

    /// Change a role. Root only, and never to a role above the actor's own.
    pub fn set_role(&self, actor: &Principal, username: &str, role: Role) -> Result<()> {
        if actor.role < Role::Root {
            return Err(Error::Denied("only root may change roles".into()));
        }
        ensure_assignable(actor, role)?;
        let mut users = self.load_users()?;
        let Some(user) = users.get_mut(username) else {
            return Err(Error::Rejected(format!("user '{username}' not found")));
        };
        user.role = role;
        self.save_users(&users)?;
        info!(user = username, role = %role, by = %actor.username, "role changed");
        Ok(())
    }
}

fn ensure_assignable(actor: &Principal, role: Role) -> Result<()> {
    if !Role::ASSIGNABLE.contains(&role) {
        return Err(Error::Rejected(format!("role '{role}' cannot be assigned")));
    }
    if role > actor.role {
        return Err(Error::Denied("cannot grant a role above your own".into()));
    }
    Ok(())
}

fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).map_err(|e| {
        warn!(error = %e, "bcrypt failure");
        Error::Persistence(e.to_string())
    })
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
            warn!(path = %path.display(), error = %e, "store file corrupt");
            Error::Persistence(e.to_string())
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store file unreadable");
            Err(Error::Persistence(e.to_string()))
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut raw = serde_json::to_string_pretty(value).map_err(|e| {
        warn!(error = %e, "store serialization failed");
        Error::Persistence(e.to_string())
    })?;
    raw.push('\n');
    atomic_write(path, &raw).map_err(|e| {
        warn!(path = %path.display(), error = %e, "store write failed");
        Error::Persistence(e.to_string())
    })
}

// ---------------------------------------------------------------------------
// userctl command flows
// ---------------------------------------------------------------------------

/// Entry point for the `userctl` command.
pub async fn run_userctl(
    io: &mut SessionIo,
    store: &UserStore,
    actor: &Principal,
    args: &[String],
) -> Result<()> {
    match (args.first().map(String::as_str), args.len()) {
        (Some("list"), 1) => run_list(io, store),
        (Some("add"), 1) => run_add(io, store, actor).await,
        (Some("del"), 2) => run_delete(io, store, actor, &args[1]).await,
        (Some("edit"), 2) => run_edit(io, store, actor, &args[1]).await,
        _ => {
            io.send_line("usage: userctl <list | add | del <user> | edit <user>>");
            Ok(())
        }
    }
}

fn run_list(io: &mut SessionIo, store: &UserStore) -> Result<()> {
    let all = store.list()?;
    if all.is_empty() {
        io.send_line("no users provisioned.");
        return Ok(());
    }
    io.send_line("👥 users by role:");
    for role in [Role::Root, Role::Admin, Role::Operator, Role::Viewer] {
        let names: Vec<&str> = all
            .iter()
            .filter(|p| p.role == role)
            .map(|p| p.username.as_str())
            .collect();
        if !names.is_empty() {
            io.send_line(format!("  {}: {}", role, names.join(", ")));
        }
    }
    Ok(())
}

async fn run_add(io: &mut SessionIo, store: &UserStore, actor: &Principal) -> Result<()> {
    let username = loop {
        let Some(name) = io.read_line("new username: ", false).await? else {
            io.send_line("aborted.");
            return Ok(());
        };
        let name = name.trim().to_string();
        if !valid_username(&name) {
            io.send_line("❗ usernames are lowercase letters, digits, '-' and '_'.");
            continue;
        }
        if store.get(&name)?.is_some() {
            io.send_line("⚠️ username already exists. try another.");
            continue;
        }
        break name;
    };

    let Some(password) = io.read_line("password: ", true).await? else {
        io.send_line("aborted.");
        return Ok(());
    };
    let Some(retyped) = io.read_line("retype password: ", true).await? else {
        io.send_line("aborted.");
        return Ok(());
    };
    if password != retyped {
        io.send_line("❌ passwords do not match; aborting.");
        return Ok(());
    }

    let role = match read_role(io).await? {
        Some(role) => role,
        None => {
            io.send_line("aborted.");
            return Ok(());
        }
    };

    store.add(actor, &username, &password, role)?;
    io.send_line(format!("✅ user '{username}' added with role '{role}'."));
    Ok(())
}

async fn run_delete(
    io: &mut SessionIo,
    store: &UserStore,
    actor: &Principal,
    username: &str,
) -> Result<()> {
    let Some(target) = store.get(username)? else {
        io.send_line(format!("❌ user '{username}' not found."));
        return Ok(());
    };
    let prompt = format!(
        "delete user '{}' (role {})? [y/N]: ",
        target.username, target.role
    );
    let Some(confirm) = io.read_line(&prompt, false).await? else {
        io.send_line("deletion cancelled.");
        return Ok(());
    };
    if !confirm.trim().eq_ignore_ascii_case("y") {
        io.send_line("deletion cancelled.");
        return Ok(());
    }
    store.delete(actor, username)?;
    io.send_line(format!("🗑 user '{username}' deleted."));
    Ok(())
}

async fn run_edit(
    io: &mut SessionIo,
    store: &UserStore,
    actor: &Principal,
    username: &str,
) -> Result<()> {
    let Some(target) = store.get(username)? else {
        io.send_line(format!("❌ user '{username}' not found."));
        return Ok(());
    };
    io.send_line(format!(
        "📝 editing user '{}' (role {})",
        target.username, target.role
    ));
    let Some(choice) = io
        .read_line("edit password or role? [password/role]: ", false)
        .await?
    else {
        io.send_line("edit cancelled.");
        return Ok(());
    };

    match choice.trim().to_ascii_lowercase().as_str() {
        "password" => {
            let Some(password) = io.read_line("new password: ", true).await? else {
                io.send_line("edit cancelled.");
                return Ok(());
            };
            let Some(retyped) = io.read_line("retype new password: ", true).await? else {
                io.send_line("edit cancelled.");
                return Ok(());
            };
            if password != retyped {
                io.send_line("❌ passwords do not match; aborting.");
                return Ok(());
            }
            store.set_password(actor, username, &password)?;
            io.send_line(format!("🔑 password for '{username}' updated."));
        }
        "role" => {
            let role = match read_role(io).await? {
                Some(role) => role,
                None => {
                    io.send_line("edit cancelled.");
                    return Ok(());
                }
            };
            store.set_role(actor, username, role)?;
            io.send_line(format!("👤 role for '{username}' updated to '{role}'."));
        }
        _ => io.send_line("edit cancelled."),
    }
    Ok(())
}

/// Prompt until a valid assignable role is given. `None` on interrupt.
async fn read_role(io: &mut SessionIo) -> Result<Option<Role>> {
    loop {
        let Some(raw) = io.read_line("role (admin/operator/viewer): ", false).await? else {
            return Ok(None);
        };
        match raw.parse::<Role>() {
            Ok(role) if Role::ASSIGNABLE.contains(&role) => return Ok(Some(role)),
            _ => io.send_line("⚠️ invalid role. choose from: admin, operator, viewer."),
        }
    }
}
