//! Authorization tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Authorization tier determining which commands a principal may issue.
///
/// Variant order is privilege order, so `Viewer < Operator < Admin < Root`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Root,
}

impl Role {
    /// Roles that may be assigned to accounts. Root itself is never
    /// assignable.
    pub const ASSIGNABLE: &'static [Role] = &[Role::Admin, Role::Operator, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::Root => "root",
        }
    }

    /// The shell prompt label shown for this role.
    pub fn prompt_label(&self) -> String {
        format!("({})$ ", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            "root" => Ok(Role::Root),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_ordering() {
        assert!(Role::Root > Role::Admin);
        assert!(Role::Admin > Role::Operator);
        assert!(Role::Operator > Role::Viewer);
    }

    #[test]
    fn root_is_never_assignable() {
        assert!(!Role::ASSIGNABLE.contains(&Role::Root));
        assert_eq!(Role::ASSIGNABLE.len(), 3);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" ROOT ".parse::<Role>().unwrap(), Role::Root);
        assert!("wizard".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Role::Operator).unwrap();
        assert_eq!(json, r#""operator""#);
        let role: Role = serde_json::from_str(r#""root""#).unwrap();
        assert_eq!(role, Role::Root);
    }

    #[test]
    fn prompt_label_names_the_role() {
        assert_eq!(Role::Root.prompt_label(), "(root)$ ");
    }
}
