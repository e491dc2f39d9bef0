use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Closed set of account roles. Tokens and stored records carry the lowercase
/// string form; anything outside this set parses to None and is rejected at
/// the boundary instead of travelling through the system as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    pub fn allowed(&self, set: &[Role]) -> bool {
        set.contains(self)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles that may read and update inventory counters.
pub const INVENTORY_ROLES: &[Role] = &[Role::Admin, Role::User];
/// Roles that may read and append to the movement history.
pub const HISTORY_ROLES: &[Role] = &[Role::Admin, Role::User];
/// Deleting history entries is reserved to admins.
pub const HISTORY_DELETE_ROLES: &[Role] = &[Role::Admin];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_roles() {
        for r in [Role::Admin, Role::User, Role::Guest] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn serde_uses_lowercase_strings() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let r: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(r, Role::User);
        assert!(serde_json::from_str::<Role>("\"root\"").is_err());
    }

    #[test]
    fn role_sets_gate_as_policy_says() {
        assert!(Role::Admin.allowed(INVENTORY_ROLES));
        assert!(Role::User.allowed(INVENTORY_ROLES));
        assert!(!Role::Guest.allowed(INVENTORY_ROLES));

        assert!(Role::User.allowed(HISTORY_ROLES));
        assert!(!Role::User.allowed(HISTORY_DELETE_ROLES));
        assert!(Role::Admin.allowed(HISTORY_DELETE_ROLES));
        assert!(!Role::Guest.allowed(HISTORY_DELETE_ROLES));
    }
}
