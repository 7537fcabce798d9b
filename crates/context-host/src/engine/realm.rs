//! In-memory realm

use std::collections::HashMap;

use context_host_sdk::Realm;

#[derive(Debug, Clone)]
struct Principal {
    credential: String,
    roles: Vec<String>,
}

/// Realm backed by a fixed set of users. Empty by default, so nothing
/// authenticates until users are added.
#[derive(Debug, Default)]
pub struct MemoryRealm {
    users: HashMap<String, Principal>,
}

impl MemoryRealm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add a user with its roles
    pub fn with_user(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
        roles: &[&str],
    ) -> Self {
        self.users.insert(
            username.into(),
            Principal {
                credential: credential.into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
        self
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Realm for MemoryRealm {
    fn name(&self) -> &str {
        "memory"
    }

    fn authenticate(&self, username: &str, credential: &str) -> bool {
        self.users
            .get(username)
            .map(|p| p.credential == credential)
            .unwrap_or(false)
    }

    fn roles(&self, username: &str) -> Vec<String> {
        self.users
            .get(username)
            .map(|p| p.roles.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_realm_is_empty() {
        let realm = MemoryRealm::new();
        assert_eq!(realm.user_count(), 0);
        assert!(!realm.authenticate("admin", ""));
        assert!(realm.roles("admin").is_empty());
    }

    #[test]
    fn test_users() {
        let realm = MemoryRealm::new().with_user("ops", "secret", &["manager", "status"]);
        assert!(realm.authenticate("ops", "secret"));
        assert!(!realm.authenticate("ops", "wrong"));
        assert_eq!(realm.roles("ops"), vec!["manager", "status"]);
    }
}
