//! Security realms
//!
//! The host applies one realm to the engine before start. Realms only answer
//! credential checks; how requests are authenticated is up to the engine.

/// A source of principals for the engine
pub trait Realm: Send + Sync + 'static {
    /// Name used in logs and management views
    fn name(&self) -> &str;

    /// Check a username/credential pair
    fn authenticate(&self, username: &str, credential: &str) -> bool;

    /// Roles granted to a principal, empty when unknown
    fn roles(&self, username: &str) -> Vec<String>;
}
