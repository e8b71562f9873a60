//! Mechanism registry keyed by name.

use std::fmt;

use crate::mechanisms::{Anonymous, CramMd5, Login, OAuthBearer, Plain, XOAuth2};
use crate::{Credential, Mechanism};

/// Constructor for a mechanism instance.
pub type Factory = fn(Credential) -> Box<dyn Mechanism>;

/// Static properties of a registered mechanism.
///
/// These flags drive mechanism selection; mechanisms themselves carry no
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MechanismInfo {
    /// The credential travels without confidentiality.
    pub plaintext: bool,
    /// Usable without a real credential.
    pub anonymous: bool,
}

struct Entry {
    name: String,
    info: MechanismInfo,
    factory: Factory,
}

/// Runtime registry of available mechanisms.
///
/// Lookup is case-insensitive. Registering a name twice replaces the
/// earlier entry.
pub struct MechanismRegistry {
    entries: Vec<Entry>,
}

impl MechanismRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a mechanism.
    pub fn register(&mut self, name: &str, info: MechanismInfo, factory: Factory) {
        let name = name.to_ascii_uppercase();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.info = info;
            entry.factory = factory;
        } else {
            self.entries.push(Entry {
                name,
                info,
                factory,
            });
        }
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Returns true if a mechanism with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Returns the properties of a registered mechanism.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<MechanismInfo> {
        self.entry(name).map(|e| e.info)
    }

    /// Creates a fresh mechanism instance, or `None` if unknown.
    #[must_use]
    pub fn create(&self, name: &str, credential: Credential) -> Option<Box<dyn Mechanism>> {
        let entry = self.entry(name);
        if entry.is_none() {
            tracing::debug!(mechanism = name, "no such SASL mechanism registered");
        }
        entry.map(|e| (e.factory)(credential))
    }

    /// Iterates over registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

impl Default for MechanismRegistry {
    /// Registry with every built-in mechanism.
    fn default() -> Self {
        let plaintext = MechanismInfo {
            plaintext: true,
            anonymous: false,
        };

        let mut registry = Self::new();
        registry.register("PLAIN", plaintext, |c| Box::new(Plain::new(c)));
        registry.register("LOGIN", plaintext, |c| Box::new(Login::new(c)));
        registry.register("CRAM-MD5", MechanismInfo::default(), |c| {
            Box::new(CramMd5::new(c))
        });
        registry.register(
            "ANONYMOUS",
            MechanismInfo {
                plaintext: false,
                anonymous: true,
            },
            |c| Box::new(Anonymous::new(&c)),
        );
        registry.register("XOAUTH2", plaintext, |c| Box::new(XOAuth2::new(c)));
        registry.register("OAUTHBEARER", plaintext, |c| Box::new(OAuthBearer::new(c)));
        registry
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_lookup_is_case_insensitive() {
        let registry = MechanismRegistry::default();
        assert!(registry.contains("plain"));
        assert!(registry.contains("Cram-Md5"));
        assert!(!registry.contains("DIGEST-MD5"));
        assert!(!registry.contains("NTLM"));
    }

    #[test]
    fn test_default_registry_flags() {
        let registry = MechanismRegistry::default();
        assert!(registry.info("PLAIN").unwrap().plaintext);
        assert!(registry.info("LOGIN").unwrap().plaintext);
        assert!(registry.info("XOAUTH2").unwrap().plaintext);
        assert!(registry.info("OAUTHBEARER").unwrap().plaintext);
        assert!(!registry.info("CRAM-MD5").unwrap().plaintext);
        assert!(registry.info("ANONYMOUS").unwrap().anonymous);
        assert_eq!(registry.info("GSSAPI"), None);
    }

    #[test]
    fn test_create_returns_fresh_instance() {
        let registry = MechanismRegistry::default();
        let mechanism = registry
            .create("login", Credential::new("bob", "secret"))
            .unwrap();
        assert_eq!(mechanism.name(), "LOGIN");
        assert!(!mechanism.client_first());
        assert!(registry.create("NTLM", Credential::new("bob", "secret")).is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = MechanismRegistry::new();
        registry.register("plain", MechanismInfo::default(), |c| Box::new(Plain::new(c)));
        registry.register(
            "PLAIN",
            MechanismInfo {
                plaintext: true,
                anonymous: false,
            },
            |c| Box::new(Plain::new(c)),
        );
        assert_eq!(registry.names().count(), 1);
        assert!(registry.info("Plain").unwrap().plaintext);
    }
}
