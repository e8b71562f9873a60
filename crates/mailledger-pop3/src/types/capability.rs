//! Server capabilities (RFC 2449).

use std::fmt;

/// A named, optionally parameterized server capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    name: String,
    arguments: Vec<String>,
}

impl Capability {
    /// TOP command.
    pub const TOP: &'static str = "TOP";
    /// USER/PASS commands.
    pub const USER: &'static str = "USER";
    /// AUTH command; arguments are mechanism names.
    pub const SASL: &'static str = "SASL";
    /// Extended response codes.
    pub const RESP_CODES: &'static str = "RESP-CODES";
    /// Minimum delay between logins.
    pub const LOGIN_DELAY: &'static str = "LOGIN-DELAY";
    /// Command pipelining.
    pub const PIPELINING: &'static str = "PIPELINING";
    /// Message retention policy.
    pub const EXPIRE: &'static str = "EXPIRE";
    /// UIDL command.
    pub const UIDL: &'static str = "UIDL";
    /// Server implementation string.
    pub const IMPLEMENTATION: &'static str = "IMPLEMENTATION";
    /// STLS command (RFC 2595).
    pub const STLS: &'static str = "STLS";
    /// UTF8 command (RFC 6856).
    pub const UTF8: &'static str = "UTF8";
    /// LANG command (RFC 6856).
    pub const LANG: &'static str = "LANG";

    /// Creates a capability without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Creates a capability with arguments.
    #[must_use]
    pub fn with_arguments<I, A>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Requirement for a SASL mechanism: `SASL <mechanism>`.
    #[must_use]
    pub fn sasl(mechanism: &str) -> Self {
        Self::with_arguments(Self::SASL, [mechanism])
    }

    /// Parses one line of a CAPA reply.
    ///
    /// Returns `None` for a blank line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?;
        Some(Self::with_arguments(name, parts))
    }

    /// Returns the capability name as advertised.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the capability arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Returns true if the name matches, ignoring case.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Returns true if an argument matches, ignoring case.
    #[must_use]
    pub fn has_argument(&self, argument: &str) -> bool {
        self.arguments
            .iter()
            .any(|a| a.eq_ignore_ascii_case(argument))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for argument in &self.arguments {
            write!(f, " {argument}")?;
        }
        Ok(())
    }
}

/// Something that can only be used when the server advertises support.
pub trait Extension {
    /// Alternative sets of required capabilities.
    ///
    /// The extension is usable if every capability of at least one set is
    /// advertised, including the listed arguments. An empty list means no
    /// requirement.
    fn required_capabilities(&self) -> Vec<Vec<Capability>>;
}

impl Extension for Capability {
    fn required_capabilities(&self) -> Vec<Vec<Capability>> {
        vec![vec![self.clone()]]
    }
}

/// Capabilities advertised by a server.
///
/// Names compare case-insensitively; a later duplicate replaces the earlier
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Builds a set from CAPA reply lines.
    pub fn from_lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let mut set = Self::new();
        for capability in lines
            .into_iter()
            .filter_map(|line| Capability::parse(line.as_ref()))
        {
            set.insert(capability);
        }
        set
    }

    /// Adds a capability, replacing any entry with the same name.
    pub fn insert(&mut self, capability: Capability) {
        if let Some(existing) = self
            .capabilities
            .iter_mut()
            .find(|c| c.is(capability.name()))
        {
            *existing = capability;
        } else {
            self.capabilities.push(capability);
        }
    }

    /// Looks up a capability by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.is(name))
    }

    /// Returns true if the capability is advertised.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns true if the capability is advertised with the argument.
    #[must_use]
    pub fn has_argument(&self, name: &str, argument: &str) -> bool {
        self.get(name).is_some_and(|c| c.has_argument(argument))
    }

    /// Returns true if `capability` and all of its arguments are advertised.
    #[must_use]
    pub fn contains(&self, capability: &Capability) -> bool {
        self.get(capability.name()).is_some_and(|advertised| {
            capability
                .arguments()
                .iter()
                .all(|a| advertised.has_argument(a))
        })
    }

    /// Returns true if any alternative requirement set is satisfied.
    #[must_use]
    pub fn is_capable_of<E: Extension + ?Sized>(&self, extension: &E) -> bool {
        let alternatives = extension.required_capabilities();
        alternatives.is_empty()
            || alternatives
                .iter()
                .any(|set| set.iter().all(|c| self.contains(c)))
    }

    /// SASL mechanisms advertised through the `SASL` capability.
    pub fn sasl_mechanisms(&self) -> impl Iterator<Item = &str> {
        self.get(Capability::SASL)
            .into_iter()
            .flat_map(|c| c.arguments().iter().map(String::as_str))
    }

    /// Iterates over the capabilities in advertised order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Returns true if nothing is advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::new();
        for capability in iter {
            set.insert(capability);
        }
        set
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

    fn sample() -> CapabilitySet {
        CapabilitySet::from_lines([
            "TOP",
            "USER",
            "SASL CRAM-MD5 KERBEROS_V4",
            "RESP-CODES",
            "LOGIN-DELAY 900",
            "PIPELINING",
            "EXPIRE 60",
            "UIDL",
            "IMPLEMENTATION Shlemazle-Plotz-v302",
        ])
    }

    mod capability_parse_tests {
        use super::*;

        #[test]
        fn parse_bare_name() {
            let cap = Capability::parse("TOP").unwrap();
            assert_eq!(cap.name(), "TOP");
            assert!(cap.arguments().is_empty());
        }

        #[test]
        fn parse_with_arguments() {
            let cap = Capability::parse("SASL CRAM-MD5 KERBEROS_V4").unwrap();
            assert_eq!(cap.name(), "SASL");
            assert_eq!(cap.arguments(), ["CRAM-MD5", "KERBEROS_V4"]);
            assert_eq!(cap.to_string(), "SASL CRAM-MD5 KERBEROS_V4");
        }

        #[test]
        fn parse_blank_line() {
            assert!(Capability::parse("   ").is_none());
        }
    }

    mod capability_set_tests {
        use super::*;

        #[test]
        fn lookup_is_case_insensitive() {
            let set = sample();
            assert!(set.has("top"));
            assert!(set.has("user"));
            assert!(set.has("Uidl"));
            assert!(!set.has("auth=login"));
            assert!(!set.has("STLS"));
        }

        #[test]
        fn argument_lookup() {
            let set = sample();
            assert!(set.has_argument("sasl", "cram-md5"));
            assert!(!set.has_argument("SASL", "PLAIN"));
            assert_eq!(
                set.sasl_mechanisms().collect::<Vec<_>>(),
                ["CRAM-MD5", "KERBEROS_V4"]
            );
        }

        #[test]
        fn duplicates_overwrite() {
            let set = CapabilitySet::from_lines(["SASL PLAIN", "sasl LOGIN"]);
            assert_eq!(set.len(), 1);
            assert!(set.has_argument("SASL", "LOGIN"));
            assert!(!set.has_argument("SASL", "PLAIN"));
        }

        #[test]
        fn capable_of_sasl_mechanism() {
            let set = sample();
            assert!(set.is_capable_of(&Capability::sasl("CRAM-MD5")));
            assert!(set.is_capable_of(&Capability::new(Capability::SASL)));
            assert!(!set.is_capable_of(&Capability::sasl("PLAIN")));
        }

        #[test]
        fn capable_of_any_alternative() {
            struct EitherTopOrStls;
            impl Extension for EitherTopOrStls {
                fn required_capabilities(&self) -> Vec<Vec<Capability>> {
                    vec![
                        vec![Capability::new("STLS")],
                        vec![Capability::new("TOP"), Capability::new("UIDL")],
                    ]
                }
            }

            assert!(sample().is_capable_of(&EitherTopOrStls));
            assert!(!CapabilitySet::from_lines(["TOP"]).is_capable_of(&EitherTopOrStls));
        }

        #[test]
        fn empty_set() {
            let set = CapabilitySet::new();
            assert!(set.is_empty());
            assert!(!set.has("TOP"));
            assert_eq!(set.sasl_mechanisms().count(), 0);
        }
    }
}
