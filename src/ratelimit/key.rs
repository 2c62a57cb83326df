//! Rate limit key generation and handling.

/// The kind of client identity a budget is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityClass {
    /// Client network address
    Address,
    /// Bearer API token
    Token,
}

impl IdentityClass {
    /// Tag used for this class in the store key namespace.
    pub fn tag(&self) -> &'static str {
        match self {
            IdentityClass::Address => "ip",
            IdentityClass::Token => "token",
        }
    }
}

/// A key that uniquely identifies one admission budget.
///
/// Two keys are equal only when both the class and the identifier match, so
/// an address and a token with the same text never share a budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Identity class of this key
    pub class: IdentityClass,
    /// The raw identifier (address or token)
    pub identifier: String,
}

impl RateLimitKey {
    /// Create a new key.
    pub fn new(class: IdentityClass, identifier: impl Into<String>) -> Self {
        Self {
            class,
            identifier: identifier.into(),
        }
    }

    /// Key for a client address.
    pub fn address(address: impl Into<String>) -> Self {
        Self::new(IdentityClass::Address, address)
    }

    /// Key for an API token.
    pub fn token(token: impl Into<String>) -> Self {
        Self::new(IdentityClass::Token, token)
    }

    /// Namespaced name, `<class>:<identifier>`.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.class.tag(), self.identifier)
    }

    /// Store key of the window counter under `prefix`.
    pub fn count_key(&self, prefix: &str) -> String {
        format!("{}:count:{}", prefix, self.to_string_key())
    }

    /// Store key of the block marker under `prefix`.
    pub fn block_key(&self, prefix: &str) -> String {
        format!("{}:block:{}", prefix, self.to_string_key())
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
