use std::fmt;

/// Bearer credential identifying the caller to the minute backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Trimmed, non-empty token; `None` otherwise.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into().trim().to_string();
        (!token.is_empty()).then_some(Self(token))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_tokens_and_redacts_debug() {
        assert!(Credential::new("  ").is_none());
        let credential = Credential::new(" secret ").unwrap();
        assert_eq!(credential.as_str(), "secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
    }
}
