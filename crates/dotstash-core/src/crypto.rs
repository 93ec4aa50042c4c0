// ABOUTME: Recognises encrypted leaves so they are never interpolated or used as reference targets.
// ABOUTME: Decryption lives outside this workspace; only the predicate is needed here.

/// Default marker that prefixes an encrypted leaf.
pub const ENCRYPTED_PREFIX: &str = "ENC:";

/// Answers whether a stored leaf is an encrypted blob.
pub trait EncryptionProbe: Send + Sync {
    fn is_encrypted(&self, value: &str) -> bool;
}

/// Treats any leaf starting with a fixed prefix as encrypted.
#[derive(Debug, Clone)]
pub struct PrefixProbe {
    prefix: String,
}

impl PrefixProbe {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixProbe {
    fn default() -> Self {
        Self::new(ENCRYPTED_PREFIX)
    }
}

impl EncryptionProbe for PrefixProbe {
    fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_probe_matches_marker_only_at_start() {
        let probe = PrefixProbe::default();
        assert!(probe.is_encrypted("ENC:abcdef"));
        assert!(!probe.is_encrypted("plain ENC:abcdef"));
        assert!(!probe.is_encrypted(""));
    }
}
