//! Server-side bot configuration
//!
//! This module holds everything the dispatcher needs to know about a
//! deployed bot: accepted access keys (with automatic redaction in
//! Display/Debug output), which normalization passes run on inbound
//! queries, and where synthesized attachments get uploaded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::NormalizePolicy;

/// A wrapper type for sensitive access keys
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AccessKey {
    value: String,
}

impl AccessKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Constant-time comparison against a presented key.
    ///
    /// Iterates both strings in full regardless of where they diverge so
    /// the comparison time does not reveal the matching prefix length.
    pub fn matches(&self, presented: &str) -> bool {
        let ours = self.value.as_bytes();
        let theirs = presented.as_bytes();
        let mut diff = ours.len() ^ theirs.len();
        for i in 0..ours.len().max(theirs.len()) {
            let a = ours.get(i).copied().unwrap_or(0);
            let b = theirs.get(i).copied().unwrap_or(0);
            diff |= (a ^ b) as usize;
        }
        diff == 0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for AccessKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AccessKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Configuration for a served bot
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    /// Path the bot is mounted at, informational only
    pub path: String,

    /// Keys accepted on inbound requests. Empty disables verification.
    pub access_keys: Vec<AccessKey>,

    /// Synthesize a system message per attachment on the final query turn
    pub insert_attachment_messages: bool,

    /// Collapse consecutive same-role messages before dispatch
    pub enforce_role_alternation: bool,

    /// Combine consecutive bot messages into one labelled turn
    pub combine_bot_messages: bool,

    pub normalize_policy: NormalizePolicy,

    /// Endpoint attachment uploads are posted to. Uploads fail until
    /// this is configured.
    pub attachment_endpoint: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            access_keys: Vec::new(),
            insert_attachment_messages: true,
            enforce_role_alternation: false,
            combine_bot_messages: false,
            normalize_policy: NormalizePolicy::default(),
            attachment_endpoint: String::new(),
        }
    }
}

impl BotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_key(mut self, key: impl Into<AccessKey>) -> Self {
        self.access_keys.push(key.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_role_alternation(mut self, policy: NormalizePolicy) -> Self {
        self.enforce_role_alternation = true;
        self.normalize_policy = policy;
        self
    }

    pub fn with_combined_bot_messages(mut self) -> Self {
        self.combine_bot_messages = true;
        self
    }

    pub fn with_attachment_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.attachment_endpoint = endpoint.into();
        self
    }

    /// Whether a presented key is accepted. Checks every configured key
    /// so timing does not depend on which one matched.
    pub fn key_accepted(&self, presented: &str) -> bool {
        if self.access_keys.is_empty() {
            return true;
        }
        let mut accepted = false;
        for key in &self.access_keys {
            accepted |= key.matches(presented);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_key_redacts_debug_and_display() {
        let key = AccessKey::new("super-secret-key");
        assert_eq!(format!("{key:?}"), "[REDACTED]");
        assert_eq!(format!("{key}"), "[REDACTED]");
        assert_eq!(key.expose_secret(), "super-secret-key");
    }

    #[test]
    fn key_matching_requires_exact_equality() {
        let key = AccessKey::new("abc123");
        assert!(key.matches("abc123"));
        assert!(!key.matches("abc124"));
        assert!(!key.matches("abc12"));
        assert!(!key.matches("abc1234"));
        assert!(!key.matches(""));
    }

    #[test]
    fn empty_key_list_accepts_anything() {
        let config = BotConfig::default();
        assert!(config.key_accepted("whatever"));
    }

    #[test]
    fn any_configured_key_is_accepted() {
        let config = BotConfig::default()
            .with_access_key("first")
            .with_access_key("second");
        assert!(config.key_accepted("second"));
        assert!(!config.key_accepted("third"));
    }

    #[test]
    fn defaults_enable_attachment_messages_only() {
        let config = BotConfig::default();
        assert!(config.insert_attachment_messages);
        assert!(!config.enforce_role_alternation);
        assert!(!config.combine_bot_messages);
    }
}
