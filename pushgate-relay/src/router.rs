//! Recipient routing: destination address to notification-target user key.

use ahash::AHashMap;

/// Case-insensitive recipient map with a default fallback.
#[derive(Debug, Clone)]
pub struct Router {
    map: AHashMap<String, String>,
    default_user_key: String,
}

impl Router {
    /// Build a router over the configured recipient map. Keys are
    /// compared case-insensitively.
    #[must_use]
    pub fn new(map: &AHashMap<String, String>, default_user_key: String) -> Self {
        Self {
            map: map
                .iter()
                .map(|(key, value)| (key.to_lowercase(), value.clone()))
                .collect(),
            default_user_key,
        }
    }

    /// Resolve a recipient address to a user key.
    ///
    /// Absent, unmapped, and mapped-but-empty addresses all fall
    /// through to the default: an empty mapping means "use the
    /// default", never "route nowhere".
    #[must_use]
    pub fn route(&self, recipient: Option<&str>) -> &str {
        let Some(recipient) = recipient.filter(|r| !r.is_empty()) else {
            return &self.default_user_key;
        };

        match self.map.get(&recipient.to_lowercase()) {
            Some(user_key) if !user_key.is_empty() => user_key,
            _ => &self.default_user_key,
        }
    }
}
