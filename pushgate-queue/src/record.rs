use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// One terminally-failed dispatch, captured with enough context to
/// reconstruct the send later.
///
/// The wire format is one JSON object per line in `queue.jsonl`:
/// `timestamp` (epoch seconds), `rcpt_tos`, `mail_from`, `content`
/// (raw message, lossy-decoded), `directives`. Records are append-only
/// and never rewritten once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub timestamp: f64,
    pub rcpt_tos: Vec<String>,
    pub mail_from: String,
    pub content: String,
    pub directives: AHashMap<String, String>,
}

impl QueueRecord {
    /// Capture a failed message at the current wall-clock time.
    #[must_use]
    pub fn new(
        rcpt_tos: Vec<String>,
        mail_from: String,
        content: &[u8],
        directives: AHashMap<String, String>,
    ) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            rcpt_tos,
            mail_from,
            content: String::from_utf8_lossy(content).into_owned(),
            directives,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_a_single_json_object() {
        let mut directives = AHashMap::new();
        directives.insert("priority".to_string(), "1".to_string());

        let record = QueueRecord::new(
            vec!["alerts@home.local".to_string()],
            "sensor@home.local".to_string(),
            b"Subject: hi\r\n\r\nbody",
            directives,
        );

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));

        let parsed: QueueRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.rcpt_tos, record.rcpt_tos);
        assert_eq!(parsed.mail_from, "sensor@home.local");
        assert_eq!(parsed.content, "Subject: hi\r\n\r\nbody");
        assert_eq!(parsed.directives["priority"], "1");
        assert!(parsed.timestamp > 0.0);
    }

    #[test]
    fn content_decodes_lossily() {
        let record = QueueRecord::new(
            Vec::new(),
            String::new(),
            b"caf\xff",
            AHashMap::new(),
        );

        assert_eq!(record.content, "caf\u{fffd}");
    }
}
