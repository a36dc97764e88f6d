//! Message parsing: raw protocol bytes in, (subject, body, directives) out.
//!
//! Parsing never fails. A message that mailparse cannot make sense of
//! degrades to an empty subject and body; the relay still attempts to
//! dispatch whatever was recovered rather than dropping the mail
//! silently.

use std::sync::LazyLock;

use ahash::AHashMap;
use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;

/// Bracketed subject tokens carrying per-message delivery options, e.g.
/// `[PRIO=1]` or `[SOUND=ping]`. Keys are case-insensitive; the value
/// is any run of non-`]` characters. Tokens stay in the subject text.
static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\[(PRIO|SOUND|URL|URLTITLE)=([^\]]+)\]"));

/// Not a full HTML parser: tags are removed, entities are left alone.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compiled(r"<[^<]+?>"));

#[allow(clippy::expect_used)]
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hard-coded pattern compiles")
}

/// The parsed form of an inbound message.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub subject: String,
    pub body: String,
    pub directives: AHashMap<String, String>,
}

impl ParsedMessage {
    /// Display title: subject truncated to 250 characters, with a
    /// placeholder for subjectless mail.
    #[must_use]
    pub fn title(&self) -> &str {
        if self.subject.is_empty() {
            "(No Subject)"
        } else {
            truncate_chars(&self.subject, 250)
        }
    }

    /// Display message: body truncated to 1024 characters, with a
    /// placeholder for bodyless mail.
    #[must_use]
    pub fn message(&self) -> &str {
        if self.body.is_empty() {
            "(No Body)"
        } else {
            truncate_chars(&self.body, 1024)
        }
    }
}

/// Parse raw message bytes. Pure; no side effects.
#[must_use]
pub fn parse(data: &[u8]) -> ParsedMessage {
    let Ok(mail) = mailparse::parse_mail(data) else {
        return ParsedMessage::default();
    };

    let subject = mail
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();

    ParsedMessage {
        directives: extract_directives(&subject),
        body: extract_body(&mail),
        subject,
    }
}

/// Scan the subject left to right; a repeated key keeps its last value.
fn extract_directives(subject: &str) -> AHashMap<String, String> {
    let mut directives = AHashMap::new();

    for capture in DIRECTIVE_RE.captures_iter(subject) {
        let key = match capture[1].to_ascii_lowercase().as_str() {
            "prio" => "priority",
            "urltitle" => "url_title",
            "sound" => "sound",
            _ => "url",
        };
        directives.insert(key.to_string(), capture[2].to_string());
    }

    directives
}

/// Body selection: first `text/plain` part anywhere in the tree, else
/// first `text/html` part with tags stripped.
fn extract_body(mail: &ParsedMail<'_>) -> String {
    if let Some(plain) = find_part(mail, "text/plain") {
        return plain.get_body().unwrap_or_default().trim().to_string();
    }

    if let Some(html) = find_part(mail, "text/html") {
        let body = html.get_body().unwrap_or_default();
        return TAG_RE.replace_all(&body, "").into_owned();
    }

    String::new()
}

/// Depth-first search over the MIME tree, matching the walk order of a
/// flat part iteration.
fn find_part<'p, 'a>(mail: &'p ParsedMail<'a>, mimetype: &str) -> Option<&'p ParsedMail<'a>> {
    if mail.subparts.is_empty() {
        return (mail.ctype.mimetype.eq_ignore_ascii_case(mimetype)).then_some(mail);
    }

    mail.subparts
        .iter()
        .find_map(|part| find_part(part, mimetype))
}

/// Truncate on a character boundary, never inside a code point.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
