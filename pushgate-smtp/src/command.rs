//! SMTP command parsing for the minimal ingest command set.

/// Commands the session understands. Anything else is answered with a
/// 500 and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    /// AUTH LOGIN, optionally carrying the initial base64 username.
    AuthLogin(Option<String>),
    Unknown(String),
}

impl Command {
    /// Parse one command line (already stripped of CRLF). Verbs are
    /// case-insensitive; argument case is preserved.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let upper = line.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("HELO") {
            return Self::Helo(argument(line, rest));
        }
        if let Some(rest) = upper.strip_prefix("EHLO") {
            return Self::Ehlo(argument(line, rest));
        }
        if upper.starts_with("MAIL FROM:") {
            return Self::MailFrom(address(&line["MAIL FROM:".len()..]));
        }
        if upper.starts_with("RCPT TO:") {
            return Self::RcptTo(address(&line["RCPT TO:".len()..]));
        }
        if let Some(rest) = upper.strip_prefix("AUTH LOGIN") {
            let initial = (!rest.trim().is_empty())
                .then(|| line[line.len() - rest.len()..].trim().to_string());
            return Self::AuthLogin(initial);
        }

        match upper.as_str() {
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            "STARTTLS" => Self::StartTls,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn argument(line: &str, upper_rest: &str) -> String {
    line[line.len() - upper_rest.len()..].trim().to_string()
}

/// Extract the address from a `MAIL FROM:`/`RCPT TO:` argument,
/// stripping angle brackets and any trailing ESMTP parameters.
fn address(raw: &str) -> String {
    let raw = raw.trim();

    let inner = match (raw.find('<'), raw.find('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw.split_whitespace().next().unwrap_or_default(),
    };

    inner.trim().to_string()
}
