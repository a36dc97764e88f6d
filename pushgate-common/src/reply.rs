use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Reply {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSuccessful = 235,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    ActionUnavailable = 451,
    SyntaxError = 500,
    InvalidCommandSequence = 503,
    AuthRequired = 530,
    AuthFailed = 535,
    Rejected = 550,
}

impl Reply {
    /// Checks if the reply is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the reply is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        u32::from(self) >= 400 && u32::from(self) < 500
    }
}

impl From<Reply> for u32 {
    fn from(value: Reply) -> Self {
        match value {
            Reply::ServiceReady => 220,
            Reply::GoodBye => 221,
            Reply::AuthSuccessful => 235,
            Reply::Ok => 250,
            Reply::AuthContinue => 334,
            Reply::StartMailInput => 354,
            Reply::Unavailable => 421,
            Reply::ActionUnavailable => 451,
            Reply::SyntaxError => 500,
            Reply::InvalidCommandSequence => 503,
            Reply::AuthRequired => 530,
            Reply::AuthFailed => 535,
            Reply::Rejected => 550,
        }
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

/// A full SMTP response line: reply code plus human-readable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: Reply,
    pub text: Cow<'static, str>,
}

impl Response {
    #[must_use]
    pub fn new(code: Reply, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

impl Display for Response {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{} {}", self.code, self.text)
    }
}

#[cfg(test)]
mod test {
    use super::{Reply, Response};

    #[test]
    fn classification() {
        assert!(Reply::Rejected.is_permanent());
        assert!(!Reply::Rejected.is_temporary());

        assert!(Reply::ActionUnavailable.is_temporary());
        assert!(!Reply::ActionUnavailable.is_permanent());

        assert!(!Reply::Ok.is_temporary());
        assert!(!Reply::Ok.is_permanent());
    }

    #[test]
    fn display() {
        assert_eq!(u32::from(Reply::Rejected), 550);
        assert_eq!(Reply::Ok.to_string(), "250");
        assert_eq!(
            Response::new(Reply::Ok, "Message accepted").to_string(),
            "250 Message accepted"
        );
    }
}
