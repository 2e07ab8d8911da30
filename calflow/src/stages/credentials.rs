//! Portal credentials for the timetable stage.

use serde::Deserialize;
use std::fmt;

/// The secrets a user supplies for timetable acquisition.
///
/// `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PortalCredentials {
    password: String,
    answer: String,
    session_token: String,
}

impl PortalCredentials {
    /// Creates a credential set.
    #[must_use]
    pub fn new(
        password: impl Into<String>,
        answer: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            password: password.into(),
            answer: answer.into(),
            session_token: session_token.into(),
        }
    }

    /// Portal password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Answer to the security question.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Portal session token returned alongside the question.
    #[must_use]
    pub fn session_token(&self) -> &str {
        &self.session_token
    }
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("password", &"[redacted]")
            .field("answer", &"[redacted]")
            .field("session_token", &"[redacted]")
            .finish()
    }
}
