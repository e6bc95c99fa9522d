//! Validation of the user object returned by the session collaborator.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::GateError;

const AUTHENTICATED: &str = "authenticated";

/// A user that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    pub confirmed_at: Option<DateTime<FixedOffset>>,
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    email: Option<String>,
    aud: String,
    role: String,
    confirmed_at: Option<String>,
}

impl AuthenticatedUser {
    /// Validate a raw user object.
    pub fn from_value(value: &Value) -> Result<Self, GateError> {
        let raw = RawUser::deserialize(value).map_err(|e| GateError::InvalidUser(e.to_string()))?;

        if raw.id.is_empty() {
            return Err(GateError::InvalidUser("empty id".to_string()));
        }
        if let Some(ref email) = raw.email {
            if !is_plausible_email(email) {
                return Err(GateError::InvalidUser(format!("bad email {:?}", email)));
            }
        }
        if raw.aud != AUTHENTICATED {
            return Err(GateError::InvalidUser(format!("aud is {:?}", raw.aud)));
        }
        if raw.role != AUTHENTICATED {
            return Err(GateError::InvalidUser(format!("role is {:?}", raw.role)));
        }
        let confirmed_at = raw
            .confirmed_at
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| GateError::InvalidUser(format!("confirmed_at: {}", e)))?;

        Ok(Self {
            id: raw.id,
            email: raw.email,
            confirmed_at,
        })
    }
}

/// Whether the session's user counts as authenticated.
pub fn is_authenticated(user: Option<&Value>) -> bool {
    match user {
        Some(value) if value.is_object() => match AuthenticatedUser::from_value(value) {
            Ok(_) => true,
            Err(e) => {
                trace!(error = %e, "User rejected");
                false
            }
        },
        _ => false,
    }
}

fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}
