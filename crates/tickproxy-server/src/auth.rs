//! Single shared-secret HTTP Basic authentication.
//!
//! With no configured pair every caller is [`Identity::Anonymous`]. With a
//! pair configured, a missing credential and a wrong one are distinct errors
//! but surface with the same status and body shape.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// A username/password pair, either configured or supplied by a client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse an `Authorization: Basic <base64(user:pass)>` header value.
    pub fn from_basic_header(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self::new(username, password))
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the client sent, before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialInput {
    Absent,
    /// A header was present but could not be decoded; treated as a wrong credential.
    Malformed,
    Provided(Credential),
}

impl CredentialInput {
    pub fn from_authorization(header: Option<&str>) -> Self {
        match header {
            None => Self::Absent,
            Some(value) => match Credential::from_basic_header(value) {
                Some(credential) => Self::Provided(credential),
                None => Self::Malformed,
            },
        }
    }
}

impl From<Option<Credential>> for CredentialInput {
    fn from(credential: Option<Credential>) -> Self {
        credential.map_or(Self::Absent, Self::Provided)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    Required,
    #[error("invalid credentials")]
    Invalid,
}

#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    expected: Option<Credential>,
}

impl Authenticator {
    pub fn new(expected: Option<Credential>) -> Self {
        Self { expected }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, input: &CredentialInput) -> Result<Identity, AuthError> {
        let Some(expected) = &self.expected else {
            return Ok(Identity::Anonymous);
        };

        match input {
            CredentialInput::Absent => Err(AuthError::Required),
            CredentialInput::Malformed => Err(AuthError::Invalid),
            CredentialInput::Provided(provided) => {
                let user_ok = constant_time_eq(provided.username.as_bytes(), expected.username.as_bytes());
                let pass_ok = constant_time_eq(provided.password.as_bytes(), expected.password.as_bytes());
                if user_ok & pass_ok {
                    Ok(Identity::User(provided.username.clone()))
                } else {
                    Err(AuthError::Invalid)
                }
            }
        }
    }
}

/// Compares every byte of the longer input; only the length of `expected` leaks.
fn constant_time_eq(provided: &[u8], expected: &[u8]) -> bool {
    let mut diff = provided.len() ^ expected.len();
    for (i, byte) in expected.iter().enumerate() {
        let other = provided.get(i).copied().unwrap_or(0);
        diff |= usize::from(byte ^ other);
    }
    diff == 0
}
