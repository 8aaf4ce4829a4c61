//! Bearer token sources for the queue client.
//!
//! Login and token refresh happen elsewhere; the relay only reads whatever
//! token is current and refuses to call the backend with an expired one.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::path::{Path, PathBuf};

pub trait TokenSource: Send + Sync {
    /// Current token, if there is one.
    fn token(&self) -> Option<String>;
}

/// A fixed token handed in at startup.
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim();
        StaticToken((!token.is_empty()).then(|| token.to_string()))
    }

    pub fn none() -> Self {
        StaticToken(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token file on every call, so an external login flow can
/// rotate it while the relay runs.
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for FileTokenSource {
    fn token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    "[REMOTE] Failed to read token file {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Whether a JWT's `exp` claim lies in the past. The signature is not
/// checked. A token that cannot be decoded, or carries no `exp`, counts as
/// expired.
pub fn is_token_expired(token: &str) -> bool {
    match token_expiry(token) {
        Some(exp) => exp < chrono::Utc::now().timestamp(),
        None => true,
    }
}

fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    // Some issuers keep the padding.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

#[cfg(test)]
pub(crate) fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"relay","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
