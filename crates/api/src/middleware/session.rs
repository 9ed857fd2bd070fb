//! HMAC-signed session cookies.
//!
//! The cookie value is `base64url(json(identity)) . hex(hmac_sha256)`. A bad
//! or missing signature simply means an anonymous request; handlers that need
//! a login use the [`ValidLogin`] extractor.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use ohq_domain::{ApiError, SESSION_COOKIE, SessionIdentity};

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Thirty days.
const SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Clone)]
pub struct SessionCodec {
    key: Arc<Vec<u8>>,
}

impl SessionCodec {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: Arc::new(key.to_vec()),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length")
    }

    pub fn encode(&self, identity: &SessionIdentity) -> String {
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(identity).unwrap_or_default());
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{payload}.{signature}")
    }

    pub fn decode(&self, value: &str) -> Option<SessionIdentity> {
        let (payload, signature) = value.split_once('.')?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Value of a cookie from the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=')
                && k == name
            {
                return Some(v.to_string());
            }
        }
    }
    None
}

pub fn session_cookie(value: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_MAX_AGE_SECS}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0")
}

/// A short-lived cookie for OAuth round-trip state.
pub fn transient_cookie(name: &str, value: &str, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age=600");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_transient_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; Max-Age=0")
}

/// The session identity, if the request carried a valid cookie.
pub struct MaybeIdentity(pub Option<SessionIdentity>);

impl FromRequestParts<Arc<AppState>> for MaybeIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = cookie_value(&parts.headers, SESSION_COOKIE)
            .and_then(|value| state.sessions.decode(&value));
        Ok(MaybeIdentity(identity))
    }
}

/// Extractor that insists on a logged-in session. Handlers that declare it
/// are automatically protected; the 401 path invalidates the cookie.
pub struct ValidLogin(pub SessionIdentity);

impl FromRequestParts<Arc<AppState>> for ValidLogin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Ok(MaybeIdentity(identity)) =
            MaybeIdentity::from_request_parts(parts, state).await;
        identity
            .map(ValidLogin)
            .ok_or_else(|| ApiError::Unauthenticated("login required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn codec() -> SessionCodec {
        SessionCodec::new(b"test-session-key")
    }

    fn identity() -> SessionIdentity {
        SessionIdentity {
            email: "a@x.edu".into(),
            name: "Ada Lovelace".into(),
            first_name: "Ada".into(),
            groups: vec!["students".into()],
        }
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let encoded = codec.encode(&identity());
        assert_eq!(codec.decode(&encoded), Some(identity()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = codec();
        let encoded = codec.encode(&identity());
        let (payload, signature) = encoded.split_once('.').unwrap();
        let forged_payload =
            URL_SAFE_NO_PAD.encode(br#"{"email":"evil@x.edu","name":"","first_name":""}"#);
        assert_eq!(codec.decode(&format!("{forged_payload}.{signature}")), None);
        assert_eq!(codec.decode(&format!("{payload}.deadbeef")), None);
        assert_eq!(codec.decode("garbage"), None);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let encoded = codec().encode(&identity());
        let other = SessionCodec::new(b"different-key");
        assert_eq!(other.decode(&encoded), None);
    }

    #[test]
    fn cookie_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; ohq_session=abc.def; trailing=2"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE).as_deref(),
            Some("abc.def")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
