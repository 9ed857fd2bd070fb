//! OIDC login flow.
//!
//! Authorization-code flow with a `state` round-trip cookie and optional
//! PKCE. On success the session cookie gains `email`, `name`, `first_name`
//! and `groups` from the verified id_token, and the client is sent back to
//! the base URL.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Redirect, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header, jwk};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use ohq_config::AppConfig;
use ohq_domain::{ApiError, SessionIdentity};

use crate::AppState;
use crate::middleware::rate_limit::OAUTH_LIMIT;
use crate::middleware::real_ip::RealIp;
use crate::middleware::session::{
    clear_session_cookie, clear_transient_cookie, cookie_value, session_cookie, transient_cookie,
};

const STATE_COOKIE: &str = "ohq_oauth_state";
const PKCE_COOKIE: &str = "ohq_pkce_verifier";
const STATE_LENGTH: usize = 64;

/// OIDC endpoints resolved from the issuer's discovery document at startup.
pub struct OidcClient {
    http: reqwest::Client,
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    use_pkce: bool,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

/// Claims we pull out of the id_token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    groups: Vec<String>,
}

impl OidcClient {
    /// Fetch the discovery document and build a client.
    pub async fn discover(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::new();
        let url = format!(
            "{}/.well-known/openid-configuration",
            config.oidc_issuer_url.trim_end_matches('/')
        );
        let document: DiscoveryDocument = http.get(&url).send().await?.json().await?;
        Ok(Self {
            http,
            issuer: document.issuer,
            authorization_endpoint: document.authorization_endpoint,
            token_endpoint: document.token_endpoint,
            jwks_uri: document.jwks_uri,
            client_id: config.oauth2_client_id.clone(),
            client_secret: config.oauth2_client_secret.clone(),
            redirect_uri: config.oauth2_redirect_uri.clone(),
            use_pkce: config.use_pkce,
        })
    }

    fn authorization_url(
        &self,
        state: &str,
        pkce_challenge: Option<&str>,
    ) -> Result<reqwest::Url, ApiError> {
        let mut url =
            reqwest::Url::parse(&self.authorization_endpoint).map_err(ApiError::internal)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", "openid email profile")
            .append_pair("state", state);
        if let Some(challenge) = pkce_challenge {
            url.query_pairs_mut()
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
        }
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];
        if let Some(verifier) = pkce_verifier {
            form.push(("code_verifier", verifier));
        }
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(ApiError::internal)?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "token exchange refused");
            return Err(ApiError::Unauthenticated("login failed".to_string()));
        }
        let token: TokenResponse = response.json().await.map_err(ApiError::internal)?;
        Ok(token.id_token)
    }

    /// Verify the id_token signature against the provider's JWKS and return
    /// its claims.
    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ApiError> {
        let header = decode_header(id_token)
            .map_err(|_| ApiError::Unauthenticated("malformed id_token".to_string()))?;
        let jwks: jwk::JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(ApiError::internal)?
            .json()
            .await
            .map_err(ApiError::internal)?;
        let kid = header
            .kid
            .ok_or_else(|| ApiError::Unauthenticated("id_token has no key id".to_string()))?;
        let key = jwks
            .find(&kid)
            .ok_or_else(|| ApiError::Unauthenticated("unknown signing key".to_string()))?;
        let decoding_key = DecodingKey::from_jwk(key).map_err(ApiError::internal)?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|_| ApiError::Unauthenticated("id_token verification failed".to_string()))?;
        Ok(data.claims)
    }
}

fn random_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn oidc(state: &AppState) -> Result<&OidcClient, ApiError> {
    state
        .oidc
        .as_deref()
        .ok_or_else(|| ApiError::internal(anyhow::anyhow!("OIDC login is not configured")))
}

fn set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// `GET /oauth2login`
pub async fn login(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let oidc = oidc(&state)?;
    let secure = state.config.secure_cookies;
    let state_token = random_token(STATE_LENGTH);

    let (challenge, verifier) = if oidc.use_pkce {
        let verifier = random_token(STATE_LENGTH);
        (Some(pkce_challenge(&verifier)), Some(verifier))
    } else {
        (None, None)
    };

    let url = oidc.authorization_url(&state_token, challenge.as_deref())?;
    let mut response = Redirect::to(url.as_str()).into_response();
    set_cookie(
        &mut response,
        &transient_cookie(STATE_COOKIE, &state_token, secure),
    );
    if let Some(verifier) = verifier {
        set_cookie(
            &mut response,
            &transient_cookie(PKCE_COOKIE, &verifier, secure),
        );
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// `GET /oauth2callback`
pub async fn callback(
    State(state): State<Arc<AppState>>,
    RealIp(ip): RealIp,
    headers: axum::http::HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    state.limiter.enforce("oauth", &ip, OAUTH_LIMIT)?;
    let oidc = oidc(&state)?;

    let expected_state = cookie_value(&headers, STATE_COOKIE)
        .ok_or_else(|| ApiError::Unauthenticated("missing login state".to_string()))?;
    if params.state != expected_state {
        return Err(ApiError::Unauthenticated("login state mismatch".to_string()));
    }

    let pkce_verifier = oidc
        .use_pkce
        .then(|| cookie_value(&headers, PKCE_COOKIE))
        .flatten();
    let id_token = oidc
        .exchange_code(&params.code, pkce_verifier.as_deref())
        .await?;
    let claims = oidc.verify_id_token(&id_token).await?;

    if !state.config.valid_domain.is_empty()
        && !claims
            .email
            .ends_with(&format!("@{}", state.config.valid_domain))
    {
        return Err(ApiError::Forbidden(
            "your account's email domain is not allowed here".to_string(),
        ));
    }

    let identity = SessionIdentity {
        email: claims.email,
        name: claims.name,
        first_name: claims.given_name,
        groups: claims.groups,
    };
    tracing::info!(email = %identity.email, "login succeeded");

    let secure = state.config.secure_cookies;
    let mut response = Redirect::to(&state.config.base_url).into_response();
    set_cookie(
        &mut response,
        &session_cookie(&state.sessions.encode(&identity), secure),
    );
    set_cookie(&mut response, &clear_transient_cookie(STATE_COOKIE));
    set_cookie(&mut response, &clear_transient_cookie(PKCE_COOKIE));
    Ok(response)
}

/// `GET /logout`
pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    let mut response = Redirect::to(&state.config.base_url).into_response();
    set_cookie(&mut response, &clear_session_cookie());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tokens_are_64_chars_of_alnum() {
        let token = random_token(STATE_LENGTH);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, random_token(STATE_LENGTH));
    }

    #[test]
    fn pkce_challenge_is_urlsafe_sha256() {
        // RFC 7636 appendix B test vector.
        let challenge = pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }
}
