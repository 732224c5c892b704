use std::cell::RefCell;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::{IdentityService, Session, SignUp, User};
use crate::config::BackendConfig;
use crate::error::RemoteError;
use crate::store::{Query, Table, TableStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP client bound to one backend project.
#[derive(Clone)]
pub struct Backend {
    client: Client,
    config: BackendConfig,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(concat!("clienttime/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str, params: &[(String, String)]) -> Result<Url, RemoteError> {
        let mut url = self
            .config
            .endpoint(path)
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&str>) -> RequestBuilder {
        let bearer = bearer.unwrap_or(&self.config.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Content-Type", "application/json")
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(status_error(status, &body))
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        self.send(request)?
            .json::<T>()
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

/// Maps a failed response to an error, picking the most useful message the
/// backend sent along.
pub fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = error_message(body).unwrap_or_else(|| status.to_string());
    match status.as_u16() {
        401 | 403 => RemoteError::Unauthorized(message),
        404 | 406 => RemoteError::NotFound,
        429 => RemoteError::RateLimited,
        code if code >= 500 => RemoteError::Server(message),
        _ => RemoteError::Rejected(message),
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key)?.as_str())
        .map(str::to_string)
}

/// Reads the `exp` claim of a JWT access token without verifying it.
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

/// PostgREST access to the data tables. Requests carry the signed-in user's
/// access token so row level security applies.
pub struct RestApi {
    backend: Backend,
    access_token: RefCell<Option<String>>,
}

impl RestApi {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            access_token: RefCell::new(None),
        }
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.borrow_mut() = token;
    }

    fn table_request(
        &self,
        method: Method,
        table: Table,
        query: &Query,
        select: bool,
    ) -> Result<RequestBuilder, RemoteError> {
        let mut params = Vec::new();
        if select {
            params.push(("select".to_string(), "*".to_string()));
        }
        params.extend(query.to_params());
        let url = self
            .backend
            .url(&format!("rest/v1/{}", table.as_str()), &params)?;
        debug!(%method, table = table.as_str(), "table request");
        let token = self.access_token.borrow();
        Ok(self.backend.request(method, url, token.as_deref()))
    }
}

impl TableStore for RestApi {
    fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RemoteError> {
        let request = self.table_request(Method::GET, table, query, true)?;
        self.backend.send_json(request)
    }

    fn insert(&self, table: Table, row: Value) -> Result<Value, RemoteError> {
        let request = self
            .table_request(Method::POST, table, &Query::new(), true)?
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<Value> = self.backend.send_json(request)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no row".to_string()))
    }

    fn update(&self, table: Table, query: &Query, patch: Value) -> Result<Vec<Value>, RemoteError> {
        let request = self
            .table_request(Method::PATCH, table, query, true)?
            .header("Prefer", "return=representation")
            .json(&patch);
        self.backend.send_json(request)
    }

    fn delete(&self, table: Table, query: &Query) -> Result<(), RemoteError> {
        let request = self.table_request(Method::DELETE, table, query, false)?;
        self.backend.send(request)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
}

impl From<AuthUser> for User {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.user_metadata.full_name.filter(|name| !name.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_at
            .or_else(|| token_expiry(&response.access_token));
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            user: response.user.into(),
        }
    }
}

/// Sign-up answers with a session when confirmation is disabled and with the
/// bare user otherwise.
pub fn parse_sign_up(body: Value) -> Result<SignUp, RemoteError> {
    if body.get("access_token").is_some() {
        let response: TokenResponse =
            serde_json::from_value(body).map_err(|err| RemoteError::Decode(err.to_string()))?;
        return Ok(SignUp::SignedIn(response.into()));
    }
    Ok(SignUp::ConfirmationRequired)
}

/// GoTrue identity endpoints.
pub struct AuthApi {
    backend: Backend,
}

impl AuthApi {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    fn token(&self, grant_type: &str, body: Value) -> Result<Session, RemoteError> {
        let url = self.backend.url(
            "auth/v1/token",
            &[("grant_type".to_string(), grant_type.to_string())],
        )?;
        debug!(grant_type, "token request");
        let request = self.backend.request(Method::POST, url, None).json(&body);
        let response: TokenResponse = self.backend.send_json(request)?;
        Ok(response.into())
    }
}

impl IdentityService for AuthApi {
    fn get_user(&self, access_token: &str) -> Result<User, RemoteError> {
        let url = self.backend.url("auth/v1/user", &[])?;
        let request = self.backend.request(Method::GET, url, Some(access_token));
        let user: AuthUser = self.backend.send_json(request)?;
        Ok(user.into())
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        self.token("password", json!({ "email": email, "password": password }))
    }

    fn sign_up(&self, full_name: &str, email: &str, password: &str) -> Result<SignUp, RemoteError> {
        let url = self.backend.url("auth/v1/signup", &[])?;
        let body = json!({
            "email": email,
            "password": password,
            "data": { "full_name": full_name },
        });
        let request = self.backend.request(Method::POST, url, None).json(&body);
        let response: Value = self.backend.send_json(request)?;
        parse_sign_up(response)
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        self.token("refresh_token", json!({ "refresh_token": refresh_token }))
    }

    fn update_password(&self, access_token: &str, password: &str) -> Result<(), RemoteError> {
        let url = self.backend.url("auth/v1/user", &[])?;
        let request = self
            .backend
            .request(Method::PUT, url, Some(access_token))
            .json(&json!({ "password": password }));
        self.backend.send(request)?;
        Ok(())
    }

    fn recover(&self, email: &str, redirect_to: Option<&str>) -> Result<(), RemoteError> {
        let params: Vec<(String, String)> = redirect_to
            .map(|target| vec![("redirect_to".to_string(), target.to_string())])
            .unwrap_or_default();
        let url = self.backend.url("auth/v1/recover", &params)?;
        let request = self
            .backend
            .request(Method::POST, url, None)
            .json(&json!({ "email": email }));
        self.backend.send(request)?;
        Ok(())
    }

    fn sign_out(&self, access_token: &str) -> Result<(), RemoteError> {
        let url = self.backend.url("auth/v1/logout", &[])?;
        let request = self.backend.request(Method::POST, url, Some(access_token));
        self.backend.send(request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, r#"{"message":"JWT expired"}"#),
            RemoteError::Unauthorized("JWT expired".to_string())
        );
        assert_eq!(status_error(StatusCode::NOT_ACCEPTABLE, ""), RemoteError::NotFound);
        assert_eq!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), RemoteError::RateLimited);
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "<html>"),
            RemoteError::Server(_)
        ));
        assert_eq!(
            status_error(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            RemoteError::Rejected("Invalid login credentials".to_string())
        );
    }

    #[test]
    fn token_expiry_reads_exp_claim() {
        assert_eq!(token_expiry(&jwt(r#"{"sub":"u","exp":1800000000}"#)), Some(1_800_000_000));
        assert_eq!(token_expiry(&jwt(r#"{"sub":"u"}"#)), None);
        assert_eq!(token_expiry("not-a-jwt"), None);
    }

    #[test]
    fn token_response_becomes_session() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": jwt(r#"{"exp":1800000123}"#),
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r1",
            "user": {
                "id": "8f14e45f-ceea-467f-a0e6-ee0a1a1b7d11",
                "email": "ada@example.com",
                "user_metadata": { "full_name": "Ada Lovelace" }
            }
        }))
        .unwrap();

        let session = Session::from(response);
        assert_eq!(session.expires_at, Some(1_800_000_123));
        assert_eq!(session.refresh_token, "r1");
        assert_eq!(session.user.full_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn sign_up_without_session_needs_confirmation() {
        let outcome = parse_sign_up(json!({
            "id": "8f14e45f-ceea-467f-a0e6-ee0a1a1b7d11",
            "email": "ada@example.com",
            "confirmation_sent_at": "2026-10-19T10:00:00Z"
        }))
        .unwrap();
        assert!(matches!(outcome, SignUp::ConfirmationRequired));
    }
}
