use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, RemoteError, Result, ValidationError};
use crate::storage;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

pub enum SignUp {
    SignedIn(Session),
    ConfirmationRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    SignedIn,
    ConfirmationRequired,
}

/// Remote identity provider.
pub trait IdentityService {
    fn get_user(&self, access_token: &str) -> std::result::Result<User, RemoteError>;

    fn sign_in(&self, email: &str, password: &str) -> std::result::Result<Session, RemoteError>;

    fn sign_up(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> std::result::Result<SignUp, RemoteError>;

    fn refresh(&self, refresh_token: &str) -> std::result::Result<Session, RemoteError>;

    fn update_password(&self, access_token: &str, password: &str) -> std::result::Result<(), RemoteError>;

    fn recover(&self, email: &str, redirect_to: Option<&str>) -> std::result::Result<(), RemoteError>;

    fn sign_out(&self, access_token: &str) -> std::result::Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Loading,
    Authenticated(Session),
    Unauthenticated,
}

/// Session lifecycle. Starts in `Loading` until `check_session` has run; every
/// transition that produces a session persists it when a path is set.
pub struct AuthContext<I> {
    identity: I,
    state: AuthState,
    session_path: Option<PathBuf>,
}

impl<I: IdentityService> AuthContext<I> {
    pub fn new(identity: I, session_path: Option<PathBuf>) -> Self {
        Self {
            identity,
            state: AuthState::Loading,
            session_path,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == AuthState::Loading
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|session| &session.user)
    }

    /// Restores the persisted session. A rejected access token is renewed
    /// once with the refresh token; any other failure ends unauthenticated.
    pub fn check_session(&mut self, force_login: bool) -> &AuthState {
        self.state = AuthState::Loading;
        if force_login {
            self.forget_session();
            self.state = AuthState::Unauthenticated;
            return &self.state;
        }

        let stored = self
            .session_path
            .as_deref()
            .and_then(storage::read_session);
        let Some(stored) = stored else {
            self.state = AuthState::Unauthenticated;
            return &self.state;
        };

        self.state = match self.identity.get_user(&stored.access_token) {
            Ok(user) => {
                let session = Session { user, ..stored };
                self.persist(&session);
                AuthState::Authenticated(session)
            }
            Err(RemoteError::Unauthorized(_)) => match self.identity.refresh(&stored.refresh_token) {
                Ok(session) => {
                    info!("session renewed");
                    self.persist(&session);
                    AuthState::Authenticated(session)
                }
                Err(err) => {
                    warn!(error = %err, "stored session could not be renewed");
                    self.forget_session();
                    AuthState::Unauthenticated
                }
            },
            Err(err) => {
                warn!(error = %err, "session check failed");
                AuthState::Unauthenticated
            }
        };
        &self.state
    }

    pub fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let email = email.trim();
        require(email, "Email is required")?;
        require(password, "Password is required")?;

        let session = self.identity.sign_in(email, password)?;
        info!(user_id = %session.user.id, "signed in");
        self.adopt(session);
        Ok(())
    }

    pub fn register(
        &mut self,
        full_name: &str,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<RegisterOutcome> {
        let full_name = full_name.trim();
        let email = email.trim();
        require(full_name, "Full name is required")?;
        require(email, "Email is required")?;
        validate_new_password(password, confirm)?;

        match self.identity.sign_up(full_name, email, password)? {
            SignUp::SignedIn(session) => {
                info!(user_id = %session.user.id, "registered and signed in");
                self.adopt(session);
                Ok(RegisterOutcome::SignedIn)
            }
            SignUp::ConfirmationRequired => {
                info!("registration awaiting email confirmation");
                self.state = AuthState::Unauthenticated;
                Ok(RegisterOutcome::ConfirmationRequired)
            }
        }
    }

    /// Adopts tokens handed over out of band, such as a recovery link.
    pub fn set_session(&mut self, access_token: &str, refresh_token: &str) -> Result<()> {
        let access_token = access_token.trim();
        let refresh_token = refresh_token.trim();
        require(access_token, "Access token is required")?;
        require(refresh_token, "Refresh token is required")?;

        let user = self.identity.get_user(access_token)?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: crate::supabase::token_expiry(access_token),
            user,
        };
        self.adopt(session);
        Ok(())
    }

    /// Renews the access token. A failed renewal signs the user out locally.
    pub fn refresh(&mut self) -> Result<()> {
        let refresh_token = match &self.state {
            AuthState::Authenticated(session) => session.refresh_token.clone(),
            _ => return Err(RemoteError::Unauthorized("No active session".to_string()).into()),
        };

        match self.identity.refresh(&refresh_token) {
            Ok(session) => {
                self.adopt(session);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "session refresh failed");
                self.forget_session();
                self.state = AuthState::Unauthenticated;
                Err(err.into())
            }
        }
    }

    pub fn update_password(&mut self, password: &str, confirm: &str) -> Result<()> {
        validate_new_password(password, confirm)?;
        let session = self
            .session()
            .ok_or_else(|| Error::from(RemoteError::Unauthorized("No active session".to_string())))?;
        self.identity.update_password(&session.access_token, password)?;
        info!(user_id = %session.user.id, "password updated");
        Ok(())
    }

    pub fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        let email = email.trim();
        require(email, "Email is required")?;
        self.identity.recover(email, redirect_to)?;
        info!("password reset requested");
        Ok(())
    }

    /// Always ends unauthenticated; a failed remote sign-out is only logged.
    pub fn logout(&mut self) {
        if let AuthState::Authenticated(session) = &self.state {
            if let Err(err) = self.identity.sign_out(&session.access_token) {
                warn!(error = %err, "remote sign-out failed");
            }
            info!(user_id = %session.user.id, "signed out");
        }
        self.forget_session();
        self.state = AuthState::Unauthenticated;
    }

    fn adopt(&mut self, session: Session) {
        self.persist(&session);
        self.state = AuthState::Authenticated(session);
    }

    fn persist(&self, session: &Session) {
        if let Some(path) = &self.session_path
            && let Err(err) = storage::write_session(path, session)
        {
            warn!(error = %err, "failed to persist session");
        }
    }

    fn forget_session(&self) {
        if let Some(path) = &self.session_path
            && let Err(err) = storage::clear_session(path)
        {
            warn!(error = %err, "failed to remove stored session");
        }
    }
}

pub fn validate_new_password(password: &str, confirm: &str) -> std::result::Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::Password("Password must be at least 6 characters"));
    }
    if password != confirm {
        return Err(ValidationError::Password("Passwords do not match"));
    }
    Ok(())
}

/// Extracts the tokens from a recovery link such as
/// `https://host/reset#access_token=..&refresh_token=..&type=recovery`.
pub fn parse_recovery_link(link: &str) -> Option<(String, String)> {
    let fragment = link.trim().rsplit_once('#').map_or(link.trim(), |(_, tail)| tail);
    let mut access = None;
    let mut refresh = None;
    for pair in fragment.split('&') {
        match pair.split_once('=') {
            Some(("access_token", value)) if !value.is_empty() => access = Some(value.to_string()),
            Some(("refresh_token", value)) if !value.is_empty() => refresh = Some(value.to_string()),
            _ => {}
        }
    }
    Some((access?, refresh?))
}

fn require(value: &str, message: &'static str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::Field(message))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    const PASSWORD: &str = "hunter22";

    #[derive(Default)]
    struct FakeIdentity {
        valid_tokens: RefCell<HashSet<String>>,
        refresh_works: bool,
        needs_confirmation: bool,
        sign_out_fails: bool,
        network_down: bool,
        calls: RefCell<Vec<String>>,
        issued: RefCell<u32>,
    }

    impl FakeIdentity {
        fn issue(&self) -> Session {
            let mut issued = self.issued.borrow_mut();
            *issued += 1;
            let access_token = format!("access-{issued}");
            self.valid_tokens.borrow_mut().insert(access_token.clone());
            Session {
                access_token,
                refresh_token: format!("refresh-{issued}"),
                expires_at: Some(1_800_000_000),
                user: user(),
            }
        }

        fn log(&self, call: &str) {
            self.calls.borrow_mut().push(call.to_string());
        }
    }

    fn user() -> User {
        User {
            id: "8f14e45f-ceea-467f-a0e6-ee0a1a1b7d11".to_string(),
            email: Some("ada@example.com".to_string()),
            full_name: Some("Ada".to_string()),
        }
    }

    impl IdentityService for FakeIdentity {
        fn get_user(&self, access_token: &str) -> std::result::Result<User, RemoteError> {
            self.log("get_user");
            if self.network_down {
                return Err(RemoteError::Network("offline".to_string()));
            }
            if self.valid_tokens.borrow().contains(access_token) {
                Ok(user())
            } else {
                Err(RemoteError::Unauthorized("JWT expired".to_string()))
            }
        }

        fn sign_in(&self, _email: &str, password: &str) -> std::result::Result<Session, RemoteError> {
            self.log("sign_in");
            if password == PASSWORD {
                Ok(self.issue())
            } else {
                Err(RemoteError::Rejected("Invalid login credentials".to_string()))
            }
        }

        fn sign_up(&self, _: &str, _: &str, _: &str) -> std::result::Result<SignUp, RemoteError> {
            self.log("sign_up");
            if self.needs_confirmation {
                Ok(SignUp::ConfirmationRequired)
            } else {
                Ok(SignUp::SignedIn(self.issue()))
            }
        }

        fn refresh(&self, _refresh_token: &str) -> std::result::Result<Session, RemoteError> {
            self.log("refresh");
            if self.refresh_works {
                Ok(self.issue())
            } else {
                Err(RemoteError::Unauthorized("Invalid Refresh Token".to_string()))
            }
        }

        fn update_password(&self, _: &str, _: &str) -> std::result::Result<(), RemoteError> {
            self.log("update_password");
            Ok(())
        }

        fn recover(&self, _: &str, _: Option<&str>) -> std::result::Result<(), RemoteError> {
            self.log("recover");
            Ok(())
        }

        fn sign_out(&self, _: &str) -> std::result::Result<(), RemoteError> {
            self.log("sign_out");
            if self.sign_out_fails {
                Err(RemoteError::Network("offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn stored_session(token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: "stored-refresh".to_string(),
            expires_at: None,
            user: user(),
        }
    }

    #[test]
    fn starts_loading_and_without_stored_session_ends_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = AuthContext::new(FakeIdentity::default(), Some(dir.path().join("s.json")));
        assert!(auth.is_loading());
        assert_eq!(auth.check_session(false), &AuthState::Unauthenticated);
        assert!(auth.identity.calls.borrow().is_empty());
    }

    #[test]
    fn valid_stored_session_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        storage::write_session(&path, &stored_session("good")).unwrap();
        let identity = FakeIdentity::default();
        identity.valid_tokens.borrow_mut().insert("good".to_string());

        let mut auth = AuthContext::new(identity, Some(path));
        auth.check_session(false);
        assert_eq!(auth.session().map(|s| s.access_token.as_str()), Some("good"));
    }

    #[test]
    fn rejected_stored_session_is_renewed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        storage::write_session(&path, &stored_session("expired")).unwrap();
        let identity = FakeIdentity {
            refresh_works: true,
            ..FakeIdentity::default()
        };

        let mut auth = AuthContext::new(identity, Some(path.clone()));
        auth.check_session(false);
        assert_eq!(auth.session().map(|s| s.access_token.as_str()), Some("access-1"));
        assert_eq!(*auth.identity.calls.borrow(), ["get_user", "refresh"]);
        assert_eq!(
            storage::read_session(&path).map(|s| s.refresh_token),
            Some("refresh-1".to_string())
        );
    }

    #[test]
    fn failed_renewal_clears_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        storage::write_session(&path, &stored_session("expired")).unwrap();

        let mut auth = AuthContext::new(FakeIdentity::default(), Some(path.clone()));
        assert_eq!(auth.check_session(false), &AuthState::Unauthenticated);
        assert!(storage::read_session(&path).is_none());
    }

    #[test]
    fn network_failure_during_check_keeps_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        storage::write_session(&path, &stored_session("good")).unwrap();
        let identity = FakeIdentity {
            network_down: true,
            ..FakeIdentity::default()
        };

        let mut auth = AuthContext::new(identity, Some(path.clone()));
        assert_eq!(auth.check_session(false), &AuthState::Unauthenticated);
        assert!(storage::read_session(&path).is_some());
    }

    #[test]
    fn force_login_ignores_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        storage::write_session(&path, &stored_session("good")).unwrap();

        let mut auth = AuthContext::new(FakeIdentity::default(), Some(path.clone()));
        assert_eq!(auth.check_session(true), &AuthState::Unauthenticated);
        assert!(storage::read_session(&path).is_none());
    }

    #[test]
    fn login_validates_before_calling_remote() {
        let mut auth = AuthContext::new(FakeIdentity::default(), None);
        assert!(matches!(
            auth.login("  ", PASSWORD),
            Err(Error::Validation(ValidationError::Field("Email is required")))
        ));
        assert!(matches!(
            auth.login("ada@example.com", ""),
            Err(Error::Validation(ValidationError::Field(_)))
        ));
        assert!(auth.identity.calls.borrow().is_empty());

        assert!(matches!(
            auth.login("ada@example.com", "wrong-password"),
            Err(Error::Remote(RemoteError::Rejected(_)))
        ));
        auth.login("ada@example.com", PASSWORD).unwrap();
        assert_eq!(auth.user().map(User::display_name), Some("Ada"));
    }

    #[test]
    fn register_checks_password_rules() {
        let mut auth = AuthContext::new(FakeIdentity::default(), None);
        assert!(matches!(
            auth.register("Ada", "ada@example.com", "short", "short"),
            Err(Error::Validation(ValidationError::Password(_)))
        ));
        assert!(matches!(
            auth.register("Ada", "ada@example.com", "secret1", "secret2"),
            Err(Error::Validation(ValidationError::Password("Passwords do not match")))
        ));
        assert_eq!(
            auth.register("Ada", "ada@example.com", "secret1", "secret1").unwrap(),
            RegisterOutcome::SignedIn
        );
        assert!(auth.session().is_some());
    }

    #[test]
    fn register_with_confirmation_stays_unauthenticated() {
        let identity = FakeIdentity {
            needs_confirmation: true,
            ..FakeIdentity::default()
        };
        let mut auth = AuthContext::new(identity, None);
        let outcome = auth.register("Ada", "ada@example.com", "secret1", "secret1").unwrap();
        assert_eq!(outcome, RegisterOutcome::ConfirmationRequired);
        assert_eq!(auth.state(), &AuthState::Unauthenticated);
    }

    #[test]
    fn logout_clears_local_state_even_when_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let identity = FakeIdentity {
            sign_out_fails: true,
            ..FakeIdentity::default()
        };
        let mut auth = AuthContext::new(identity, Some(path.clone()));
        auth.login("ada@example.com", PASSWORD).unwrap();
        assert!(storage::read_session(&path).is_some());

        auth.logout();
        assert_eq!(auth.state(), &AuthState::Unauthenticated);
        assert!(storage::read_session(&path).is_none());
    }

    #[test]
    fn refresh_failure_signs_out() {
        let mut auth = AuthContext::new(FakeIdentity::default(), None);
        auth.login("ada@example.com", PASSWORD).unwrap();
        assert!(auth.refresh().is_err());
        assert_eq!(auth.state(), &AuthState::Unauthenticated);
    }

    #[test]
    fn update_password_requires_session() {
        let mut auth = AuthContext::new(FakeIdentity::default(), None);
        assert!(auth.update_password("secret1", "secret1").unwrap_err().is_unauthorized());
        auth.login("ada@example.com", PASSWORD).unwrap();
        auth.update_password("secret1", "secret1").unwrap();
        assert_eq!(auth.identity.calls.borrow().last().map(String::as_str), Some("update_password"));
    }

    #[test]
    fn set_session_validates_tokens_with_backend() {
        let identity = FakeIdentity::default();
        identity.valid_tokens.borrow_mut().insert("from-link".to_string());
        let mut auth = AuthContext::new(identity, None);

        assert!(auth.set_session("bogus", "r").unwrap_err().is_unauthorized());
        auth.set_session("from-link", "r").unwrap();
        assert_eq!(auth.session().map(|s| s.refresh_token.as_str()), Some("r"));
    }

    #[test]
    fn recovery_link_tokens_are_extracted() {
        let link = "https://app.example.com/reset#access_token=abc&expires_in=3600&refresh_token=def&type=recovery";
        assert_eq!(
            parse_recovery_link(link),
            Some(("abc".to_string(), "def".to_string()))
        );
        assert_eq!(parse_recovery_link("access_token=abc"), None);
    }

    #[test]
    fn reset_request_requires_email() {
        let auth = AuthContext::new(FakeIdentity::default(), None);
        assert!(auth.reset_password_for_email(" ", None).is_err());
        auth.reset_password_for_email("ada@example.com", None).unwrap();
    }
}
