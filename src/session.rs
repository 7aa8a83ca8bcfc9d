use std::sync::Mutex;

use serde_json::{Value, json};

use crate::error::KiraError;
use crate::rpc::RpcClient;

/// Supplies the bearer token passed with every remote call.
pub trait SessionProvider: Send + Sync {
    fn user(&self) -> &str;
    fn token(&self) -> Result<String, KiraError>;
    /// Drops the cached token and authenticates again.
    fn refresh(&self) -> Result<String, KiraError>;
}

pub const DEFAULT_PASSWORD_VAR: &str = "KIRA_SF_PASSWORD";

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// `password` is the value read from the variable named `password_var`.
    pub fn resolve(
        user: Option<String>,
        password: Option<String>,
        password_var: &str,
    ) -> Result<Self, KiraError> {
        let user = user
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .ok_or_else(|| {
                KiraError::MissingCredential("user (use --user or KIRA_SF_USER)".to_string())
            })?;
        let password = password.filter(|password| !password.is_empty()).ok_or_else(|| {
            KiraError::MissingCredential(format!("password (set {password_var})"))
        })?;
        Ok(Self { user, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Logs in once with user and password and reuses the token until the
/// service rejects it.
pub struct PasswordSession {
    user: String,
    password: String,
    rpc: RpcClient,
    token: Mutex<Option<String>>,
}

impl PasswordSession {
    pub fn new(rpc: RpcClient, user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            rpc,
            token: Mutex::new(None),
        }
    }

    /// Authenticates eagerly so bad credentials fail before any search.
    pub fn login(rpc: RpcClient, user: &str, password: &str) -> Result<Self, KiraError> {
        let session = Self::new(rpc, user, password);
        session.token()?;
        Ok(session)
    }

    pub fn logout(&self) {
        let token = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            if let Err(err) = self.rpc.call("logout", json!([token])) {
                tracing::debug!("logout failed: {err}");
            }
        }
    }

    fn authenticate(&self) -> Result<String, KiraError> {
        let result = self
            .rpc
            .call("login", json!([self.user, self.password]))
            .map_err(|err| match err {
                KiraError::Rpc { .. } => KiraError::Authentication {
                    user: self.user.clone(),
                },
                other => other,
            })?;
        match result {
            Value::String(token) if !token.trim().is_empty() => {
                tracing::info!(user = %self.user, "logged in");
                Ok(token)
            }
            _ => Err(KiraError::Authentication {
                user: self.user.clone(),
            }),
        }
    }
}

impl SessionProvider for PasswordSession {
    fn user(&self) -> &str {
        &self.user
    }

    fn token(&self) -> Result<String, KiraError> {
        let mut guard = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate()?;
        *guard = Some(token.clone());
        Ok(token)
    }

    fn refresh(&self) -> Result<String, KiraError> {
        let mut guard = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
        let token = self.authenticate()?;
        *guard = Some(token.clone());
        Ok(token)
    }
}
