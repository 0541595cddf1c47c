use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;

use lending_client::api::{Credentials, LoginResponse, Role, User};
use lending_client::client::LendingApiClient;
use lending_client::error::ApiError;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

/// Authentication state. Role checks are plain set membership; there is no
/// partially-authenticated in-between state.
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Anonymous,
    Authenticated { token: String, user: User },
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }

    pub fn has_role(&self, role: Role) -> bool {
        match self {
            Session::Anonymous => false,
            Session::Authenticated { user, .. } => user.roles.contains(&role),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Session::Anonymous => None,
            Session::Authenticated { user, .. } => Some(user.username.as_str()),
        }
    }
}

/// Key/value persistence for the session, mirroring the browser local
/// storage the original app kept its `token` and `user` entries in.
/// Implementations never fail a caller; a broken store degrades to "no
/// persisted session".
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
    fn clear(&self, key: &str);
}

#[derive(Default)]
pub struct InMemorySessionStore {
    values: RwLock<std::collections::HashMap<String, String>>,
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn clear(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// One file per key under a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
        Ok(Self { dir })
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.join(key)).ok()
    }

    fn save(&self, key: &str, value: &str) {
        if let Err(err) = std::fs::write(self.dir.join(key), value) {
            tracing::warn!("Failed to persist session entry {}: {}", key, err);
        }
    }

    fn clear(&self, key: &str) {
        let path = self.dir.join(key);
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to clear session entry {}: {}", key, err);
            }
        }
    }
}

/// The authentication endpoints the session holder needs, plus control over
/// the bearer token attached to outbound requests.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError>;
    async fn signup(&self, credentials: &Credentials) -> Result<(), ApiError>;
    async fn me(&self) -> Result<User, ApiError>;
    fn set_bearer_token(&self, token: &str);
    fn clear_bearer_token(&self);
}

#[async_trait]
impl AuthApi for LendingApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        LendingApiClient::login(self, credentials).await
    }

    async fn signup(&self, credentials: &Credentials) -> Result<(), ApiError> {
        LendingApiClient::signup(self, credentials).await
    }

    async fn me(&self) -> Result<User, ApiError> {
        LendingApiClient::me(self).await
    }

    fn set_bearer_token(&self, token: &str) {
        LendingApiClient::set_bearer_token(self, token)
    }

    fn clear_bearer_token(&self) {
        LendingApiClient::clear_bearer_token(self)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("login response did not contain an access token")]
    MissingToken,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Process-wide auth/session holder. Owns the persisted token/profile and
/// keeps the API client's bearer token in step with the current session.
pub struct AuthHandle {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
    session: RwLock<Session>,
}

/// Persisted values that are empty, whitespace, or the literal "undefined"
/// (a serialization accident the original app had to tolerate) count as
/// absent.
fn sanitize(raw: Option<String>) -> Option<String> {
    raw.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "undefined" {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl AuthHandle {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            api,
            store,
            session: RwLock::new(Session::Anonymous),
        }
    }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.session.read().has_role(role)
    }

    /// Rebuilds the session from the store at startup. A persisted token
    /// without a usable profile triggers a /auth/me fetch; unauthorized
    /// there means the token is stale and forces a full logout.
    pub async fn restore(&self) -> Result<Session, ApiError> {
        let Some(token) = sanitize(self.store.load(TOKEN_KEY)) else {
            self.store.clear(TOKEN_KEY);
            return Ok(Session::Anonymous);
        };
        self.api.set_bearer_token(&token);

        let user = sanitize(self.store.load(USER_KEY)).and_then(|raw| {
            match serde_json::from_str::<User>(&raw) {
                Ok(user) => Some(user),
                Err(err) => {
                    tracing::warn!("Discarding corrupt persisted profile: {}", err);
                    self.store.clear(USER_KEY);
                    None
                }
            }
        });

        let user = match user {
            Some(user) => user,
            None => match self.api.me().await {
                Ok(user) => {
                    self.persist_user(&user);
                    user
                }
                Err(ApiError::Unauthorized) => {
                    self.logout();
                    return Ok(Session::Anonymous);
                }
                Err(err) => {
                    // Transient failure: keep the token so a later restore
                    // can retry, but report no session for now.
                    tracing::warn!("Failed to fetch profile during restore: {}", err);
                    return Err(err);
                }
            },
        };

        let session = Session::Authenticated { token, user };
        *self.session.write() = session.clone();
        Ok(session)
    }

    /// Exchanges credentials for a token, persists it, and attaches it to
    /// the client. When the login response carries no profile it is fetched
    /// via /auth/me; unauthorized there forces a full logout.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self.api.login(&credentials).await?;
        let (token, user) = response.into_parts();
        let token = token.ok_or(AuthError::MissingToken)?;

        self.api.set_bearer_token(&token);
        self.store.save(TOKEN_KEY, &token);

        let user = match user {
            Some(user) => user,
            None => {
                self.store.clear(USER_KEY);
                match self.api.me().await {
                    Ok(user) => user,
                    Err(ApiError::Unauthorized) => {
                        self.logout();
                        return Err(ApiError::Unauthorized.into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };
        self.persist_user(&user);

        let session = Session::Authenticated { token, user };
        *self.session.write() = session.clone();
        tracing::info!("Logged in as {}", username);
        Ok(session)
    }

    /// Creates an account, then logs straight in with the same credentials.
    pub async fn register(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.api.signup(&credentials).await?;
        self.login(username, password).await
    }

    /// Clears the session, the persisted entries, and the attached header.
    pub fn logout(&self) {
        *self.session.write() = Session::Anonymous;
        self.store.clear(TOKEN_KEY);
        self.store.clear(USER_KEY);
        self.api.clear_bearer_token();
    }

    fn persist_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(raw) => self.store.save(USER_KEY, &raw),
            Err(err) => tracing::warn!("Failed to serialize profile: {}", err),
        }
    }
}
