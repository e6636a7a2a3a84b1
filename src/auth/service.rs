use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::AuthError;
use crate::store::{self, Collection, DocumentStore, StoreError};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Login record in the `logins` collection, keyed by normalized email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Login {
    uid: String,
    email: String,
    password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub uid: String,
    pub email: Option<String>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInResult {
    pub token: String,
    pub user: CurrentUser,
}

/// Email/password and anonymous sign-in. Logins live in the document store,
/// bearer sessions only in memory.
pub struct AuthService {
    store: Arc<dyn DocumentStore>,
    sessions: RwLock<HashMap<String, CurrentUser>>,
    sign_up_lock: Mutex<()>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Failed to hash password: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn email_matches(doc: &Value, email: &str) -> bool {
    doc.get("email")
        .and_then(Value::as_str)
        .is_some_and(|e| normalize_email(e) == email)
}

/// Id an Admin provisioned for `email`: a permission record carrying the
/// address first, then an employee record.
pub async fn provisioned_uid(
    store: &dyn DocumentStore,
    email: &str,
) -> Result<Option<String>, StoreError> {
    let email = normalize_email(email);
    for collection in [Collection::Users, Collection::Employees] {
        let found = store
            .list(collection)
            .await?
            .into_iter()
            .find(|doc| email_matches(doc, &email))
            .and_then(|doc| doc.get("id").and_then(Value::as_str).map(str::to_string));
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Uid of the login registered for `email`, if any.
pub async fn login_uid(store: &dyn DocumentStore, email: &str) -> Result<Option<String>, StoreError> {
    let login: Option<Login> = store::fetch(store, Collection::Logins, &normalize_email(email)).await?;
    Ok(login.map(|l| l.uid))
}

impl AuthService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            sign_up_lock: Mutex::new(()),
        }
    }

    async fn open_session(&self, user: CurrentUser) -> SignInResult {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(token.clone(), user.clone());
        SignInResult { token, user }
    }

    /// Creates a login record. The uid comes from the employee or permission
    /// record provisioned for this email; a requested `uid` must match it.
    /// Unprovisioned emails get a fresh uid.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        uid: Option<String>,
    ) -> Result<SignInResult, AuthError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(AuthError::Validation("A valid email address is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let requested = uid.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        let password_hash = hash_password(password)?;

        let _guard = self.sign_up_lock.lock().await;
        let docs = self.store.as_ref();
        if docs.get(Collection::Logins, &email).await?.is_some() {
            return Err(AuthError::Conflict("Email is already registered".to_string()));
        }
        let provisioned = provisioned_uid(docs, &email).await?;
        let uid = match (requested, provisioned) {
            (Some(requested), Some(provisioned)) if requested == provisioned => provisioned,
            (Some(requested), _) => {
                warn!("Refused sign-up of <{email}> as {requested}: uid not provisioned for it");
                return Err(AuthError::Forbidden(format!(
                    "Uid {requested} is not provisioned for this email"
                )));
            }
            (None, Some(provisioned)) => provisioned,
            (None, None) => Uuid::new_v4().to_string(),
        };
        if self.has_login(&uid).await? {
            return Err(AuthError::Conflict(format!("Uid {uid} already has a login")));
        }

        let login = Login {
            uid: uid.clone(),
            email: email.clone(),
            password_hash,
            created_at: None,
        };
        store::save(docs, Collection::Logins, &email, &login, false).await?;

        info!("Registered login {uid} <{email}>");
        Ok(self
            .open_session(CurrentUser {
                uid,
                email: Some(email),
                anonymous: false,
            })
            .await)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInResult, AuthError> {
        let email = normalize_email(email);
        let login = store::fetch::<Login>(self.store.as_ref(), Collection::Logins, &email)
            .await?
            .filter(|l| verify_password(password, &l.password_hash))
            .ok_or(AuthError::InvalidCredentials)?;

        info!(
            "Signed in {} (login since {})",
            login.uid,
            login.created_at.as_deref().unwrap_or("unknown")
        );
        Ok(self
            .open_session(CurrentUser {
                uid: login.uid,
                email: Some(login.email),
                anonymous: false,
            })
            .await)
    }

    pub async fn sign_in_anonymously(&self) -> SignInResult {
        self.open_session(CurrentUser {
            uid: Uuid::new_v4().to_string(),
            email: None,
            anonymous: true,
        })
        .await
    }

    pub async fn sign_out(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    pub async fn resolve(&self, token: &str) -> Option<CurrentUser> {
        self.sessions.read().await.get(token).cloned()
    }

    /// Whether `uid` belongs to a registered (non-anonymous) login.
    pub async fn has_login(&self, uid: &str) -> Result<bool, StoreError> {
        let logins = self.store.list(Collection::Logins).await?;
        Ok(logins
            .iter()
            .any(|doc| doc.get("uid").and_then(Value::as_str) == Some(uid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AuthService::new(store.clone()), store)
    }

    async fn provision_employee(store: &MemoryStore, id: &str, email: &str) {
        store
            .set(Collection::Employees, id, json!({"name": id, "email": email}), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sign_up_binds_provisioned_employee() {
        let (auth, store) = service();
        provision_employee(&store, "E001", "somchai@example.com").await;

        let created = auth
            .sign_up("Somchai@Example.com", "secret1", None)
            .await
            .unwrap();
        assert_eq!(created.user.uid, "E001");
        assert_eq!(created.user.email.as_deref(), Some("somchai@example.com"));

        let signed_in = auth.sign_in("somchai@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.user.uid, "E001");
        assert_ne!(signed_in.token, created.token);
        assert!(auth.has_login("E001").await.unwrap());
    }

    #[tokio::test]
    async fn test_requested_uid_must_be_provisioned_for_email() {
        let (auth, store) = service();
        provision_employee(&store, "E001", "somchai@example.com").await;
        store
            .set(Collection::Users, "ADMIN", json!({"role": "Admin", "email": "boss@example.com"}), false)
            .await
            .unwrap();

        for uid in ["ADMIN", "E001", "E404"] {
            let err = auth
                .sign_up("attacker@evil.test", "secret1", Some(uid.to_string()))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Forbidden(_)), "{uid}: {err:?}");
        }
        assert_eq!(store.len(Collection::Logins).await, 0);

        let owner = auth
            .sign_up("somchai@example.com", "secret1", Some("E001".to_string()))
            .await
            .unwrap();
        assert_eq!(owner.user.uid, "E001");
    }

    #[tokio::test]
    async fn test_unprovisioned_email_gets_fresh_uid() {
        let (auth, _store) = service();
        let created = auth.sign_up("new@example.com", "secret1", None).await.unwrap();
        assert!(Uuid::parse_str(&created.user.uid).is_ok());
    }

    #[tokio::test]
    async fn test_logins_survive_a_new_service() {
        let (auth, store) = service();
        let created = auth.sign_up("a@example.com", "secret1", None).await.unwrap();

        let restarted = AuthService::new(store.clone());
        assert_eq!(restarted.resolve(&created.token).await, None);
        let signed_in = restarted.sign_in("a@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.user.uid, created.user.uid);
        assert!(matches!(
            restarted.sign_up("a@example.com", "secret2", None).await,
            Err(AuthError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let (auth, _store) = service();
        auth.sign_up("a@example.com", "secret1", None).await.unwrap();
        assert!(matches!(
            auth.sign_in("a@example.com", "nope-nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.sign_in("b@example.com", "secret1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let (auth, _store) = service();
        auth.sign_up("a@example.com", "secret1", None).await.unwrap();
        assert!(matches!(
            auth.sign_up("A@example.com", "secret2", None).await,
            Err(AuthError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_short_password_is_rejected() {
        let (auth, _store) = service();
        assert!(matches!(
            auth.sign_up("a@example.com", "123", None).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_anonymous_session_has_no_login() {
        let (auth, _store) = service();
        let session = auth.sign_in_anonymously().await;
        assert!(session.user.anonymous);
        assert_eq!(auth.resolve(&session.token).await, Some(session.user.clone()));
        assert!(!auth.has_login(&session.user.uid).await.unwrap());

        assert!(auth.sign_out(&session.token).await);
        assert_eq!(auth.resolve(&session.token).await, None);
    }
}
