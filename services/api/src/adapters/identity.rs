//! services/api/src/adapters/identity.rs
//!
//! Email/password identity behind the `IdentityProvider` port.
//!
//! Passwords are hashed with argon2 and a successful sign-in hands out an
//! opaque session token that the web layer stores in the `session` cookie.
//! Two flavours share the same rules: `PgIdentity` keeps credentials and
//! sessions in PostgreSQL, `MemoryIdentity` keeps them in process memory for
//! the `memory` store backend.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scribe_market_core::domain::{AuthSession, Principal, PrincipalChange};
use scribe_market_core::ports::{IdentityProvider, PortError, PortResult, PrincipalStream};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

const CHANGE_CAPACITY: usize = 64;

//=========================================================================================
// Shared Rules
//=========================================================================================

/// The parts of sign-up/sign-in that do not depend on where credentials live.
#[derive(Clone)]
struct IdentityRules {
    allowed_domains: Vec<String>,
    session_ttl: Duration,
    changes: broadcast::Sender<PrincipalChange>,
}

impl IdentityRules {
    fn new(allowed_domains: Vec<String>, session_ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            allowed_domains,
            session_ttl,
            changes,
        }
    }

    /// An empty allowlist admits every domain.
    fn check_domain(&self, email: &str) -> PortResult<()> {
        if self.allowed_domains.is_empty() {
            return Ok(());
        }
        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .unwrap_or_default();
        if self.allowed_domains.iter().any(|d| *d == domain) {
            Ok(())
        } else {
            warn!(%email, "Refused identity outside the email allowlist");
            Err(PortError::Unauthorized)
        }
    }

    fn new_session(&self, user_id: Uuid, now: DateTime<Utc>) -> AuthSession {
        AuthSession {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + self.session_ttl,
        }
    }

    fn announce(&self, change: PrincipalChange) {
        // No listeners is fine.
        let _ = self.changes.send(change);
    }

    fn stream(&self) -> PrincipalStream {
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(|r| r.ok());
        Box::pin(stream)
    }
}

fn hash_password(password: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            PortError::Unexpected("Failed to hash password".to_string())
        })
}

fn verify_password(password: &str, stored_hash: &str) -> PortResult<bool> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        PortError::Unexpected("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// PostgreSQL Identity
//=========================================================================================

#[derive(FromRow)]
struct CredentialRow {
    user_id: Uuid,
    email: String,
    password_hash: String,
    display_name: String,
    avatar_url: Option<String>,
}
impl CredentialRow {
    fn principal(&self) -> Principal {
        Principal {
            id: self.user_id,
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Credentials and cookie sessions stored in the `credentials` and
/// `auth_sessions` tables.
#[derive(Clone)]
pub struct PgIdentity {
    pool: PgPool,
    rules: IdentityRules,
}

impl PgIdentity {
    pub fn new(pool: PgPool, allowed_domains: Vec<String>, session_ttl: Duration) -> Self {
        Self {
            pool,
            rules: IdentityRules::new(allowed_domains, session_ttl),
        }
    }

    async fn open_session(&self, user_id: Uuid) -> PortResult<AuthSession> {
        let session = self.rules.new_session(user_id, Utc::now());
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for PgIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> PortResult<(AuthSession, Principal)> {
        self.rules.check_domain(email)?;
        let password_hash = hash_password(password)?;
        let principal = Principal {
            id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            avatar_url: None,
        };
        sqlx::query(
            "INSERT INTO credentials (user_id, email, password_hash, display_name) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&password_hash)
        .bind(&principal.display_name)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                PortError::Conflict(format!("An account for {} already exists", email))
            }
            _ => unexpected(e),
        })?;

        let session = self.open_session(principal.id).await?;
        info!(user_id = %principal.id, "New account signed up");
        self.rules.announce(PrincipalChange::SignedIn {
            principal: principal.clone(),
        });
        Ok((session, principal))
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<(AuthSession, Principal)> {
        self.rules.check_domain(email)?;
        let creds = sqlx::query_as::<_, CredentialRow>(
            "SELECT user_id, email, password_hash, display_name, avatar_url \
             FROM credentials WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)?;

        if !verify_password(password, &creds.password_hash)? {
            return Err(PortError::Unauthorized);
        }
        let session = self.open_session(creds.user_id).await?;
        let principal = creds.principal();
        self.rules.announce(PrincipalChange::SignedIn {
            principal: principal.clone(),
        });
        Ok((session, principal))
    }

    async fn sign_out(&self, token: &str) -> PortResult<()> {
        let removed: Option<(Uuid,)> =
            sqlx::query_as("DELETE FROM auth_sessions WHERE id = $1 RETURNING user_id")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        if let Some((user_id,)) = removed {
            self.rules.announce(PrincipalChange::SignedOut { user_id });
        }
        Ok(())
    }

    async fn current_principal(&self, token: &str) -> PortResult<Option<Principal>> {
        let creds = sqlx::query_as::<_, CredentialRow>(
            "SELECT c.user_id, c.email, c.password_hash, c.display_name, c.avatar_url \
             FROM auth_sessions s JOIN credentials c ON c.user_id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(creds.map(|c| c.principal()))
    }

    async fn subscribe_principal_changes(&self) -> PortResult<PrincipalStream> {
        Ok(self.rules.stream())
    }
}

//=========================================================================================
// In-memory Identity
//=========================================================================================

struct StoredCredential {
    principal: Principal,
    password_hash: String,
}

#[derive(Default)]
struct IdentityTables {
    /// Keyed by lower-cased email.
    credentials: HashMap<String, StoredCredential>,
    sessions: HashMap<String, AuthSession>,
}

/// Credentials and sessions kept in process memory.
pub struct MemoryIdentity {
    tables: RwLock<IdentityTables>,
    rules: IdentityRules,
}

impl MemoryIdentity {
    pub fn new(allowed_domains: Vec<String>, session_ttl: Duration) -> Self {
        Self {
            tables: RwLock::new(IdentityTables::default()),
            rules: IdentityRules::new(allowed_domains, session_ttl),
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> PortResult<(AuthSession, Principal)> {
        self.rules.check_domain(email)?;
        let key = email.to_lowercase();
        let password_hash = hash_password(password)?;

        let mut tables = self.tables.write().await;
        if tables.credentials.contains_key(&key) {
            return Err(PortError::Conflict(format!(
                "An account for {} already exists",
                email
            )));
        }
        let principal = Principal {
            id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            avatar_url: None,
        };
        tables.credentials.insert(
            key,
            StoredCredential {
                principal: principal.clone(),
                password_hash,
            },
        );
        let session = self.rules.new_session(principal.id, Utc::now());
        tables.sessions.insert(session.id.clone(), session.clone());
        drop(tables);

        self.rules.announce(PrincipalChange::SignedIn {
            principal: principal.clone(),
        });
        Ok((session, principal))
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<(AuthSession, Principal)> {
        self.rules.check_domain(email)?;
        let mut tables = self.tables.write().await;
        let stored = tables
            .credentials
            .get(&email.to_lowercase())
            .ok_or(PortError::Unauthorized)?;
        if !verify_password(password, &stored.password_hash)? {
            return Err(PortError::Unauthorized);
        }
        let principal = stored.principal.clone();
        let session = self.rules.new_session(principal.id, Utc::now());
        tables.sessions.insert(session.id.clone(), session.clone());
        drop(tables);

        self.rules.announce(PrincipalChange::SignedIn {
            principal: principal.clone(),
        });
        Ok((session, principal))
    }

    async fn sign_out(&self, token: &str) -> PortResult<()> {
        let removed = self.tables.write().await.sessions.remove(token);
        if let Some(session) = removed {
            self.rules.announce(PrincipalChange::SignedOut {
                user_id: session.user_id,
            });
        }
        Ok(())
    }

    async fn current_principal(&self, token: &str) -> PortResult<Option<Principal>> {
        let tables = self.tables.read().await;
        let Some(session) = tables.sessions.get(token) else {
            return Ok(None);
        };
        if session.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(tables
            .credentials
            .values()
            .find(|c| c.principal.id == session.user_id)
            .map(|c| c.principal.clone()))
    }

    async fn subscribe_principal_changes(&self) -> PortResult<PrincipalStream> {
        Ok(self.rules.stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(domains: &[&str]) -> MemoryIdentity {
        MemoryIdentity::new(
            domains.iter().map(|d| d.to_string()).collect(),
            Duration::days(30),
        )
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_resolves_the_same_principal() {
        let idp = identity(&[]);
        let (first, principal) = idp
            .sign_up("ada@example.org", "correct horse", "Ada")
            .await
            .unwrap();
        let (second, again) = idp
            .sign_in("ADA@example.org", "correct horse")
            .await
            .unwrap();

        assert_eq!(principal, again);
        assert_ne!(first.id, second.id);
        assert_eq!(
            idp.current_principal(&second.id).await.unwrap(),
            Some(principal)
        );
    }

    #[tokio::test]
    async fn wrong_password_and_duplicate_email_are_refused() {
        let idp = identity(&[]);
        idp.sign_up("ada@example.org", "correct horse", "Ada")
            .await
            .unwrap();

        assert!(matches!(
            idp.sign_in("ada@example.org", "battery staple").await,
            Err(PortError::Unauthorized)
        ));
        assert!(matches!(
            idp.sign_up("ada@example.org", "another one", "Ada").await,
            Err(PortError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn allowlist_refuses_other_domains() {
        let idp = identity(&["campus.edu"]);
        assert!(matches!(
            idp.sign_up("ada@example.org", "correct horse", "Ada").await,
            Err(PortError::Unauthorized)
        ));
        assert!(idp
            .sign_up("ada@Campus.edu", "correct horse", "Ada")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn sign_out_ends_the_session_and_is_announced() {
        let idp = identity(&[]);
        let mut changes = idp.subscribe_principal_changes().await.unwrap();
        let (session, principal) = idp
            .sign_up("ada@example.org", "correct horse", "Ada")
            .await
            .unwrap();
        idp.sign_out(&session.id).await.unwrap();

        assert_eq!(
            changes.next().await,
            Some(PrincipalChange::SignedIn {
                principal: principal.clone()
            })
        );
        assert_eq!(
            changes.next().await,
            Some(PrincipalChange::SignedOut {
                user_id: principal.id
            })
        );
        assert_eq!(idp.current_principal(&session.id).await.unwrap(), None);
    }
}
