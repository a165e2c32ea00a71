//! Onboarding and user lookup.

use std::sync::Arc;
use tracing::info;

use crate::domain::{Principal, UserRecord};
use crate::error::{MarketError, MarketResult};
use crate::ports::{Clock, MarketStore, PortError};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 24;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Claims a globally unique username for the principal. A username is set once.
    pub async fn onboard(&self, principal: &Principal, username: &str) -> MarketResult<UserRecord> {
        let username = username.trim();
        validate_username(username)?;

        match self.store.get_user(principal.id).await {
            Ok(existing) => {
                return Err(MarketError::Conflict(format!(
                    "You are already onboarded as '{}'",
                    existing.username
                )))
            }
            Err(PortError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let user = UserRecord::onboard(principal, username.to_string(), self.clock.now());
        self.store.create_user(&user).await?;
        info!(user_id = %user.id, username = %user.username, "User onboarded");
        Ok(user)
    }

    /// The caller's own record, or `None` before onboarding.
    pub async fn me(&self, principal: &Principal) -> MarketResult<Option<UserRecord>> {
        match self.store.get_user(principal.id).await {
            Ok(user) => Ok(Some(user)),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn public_profile(&self, username: &str) -> MarketResult<UserRecord> {
        Ok(self.store.find_user_by_username(username.trim()).await?)
    }
}

fn validate_username(username: &str) -> MarketResult<()> {
    if username.is_empty() {
        return Err(MarketError::Validation("Username cannot be empty.".to_string()));
    }
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(MarketError::Validation(format!(
            "Username must be between {} and {} characters.",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MarketError::Validation(
            "Username may only contain letters, digits and underscores.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("ada_l").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(25)).is_err());
    }
}
