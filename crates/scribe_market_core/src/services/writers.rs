//! Writer profile store: becoming a writer, editing terms, discovery.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::domain::{Principal, UserRecord, WriterTerms, MAX_PAGES};
use crate::error::{MarketError, MarketResult};
use crate::ports::MarketStore;

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BecomeWriter {
    pub bio: String,
    pub price_per_page: i64,
    pub min_pages: u32,
    pub max_pages: u32,
}

/// A partial edit of a writer's terms; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub price_per_page: Option<i64>,
    pub min_pages: Option<u32>,
    pub max_pages: Option<u32>,
    pub is_available: Option<bool>,
}

#[derive(Clone)]
pub struct WriterService {
    store: Arc<dyn MarketStore>,
}

impl WriterService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Creates the writer profile, or merges new terms into an existing one.
    pub async fn become_writer(
        &self,
        actor: &Principal,
        input: BecomeWriter,
    ) -> MarketResult<UserRecord> {
        let user = self.onboarded(actor).await?;
        let is_available = user
            .writer_profile
            .as_ref()
            .map(|p| p.is_available)
            .unwrap_or(false);
        let terms = WriterTerms {
            bio: input.bio.trim().to_string(),
            price_per_page: input.price_per_page,
            min_pages: input.min_pages,
            max_pages: input.max_pages,
            is_available,
        };
        validate_terms(&terms)?;

        let user = self.store.save_writer_terms(actor.id, &terms).await?;
        info!(user_id = %actor.id, "User became a writer");
        Ok(user)
    }

    pub async fn update_profile(
        &self,
        actor: &Principal,
        update: ProfileUpdate,
    ) -> MarketResult<UserRecord> {
        let user = self.onboarded(actor).await?;
        let current = match (user.is_writer, user.writer_profile) {
            (true, Some(profile)) => profile,
            _ => {
                return Err(MarketError::NotFound(
                    "You do not have a writer profile yet".to_string(),
                ))
            }
        };
        let terms = WriterTerms {
            bio: update
                .bio
                .map(|b| b.trim().to_string())
                .unwrap_or(current.bio),
            price_per_page: update.price_per_page.unwrap_or(current.price_per_page),
            min_pages: update.min_pages.unwrap_or(current.min_pages),
            max_pages: update.max_pages.unwrap_or(current.max_pages),
            is_available: update.is_available.unwrap_or(current.is_available),
        };
        validate_terms(&terms)?;

        let user = self.store.save_writer_terms(actor.id, &terms).await?;
        info!(user_id = %actor.id, available = terms.is_available, "Writer profile updated");
        Ok(user)
    }

    pub async fn list_available_writers(&self) -> MarketResult<Vec<UserRecord>> {
        Ok(self.store.list_available_writers().await?)
    }

    async fn onboarded(&self, actor: &Principal) -> MarketResult<UserRecord> {
        self.store.get_user(actor.id).await.map_err(|e| match e {
            crate::ports::PortError::NotFound(_) => {
                MarketError::NotFound("Complete onboarding before becoming a writer".to_string())
            }
            other => other.into(),
        })
    }
}

fn validate_terms(terms: &WriterTerms) -> MarketResult<()> {
    if terms.bio.is_empty() {
        return Err(MarketError::Validation("Bio cannot be empty.".to_string()));
    }
    if terms.price_per_page <= 0 {
        return Err(MarketError::Validation(
            "Price per page must be greater than zero.".to_string(),
        ));
    }
    if terms.min_pages < 1 {
        return Err(MarketError::Validation(
            "Minimum pages must be at least 1.".to_string(),
        ));
    }
    if terms.max_pages > MAX_PAGES {
        return Err(MarketError::Validation(format!(
            "Maximum pages cannot exceed {}.",
            MAX_PAGES
        )));
    }
    if terms.max_pages < terms.min_pages {
        return Err(MarketError::Validation(
            "Maximum pages cannot be lower than minimum pages.".to_string(),
        ));
    }
    Ok(())
}
