//! services/api/src/tasks/sweeper.rs
//!
//! Background upkeep of the marketplace. On every tick it:
//! - Purges pending requests past their expiry, notifying the requester
//! - Moves chats whose assignment deadline has passed into the feedback phase

use scribe_market_core::{MarketResult, Marketplace};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What one sweep changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub requests_expired: usize,
    pub chats_ended: usize,
}

/// Run a single sweep cycle.
pub async fn sweep_once(market: &Marketplace) -> MarketResult<SweepStats> {
    let expired = market.requests.purge_expired().await?;
    let ended = market.chats.enforce_deadlines().await?;
    let stats = SweepStats {
        requests_expired: expired.len(),
        chats_ended: ended.len(),
    };

    if stats == SweepStats::default() {
        debug!("Sweep found nothing to do");
    } else {
        info!(
            requests_expired = stats.requests_expired,
            chats_ended = stats.chats_ended,
            "Sweep cycle completed"
        );
    }
    Ok(stats)
}

/// Spawns the sweeper loop; it stops when `shutdown` is cancelled.
pub fn spawn_sweeper(
    market: Marketplace,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Sweeper started");
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = sweep_once(&market).await {
                        error!(error = %e, "Sweep cycle failed");
                    }
                }
            }
        }
        info!("Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use scribe_market_core::services::{BecomeWriter, NewAssignment, ProfileUpdate};
    use scribe_market_core::{Clock, InMemoryStore, MarketPolicy, Principal};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct TestClock(Mutex<DateTime<Utc>>);

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn principal(name: &str) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            email: format!("{}@example.edu", name),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn sweep_expires_stale_requests_and_ends_overdue_chats() {
        let clock = Arc::new(TestClock(Mutex::new(Utc::now())));
        let market = Marketplace::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            MarketPolicy::default(),
        );

        let owner = principal("owner");
        let writer = principal("writer");
        market.users.onboard(&owner, "owner").await.unwrap();
        market.users.onboard(&writer, "writer").await.unwrap();
        market
            .writers
            .become_writer(
                &writer,
                BecomeWriter {
                    bio: "Essays".to_string(),
                    price_per_page: 100,
                    min_pages: 1,
                    max_pages: 20,
                },
            )
            .await
            .unwrap();
        market
            .writers
            .update_profile(
                &writer,
                ProfileUpdate {
                    is_available: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let deadline = clock.now() + chrono::Duration::hours(24);
        let requested = market
            .assignments
            .post_assignment(
                &owner,
                NewAssignment {
                    title: "Lab report".to_string(),
                    description: String::new(),
                    pages: 3,
                    rate_per_page: 100,
                    deadline,
                },
            )
            .await
            .unwrap();
        let claimed = market
            .assignments
            .post_assignment(
                &owner,
                NewAssignment {
                    title: "Essay".to_string(),
                    description: String::new(),
                    pages: 2,
                    rate_per_page: 100,
                    deadline,
                },
            )
            .await
            .unwrap();
        market
            .requests
            .request_assignment(&writer, requested.id)
            .await
            .unwrap();
        let chat = market
            .assignments
            .claim_assignment(&writer, claimed.id)
            .await
            .unwrap();

        assert_eq!(sweep_once(&market).await.unwrap(), SweepStats::default());

        {
            let mut now = clock.0.lock().unwrap();
            *now = *now + chrono::Duration::hours(49);
        }
        let stats = sweep_once(&market).await.unwrap();
        assert_eq!(
            stats,
            SweepStats {
                requests_expired: 1,
                chats_ended: 1
            }
        );
        let chat = market.chats.session(&owner, &chat.id).await.unwrap();
        assert!(chat.owner_ended && chat.writer_ended);
        assert_eq!(sweep_once(&market).await.unwrap(), SweepStats::default());
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let market = Marketplace::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(TestClock(Mutex::new(Utc::now()))),
            MarketPolicy::default(),
        );
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(market, Duration::from_millis(10), shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
