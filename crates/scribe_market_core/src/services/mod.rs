//! crates/scribe_market_core/src/services/mod.rs
//!
//! The workflow services. Each one owns a slice of the marketplace lifecycle
//! and talks to the outside world only through the ports.

pub mod assignments;
pub mod chat;
pub mod feedback;
pub mod inbox;
pub mod requests;
pub mod users;
pub mod writers;

use chrono::Duration;
use std::sync::Arc;

use crate::ports::{Clock, MarketStore};

pub use assignments::{AssignmentService, NewAssignment};
pub use chat::ChatService;
pub use feedback::{FeedbackInput, FeedbackService};
pub use inbox::InboxService;
pub use requests::{Proposal, RequestService};
pub use users::UserService;
pub use writers::{BecomeWriter, ProfileUpdate, WriterService};

/// Quotas and timeouts of the request/assignment workflow.
#[derive(Debug, Clone, Copy)]
pub struct MarketPolicy {
    /// Unfinished assignments an owner may hold at once.
    pub max_active_assignments: usize,
    /// Pending task proposals a user may have outstanding at once.
    pub max_pending_requests: usize,
    /// How long a request stays acceptable after it is created.
    pub request_ttl: Duration,
}

impl Default for MarketPolicy {
    fn default() -> Self {
        Self {
            max_active_assignments: 5,
            max_pending_requests: 5,
            request_ttl: Duration::hours(48),
        }
    }
}

/// Every service wired to the same store, clock and policy.
#[derive(Clone)]
pub struct Marketplace {
    pub users: UserService,
    pub writers: WriterService,
    pub assignments: AssignmentService,
    pub requests: RequestService,
    pub inbox: InboxService,
    pub chats: ChatService,
    pub feedback: FeedbackService,
}

impl Marketplace {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn Clock>, policy: MarketPolicy) -> Self {
        let feedback = FeedbackService::new(store.clone(), clock.clone());
        let requests = RequestService::new(store.clone(), clock.clone(), policy);
        Self {
            users: UserService::new(store.clone(), clock.clone()),
            writers: WriterService::new(store.clone()),
            assignments: AssignmentService::new(
                store.clone(),
                clock.clone(),
                policy,
                feedback.clone(),
            ),
            inbox: InboxService::new(store.clone(), requests.clone()),
            chats: ChatService::new(store, clock),
            requests,
            feedback,
        }
    }
}

/// Wording of the notifications the workflow fans out.
pub(crate) mod notices {
    pub fn writer_requested(writer: &str, title: &str) -> String {
        format!(
            "Writer {} has requested to work on your task \"{}\".",
            writer, title
        )
    }

    pub fn task_proposed(user: &str, title: &str, pages: u32, total: i64) -> String {
        format!(
            "{} has requested you for the task \"{}\" ({} pages, {} total).",
            user, title, pages, total
        )
    }

    pub fn assigned_to_owner(title: &str, writer: &str) -> String {
        format!("Your task \"{}\" has been assigned to {}.", title, writer)
    }

    pub fn assigned_to_writer(title: &str) -> String {
        format!("You have been assigned the task \"{}\".", title)
    }

    pub fn request_rejected(title: &str) -> String {
        format!("Your request for \"{}\" was declined.", title)
    }

    pub fn request_expired(title: &str) -> String {
        format!("Your request for \"{}\" expired before it was answered.", title)
    }

    pub fn deadline_passed(title: &str) -> String {
        format!(
            "The deadline for \"{}\" has passed; the chat is now closed for feedback.",
            title
        )
    }

    pub fn review_received(title: &str, rating: u8) -> String {
        format!("You received a {}-star review for \"{}\".", rating, title)
    }
}
