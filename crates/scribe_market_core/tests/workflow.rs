//! End-to-end workflow tests over the in-memory store with a controllable clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;
use uuid::Uuid;

use scribe_market_core::ports::MarketStore;
use scribe_market_core::services::{
    BecomeWriter, FeedbackInput, NewAssignment, ProfileUpdate, Proposal,
};
use scribe_market_core::{
    Change, ChatPhase, Clock, InMemoryStore, MarketError, MarketPolicy, Marketplace, Principal,
    RequestStatus,
};

struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Utc::now())))
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Harness {
    market: Marketplace,
    store: Arc<InMemoryStore>,
    clock: Arc<FixedClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(MarketPolicy::default())
    }

    fn with_policy(policy: MarketPolicy) -> Self {
        let clock = FixedClock::new();
        let store = Arc::new(InMemoryStore::new());
        let market = Marketplace::new(store.clone(), clock.clone(), policy);
        Self {
            market,
            store,
            clock,
        }
    }

    async fn user(&self, username: &str) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4(),
            display_name: username.to_string(),
            email: format!("{}@example.edu", username),
            avatar_url: None,
        };
        self.market.users.onboard(&principal, username).await.unwrap();
        principal
    }

    async fn writer(&self, username: &str) -> Principal {
        let principal = self.user(username).await;
        self.market
            .writers
            .become_writer(
                &principal,
                BecomeWriter {
                    bio: "Essays and lab reports".to_string(),
                    price_per_page: 100,
                    min_pages: 1,
                    max_pages: 20,
                },
            )
            .await
            .unwrap();
        self.market
            .writers
            .update_profile(
                &principal,
                ProfileUpdate {
                    is_available: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        principal
    }

    fn new_assignment(&self, title: &str) -> NewAssignment {
        NewAssignment {
            title: title.to_string(),
            description: "Five pages on the French revolution".to_string(),
            pages: 5,
            rate_per_page: 100,
            deadline: self.clock.now() + Duration::days(3),
        }
    }
}

fn proposal(title: &str, h: &Harness) -> Proposal {
    Proposal {
        title: title.to_string(),
        description: String::new(),
        pages: 4,
        deadline: h.clock.now() + Duration::days(2),
    }
}

fn feedback(rating: u8, task_completed: bool) -> FeedbackInput {
    FeedbackInput {
        rating: Some(rating),
        comment: "Delivered on time".to_string(),
        task_completed,
    }
}

#[tokio::test]
async fn posting_stores_total_and_lists_as_open() {
    let h = Harness::new();
    let owner = h.user("owner").await;

    let posted = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("History essay"))
        .await
        .unwrap();
    assert_eq!(posted.total_price(), 500);
    assert!(!posted.is_assigned);

    let open = h.market.assignments.available_work().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].total_price, 500);
    assert_eq!(open[0].pending_requests, 0);
}

#[tokio::test]
async fn past_deadline_is_rejected_without_writing() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let mut input = h.new_assignment("Late essay");
    input.deadline = h.clock.now() - Duration::hours(1);

    let err = h
        .market
        .assignments
        .post_assignment(&owner, input)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    assert!(h.market.assignments.available_work().await.unwrap().is_empty());
}

#[tokio::test]
async fn sixth_active_assignment_hits_the_quota() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    for i in 0..5 {
        h.market
            .assignments
            .post_assignment(&owner, h.new_assignment(&format!("Essay {}", i)))
            .await
            .unwrap();
    }
    let err = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("One too many"))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    assert_eq!(h.market.assignments.my_assignments(&owner).await.unwrap().len(), 5);
}

#[tokio::test]
async fn only_one_writer_can_claim() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let first = h.writer("first").await;
    let second = h.writer("second").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();

    let chat = h.market.assignments.claim_assignment(&first, a.id).await.unwrap();
    assert_eq!(chat.writer_id, first.id);

    let err = h
        .market
        .assignments
        .claim_assignment(&second, a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
    assert!(h.market.assignments.available_work().await.unwrap().is_empty());
}

#[tokio::test]
async fn non_writers_cannot_claim() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let plain = h.user("plain").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();

    let err = h
        .market
        .assignments
        .claim_assignment(&plain, a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Authorization(_)));
}

#[tokio::test]
async fn writer_request_notifies_owner_once_and_duplicates_conflict() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();

    let request = h.market.requests.request_assignment(&writer, a.id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);

    let err = h
        .market
        .requests
        .request_assignment(&writer, a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let inbox = h.market.inbox.inbox(&owner).await.unwrap();
    assert_eq!(inbox.notifications.len(), 1);
    assert_eq!(inbox.notifications[0].request_id, Some(request.id));
    assert!(inbox.notifications[0].message.contains("scribe"));

    let open = h.market.assignments.available_work().await.unwrap();
    assert_eq!(open[0].pending_requests, 1);
}

#[tokio::test]
async fn accepting_twice_yields_a_single_chat() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let request = h.market.requests.request_assignment(&writer, a.id).await.unwrap();

    let first = h.market.requests.accept_request(&owner, request.id).await.unwrap();
    let second = h.market.requests.accept_request(&owner, request.id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.market.chats.list_chats(&owner).await.unwrap().len(), 1);

    // The request notification was consumed; both sides got an assignment notice.
    let owner_inbox = h.market.inbox.inbox(&owner).await.unwrap();
    assert_eq!(owner_inbox.notifications.len(), 1);
    assert_eq!(owner_inbox.notifications[0].chat_id.as_deref(), Some(first.id.as_str()));
    let writer_inbox = h.market.inbox.inbox(&writer).await.unwrap();
    assert_eq!(writer_inbox.notifications.len(), 1);
}

#[tokio::test]
async fn expired_request_cannot_be_accepted() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let request = h.market.requests.request_assignment(&writer, a.id).await.unwrap();

    h.clock.advance(Duration::hours(48));
    let err = h
        .market
        .requests
        .accept_request(&owner, request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Expired(id) if id == request.id));

    let purged = h.market.requests.purge_expired().await.unwrap();
    assert_eq!(purged.len(), 1);
    assert!(h.market.inbox.inbox(&owner).await.unwrap().notifications.is_empty());
    let writer_inbox = h.market.inbox.inbox(&writer).await.unwrap();
    assert!(writer_inbox.notifications[0].message.contains("expired"));
}

#[tokio::test]
async fn rejecting_leaves_the_assignment_open() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    h.market.requests.request_assignment(&writer, a.id).await.unwrap();

    let notification = h.market.inbox.inbox(&owner).await.unwrap().notifications[0].clone();
    h.market.inbox.reject(&owner, notification.id).await.unwrap();

    assert!(h.market.inbox.inbox(&owner).await.unwrap().notifications.is_empty());
    let open = h.market.assignments.available_work().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].pending_requests, 0);
    let writer_inbox = h.market.inbox.inbox(&writer).await.unwrap();
    assert_eq!(writer_inbox.notifications.len(), 1);
}

#[tokio::test]
async fn proposal_to_writer_creates_assignment_and_opens_chat_on_accept() {
    let h = Harness::new();
    let user = h.user("student").await;
    let writer = h.writer("scribe").await;

    let (assignment, request) = h
        .market
        .requests
        .propose_task(
            &user,
            writer.id,
            Proposal {
                title: "Lab report".to_string(),
                description: String::new(),
                pages: 4,
                deadline: h.clock.now() + Duration::days(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(assignment.rate_per_page, 100);
    assert_eq!(request.total_cost, 400);

    let notification = h.market.inbox.inbox(&writer).await.unwrap().notifications[0].clone();
    let chat = h.market.inbox.accept(&writer, notification.id).await.unwrap();
    assert_eq!(chat.owner_id, user.id);
    assert_eq!(chat.writer_id, writer.id);
}

#[tokio::test]
async fn proposal_outside_page_range_is_refused() {
    let h = Harness::new();
    let user = h.user("student").await;
    let writer = h.writer("scribe").await;

    let err = h
        .market
        .requests
        .propose_task(
            &user,
            writer.id,
            Proposal {
                title: "Thesis".to_string(),
                description: String::new(),
                pages: 80,
                deadline: h.clock.now() + Duration::days(20),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
}

#[tokio::test]
async fn end_chat_then_feedback_closes_the_session() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();

    // Feedback is refused while the chat is still active.
    let err = h
        .market
        .feedback
        .submit_feedback(&owner, &chat.id, feedback(5, true))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    h.market.chats.toggle_end_chat(&owner, &chat.id).await.unwrap();
    let session = h.market.chats.toggle_end_chat(&writer, &chat.id).await.unwrap();
    assert_eq!(session.phase(), ChatPhase::AwaitingFeedback);

    let profile = h
        .market
        .feedback
        .submit_feedback(&owner, &chat.id, feedback(4, true))
        .await
        .unwrap();
    assert_eq!(profile.tasks_completed, 1);
    assert!((profile.rating - 4.0).abs() < f64::EPSILON);

    assert!(matches!(
        h.market.chats.session(&owner, &chat.id).await,
        Err(MarketError::NotFound(_))
    ));
    assert!(h.market.assignments.my_assignments(&owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn ratings_follow_the_running_average() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;

    let mut last = None;
    for rating in [5u8, 3, 4] {
        let a = h
            .market
            .assignments
            .post_assignment(&owner, h.new_assignment("Essay"))
            .await
            .unwrap();
        let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();
        h.market.chats.toggle_end_chat(&owner, &chat.id).await.unwrap();
        h.market.chats.toggle_end_chat(&writer, &chat.id).await.unwrap();
        last = Some(
            h.market
                .assignments
                .finish_assignment(&owner, a.id, feedback(rating, true))
                .await
                .unwrap(),
        );
    }
    let profile = last.unwrap();
    assert_eq!(profile.tasks_completed, 3);
    assert_eq!(profile.tasks_chosen, 3);
    assert_eq!(profile.reviews.len(), 3);
    assert!((profile.rating - 4.0).abs() < 1e-9);
    assert!((0.0..=5.0).contains(&profile.rating));
}

#[tokio::test]
async fn out_of_range_rating_is_rejected() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();
    h.market.chats.toggle_end_chat(&owner, &chat.id).await.unwrap();
    h.market.chats.toggle_end_chat(&writer, &chat.id).await.unwrap();

    let attempts = [
        (Some(6), "Great"),
        (Some(0), "Awful"),
        (None, "No stars"),
        (Some(3), "   "),
    ];
    for (rating, comment) in attempts {
        let bad = FeedbackInput {
            rating,
            comment: comment.to_string(),
            task_completed: true,
        };
        let err = h
            .market
            .feedback
            .submit_feedback(&owner, &chat.id, bad)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }
    // Nothing was closed by the refused attempts.
    assert!(h.market.chats.session(&owner, &chat.id).await.is_ok());
}

#[tokio::test]
async fn unclaimed_work_cannot_be_finished() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let err = h
        .market
        .assignments
        .finish_assignment(&owner, a.id, feedback(5, true))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
}

#[tokio::test]
async fn messages_typing_and_unread_counts() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let outsider = h.user("outsider").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();

    assert!(h.market.chats.send_message(Some(&owner), &chat.id, "   ").await.unwrap().is_none());
    assert!(h.market.chats.send_message(None, &chat.id, "hello").await.unwrap().is_none());
    assert!(matches!(
        h.market.chats.send_message(Some(&outsider), &chat.id, "hi").await,
        Err(MarketError::Authorization(_))
    ));

    let seen_by_writer = h.market.chats.set_typing(&writer, &chat.id, true).await.unwrap();
    assert_eq!(seen_by_writer.typing, None);
    assert_eq!(
        h.market.chats.session(&owner, &chat.id).await.unwrap().typing,
        Some(writer.id)
    );

    h.market.chats.send_message(Some(&writer), &chat.id, "First draft attached").await.unwrap();
    let summaries = h.market.chats.list_chats(&owner).await.unwrap();
    assert_eq!(summaries[0].unread, 1);
    assert_eq!(summaries[0].partner_name, "scribe");
    assert_eq!(summaries[0].assignment_title, "Essay");

    h.market.chats.mark_read(&owner, &chat.id).await.unwrap();
    assert_eq!(h.market.chats.list_chats(&owner).await.unwrap()[0].unread, 0);
}

#[tokio::test]
async fn passed_deadline_forces_feedback_phase() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();

    let countdown = h.market.chats.deadline_countdown(&owner, &chat.id).await.unwrap();
    assert!(!countdown.passed);
    assert_eq!(countdown.remaining_seconds, Duration::days(3).num_seconds());

    h.clock.advance(Duration::days(4));
    let ended = h.market.chats.enforce_deadlines().await.unwrap();
    assert_eq!(ended, vec![chat.id.clone()]);

    let countdown = h.market.chats.deadline_countdown(&writer, &chat.id).await.unwrap();
    assert!(countdown.passed);
    assert_eq!(countdown.phase, ChatPhase::AwaitingFeedback);

    // The owner can now leave feedback without either side ending the chat.
    h.market
        .feedback
        .submit_feedback(&owner, &chat.id, feedback(2, false))
        .await
        .unwrap();
}

#[tokio::test]
async fn inbox_subscription_sees_new_requests() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();

    let mut stream = h.market.inbox.subscribe(&owner).await.unwrap();
    h.market.requests.request_assignment(&writer, a.id).await.unwrap();

    match stream.next().await {
        Some(Change::Inbox(inbox)) => assert_eq!(inbox.notifications.len(), 1),
        other => panic!("unexpected change: {:?}", other),
    }
}

#[tokio::test]
async fn open_consumes_notification_and_returns_chat() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let chat = h.market.assignments.claim_assignment(&writer, a.id).await.unwrap();

    let notification = h.market.inbox.inbox(&writer).await.unwrap().notifications[0].clone();
    let opened = h.market.inbox.open(&writer, notification.id).await.unwrap();
    assert_eq!(opened, Some(chat.id));
    assert!(h.market.inbox.inbox(&writer).await.unwrap().notifications.is_empty());
}

#[tokio::test]
async fn oversized_pages_and_prices_are_validation_errors() {
    let h = Harness::new();
    let owner = h.user("owner").await;

    let mut pricey = h.new_assignment("Pricey");
    pricey.pages = 2;
    pricey.rate_per_page = i64::MAX;
    let mut huge = h.new_assignment("Huge");
    huge.pages = u32::MAX;
    for input in [pricey, huge] {
        let err = h
            .market
            .assignments
            .post_assignment(&owner, input)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }
    assert!(h.market.assignments.my_assignments(&owner).await.unwrap().is_empty());

    let err = h
        .market
        .writers
        .become_writer(
            &owner,
            BecomeWriter {
                bio: "Anything".to_string(),
                price_per_page: 100,
                min_pages: 1,
                max_pages: u32::MAX,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
}

#[tokio::test]
async fn delete_is_owner_only_and_clears_pending_requests() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let writer = h.writer("scribe").await;
    let open = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let request = h.market.requests.request_assignment(&writer, open.id).await.unwrap();

    let err = h
        .market
        .assignments
        .delete_assignment(&writer, open.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Authorization(_)));

    h.market.assignments.delete_assignment(&owner, open.id).await.unwrap();
    assert!(h.market.assignments.available_work().await.unwrap().is_empty());
    assert!(h.market.inbox.inbox(&owner).await.unwrap().notifications.is_empty());
    assert!(h.store.get_request(request.id).await.is_err());

    let claimed = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Report"))
        .await
        .unwrap();
    h.market.assignments.claim_assignment(&writer, claimed.id).await.unwrap();
    let err = h
        .market
        .assignments
        .delete_assignment(&owner, claimed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
}

#[tokio::test]
async fn sixth_pending_proposal_is_refused() {
    let h = Harness::with_policy(MarketPolicy {
        max_active_assignments: 10,
        ..MarketPolicy::default()
    });
    let user = h.user("student").await;
    let writer = h.writer("scribe").await;

    for i in 0..5 {
        h.market
            .requests
            .propose_task(&user, writer.id, proposal(&format!("Report {}", i), &h))
            .await
            .unwrap();
    }
    let err = h
        .market
        .requests
        .propose_task(&user, writer.id, proposal("Report 6", &h))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    assert_eq!(h.market.inbox.inbox(&writer).await.unwrap().notifications.len(), 5);
    assert_eq!(h.market.assignments.my_assignments(&user).await.unwrap().len(), 5);
}

#[tokio::test]
async fn accepting_after_a_direct_claim_conflicts_and_keeps_the_request() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let asker = h.writer("asker").await;
    let claimer = h.writer("claimer").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let request = h.market.requests.request_assignment(&asker, a.id).await.unwrap();
    let chat = h.market.assignments.claim_assignment(&claimer, a.id).await.unwrap();

    let err = h
        .market
        .requests
        .accept_request(&owner, request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let stored = h.store.get_request(request.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    let inbox = h.market.inbox.inbox(&owner).await.unwrap();
    assert!(inbox
        .notifications
        .iter()
        .any(|n| n.request_id == Some(request.id)));
    assert_eq!(h.market.chats.list_chats(&owner).await.unwrap().len(), 1);
    assert_eq!(h.market.chats.session(&owner, &chat.id).await.unwrap().writer_id, claimer.id);
}

#[tokio::test]
async fn closing_a_session_drops_stale_request_notices() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let asker = h.writer("asker").await;
    let claimer = h.writer("claimer").await;
    let a = h
        .market
        .assignments
        .post_assignment(&owner, h.new_assignment("Essay"))
        .await
        .unwrap();
    let request = h.market.requests.request_assignment(&asker, a.id).await.unwrap();
    let chat = h.market.assignments.claim_assignment(&claimer, a.id).await.unwrap();
    h.market.chats.toggle_end_chat(&owner, &chat.id).await.unwrap();
    h.market.chats.toggle_end_chat(&claimer, &chat.id).await.unwrap();

    let mut stream = h.market.inbox.subscribe(&owner).await.unwrap();
    h.market
        .feedback
        .submit_feedback(&owner, &chat.id, feedback(5, true))
        .await
        .unwrap();

    let inbox = h.market.inbox.inbox(&owner).await.unwrap();
    assert!(inbox.notifications.iter().all(|n| n.request_id.is_none()));
    assert!(h.store.get_request(request.id).await.is_err());
    match stream.next().await {
        Some(Change::Inbox(pushed)) => {
            assert!(pushed.notifications.iter().all(|n| n.request_id.is_none()))
        }
        other => panic!("unexpected change: {:?}", other),
    }
}

#[tokio::test]
async fn proposals_stay_off_the_board_and_name_the_username() {
    let h = Harness::new();
    let student = Principal {
        id: Uuid::new_v4(),
        display_name: "Jordan Lee".to_string(),
        email: "jordan@example.edu".to_string(),
        avatar_url: None,
    };
    h.market.users.onboard(&student, "jlee").await.unwrap();
    let writer = h.writer("scribe").await;

    let (_, request) = h
        .market
        .requests
        .propose_task(&student, writer.id, proposal("Lab report", &h))
        .await
        .unwrap();
    assert!(h.market.assignments.available_work().await.unwrap().is_empty());

    let notice = h.market.inbox.inbox(&writer).await.unwrap().notifications[0].clone();
    assert!(notice.message.contains("jlee"));
    assert!(!notice.message.contains("Jordan Lee"));

    // Once the writer declines, the task is open to everyone.
    h.market.requests.reject_request(&writer, request.id).await.unwrap();
    assert_eq!(h.market.assignments.available_work().await.unwrap().len(), 1);
}
