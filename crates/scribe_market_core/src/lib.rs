pub mod domain;
pub mod error;
pub mod feed;
pub mod memory;
pub mod ports;
pub mod services;

pub use domain::{
    Assignment, AssignmentListing, AssignmentStatus, AuthSession, ChatMessage, ChatPhase,
    ChatSession, ChatSummary, Countdown, Notification, NotificationInbox, Participant, Principal,
    PrincipalChange, Request, RequestKind, RequestStatus, Review, UserRecord, WriterProfile,
    WriterTerms,
};
pub use error::{MarketError, MarketResult};
pub use feed::ChangeHub;
pub use memory::InMemoryStore;
pub use ports::{
    Change, ChangeStream, Clock, IdentityProvider, MarketStore, PortError, PortResult,
    PrincipalStream, SystemClock, Topic,
};
pub use services::{MarketPolicy, Marketplace};
