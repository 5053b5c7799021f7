//! Services layer for the identity engine.
//!
//! The authorization flow itself lives in [`flows`]; everything else here
//! is either a collaborator it drives through a trait (registry,
//! credential store, flow store, session store, mailer) or a leaf
//! service it composes (tokens, identity resolution, verification,
//! events).

pub mod credentials;
pub mod database;
pub mod error;
pub mod events;
pub mod flow_store;
pub mod flows;
pub mod identity;
pub mod mailer;
pub mod metrics;
pub mod registry;
pub mod session_store;
pub mod tokens;
pub mod verification;

pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use database::Database;
pub use error::FlowError;
pub use events::{
    AuthEvent, ChannelSink, EventDispatcher, EventKind, EventSink, RecordingSink, WebhookSink,
};
pub use flow_store::{FlowStore, MemoryFlowStore, RedisFlowStore};
pub use flows::{AuthorizeParams, FlowService, TokenBundle};
pub use identity::IdentityService;
pub use mailer::{MockMailer, SmtpMailer, VerificationMailer};
pub use registry::{ProjectRegistry, StaticProjectRegistry};
pub use session_store::{MemorySessionStore, SessionStore};
pub use tokens::TokenService;
pub use verification::VerificationService;
