pub mod end_user;
pub mod flow;
pub mod otp_code;
pub mod project;
pub mod session;

pub use end_user::{EndUser, SanitizedEndUser};
pub use flow::{AuthCode, AuthRequest};
pub use otp_code::OtpCode;
pub use project::{Project, ProviderKind};
pub use session::Session;
