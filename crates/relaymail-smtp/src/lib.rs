//! SMTP implementation for RelayMail
//!
//! Provides a hand-driven SMTP session with STARTTLS and XOAUTH2 support,
//! and the multipart/mixed composer producing the DATA payload.

mod error;
mod mime;
mod reply;
mod session;
mod stream;

pub use error::{SmtpError, SmtpResult};
pub use mime::{Attachment, MimeComposer, DEFAULT_BOUNDARY};
pub use reply::{Capabilities, Reply};
pub use session::{SessionState, SmtpSession};
pub use stream::{BoxedStream, RustlsUpgrader, SessionStream, TlsUpgrader};
