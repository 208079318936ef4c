// Public modules
pub mod chat;
pub mod client;
pub mod contact;
pub mod error;
pub mod observability;
pub mod server;
pub mod sse;
pub mod types;

// Re-exports
pub use client::Dify;
pub use contact::{ContactConfig, ContactService, Mailer, Resend};
pub use error::{Error, Result};
pub use observability::{emit_biometrics, register_biometrics};
pub use sse::{FrameStream, StreamPolicy, process_sse};
pub use types::*;
