pub mod chat_request;
pub mod contact_form;
pub mod conversation;
pub mod email;
pub mod stream_frame;

pub use chat_request::{ChatRequest, ResponseMode};
pub use contact_form::ContactForm;
pub use conversation::{ConversationHandle, ConversationTurn, Role};
pub use email::{EmailParams, EmailReceipt};
pub use stream_frame::StreamFrame;
