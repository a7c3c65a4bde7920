//! Chat state: per-mode image slots and the conversations bound to them.

pub mod conversation;
pub mod workspace;

pub use conversation::{Conversation, Message};
pub use workspace::{ConversationMode, ImageSlot, ModeState, Workspace};
