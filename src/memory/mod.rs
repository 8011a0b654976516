//! 记忆层：对话消息日志

pub mod conversation;

pub use conversation::{Message, MessageId, MessageKind, MessageStore, Sender};
