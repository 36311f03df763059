//! 记忆层：跨查询的对话历史

pub mod conversation;

pub use conversation::{ChatExchange, ConversationMemory, Message, Role};
