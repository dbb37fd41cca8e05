//! 记忆层：对话消息模型与检查点存储后端

pub mod checkpoint_store;
pub mod conversation;

pub use checkpoint_store::{CheckpointStore, InMemoryCheckpointStore, JsonlCheckpointStore};
pub use conversation::{ContentBlock, Message, Role};
