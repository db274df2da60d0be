//! Reasoning-model collaborators.

mod openai;

pub use openai::OpenAiChatModel;
