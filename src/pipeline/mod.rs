pub mod agent;
pub mod llm;
pub mod stt;
pub mod tts;
