pub mod audio;
pub mod llm;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod script;
pub mod store;
pub mod timeline;
pub mod tts;
pub mod validate;
