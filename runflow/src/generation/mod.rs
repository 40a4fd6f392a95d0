//! Generation capability: trait, JSON extraction and the HTTP client.

mod json;
#[cfg(feature = "openai")]
mod openai;
mod provider;

pub use json::{extract_json_block, parse_json};
#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;
pub use provider::{GenerationProvider, GenerationRequest, GenerationResponse, Message, Usage};
