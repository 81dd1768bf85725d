//! Abstractions for streaming replies from large language model servers.
//!
//! The `llm` crate defines a [`LLMClient`] trait along with concrete
//! implementations such as [`OllamaClient`] and [`OpenAiClient`]. A
//! [`TokenStream`] drives one reply on its own task and can be cancelled
//! through a shared [`CancelSignal`].

pub mod backend;
pub mod cancel;
pub mod client;
pub mod openai;
pub mod token_stream;
pub mod traits;

pub use backend::{client_from_config, BackendConfig, BackendKind};
pub use cancel::CancelSignal;
pub use client::OllamaClient;
pub use openai::OpenAiClient;
pub use token_stream::{StreamOutcome, StreamTimings, TokenEvent, TokenStream};
pub use traits::{ChatStream, LLMClient, LLMError};
