//! scholarflow language-model adapters.
//!
//! Implements the [`pipeline::LlmProvider`] trait over HTTP for any
//! OpenAI-compatible chat completions endpoint (Groq by default) and for
//! Google Gemini. Provider ordering, fallback and caching are not handled
//! here; the `nodes` crate's `LlmGateway` composes these providers.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response parsing
//! and status-code classification live here. The [`pipeline`] crate sees only
//! [`pipeline::LlmProvider`] and [`pipeline::ProviderError`].
//!
//! Every HTTP failure maps onto a [`pipeline::ProviderError`] variant so the
//! engine's retry policy applies uniformly: 429 becomes `RateLimited`
//! (honouring `Retry-After`), 5xx and transport failures `Unavailable`,
//! 401/403 `Configuration`, and anything undecodable `InvalidResponse`.

mod http;

pub mod gemini;
pub mod openai;

pub use gemini::{GeminiProvider, GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
pub use http::DEFAULT_REQUEST_TIMEOUT;
pub use openai::{OpenAiCompatibleProvider, GROQ_BASE_URL, GROQ_DEFAULT_MODEL};
