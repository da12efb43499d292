//! scholarflow literature-search adapters.
//!
//! Implements [`pipeline::LiteratureProvider`] over the arXiv Atom export API.
//! Caching and query normalisation live in the `nodes` crate's
//! `LiteratureGateway`; this crate only speaks HTTP and parses feeds.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP status codes are classified into
//! [`pipeline::ProviderError`] variants the same way the `llm` crate does it,
//! so a rate-limited search is retried on the same schedule as a rate-limited
//! completion.

pub mod arxiv;
mod atom;

pub use arxiv::{ArxivProvider, ARXIV_BASE_URL};
