//! scholarflow document extraction.
//!
//! [`TextExtractor`] accepts UTF-8 text documents (plain text, Markdown,
//! LaTeX sources) and rejects binary formats it cannot read. Besides the text
//! itself it reports a section outline so the data-analysis stage can describe
//! a document's structure without a language model.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Implements [`pipeline::DocumentExtractor`]; failures are
//! reported as [`pipeline::ExtractionError`] and absorbed by the calling stage.

mod text;

pub use text::{TextExtractor, DEFAULT_MAX_CHARS};
