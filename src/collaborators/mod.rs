//! # External Collaborators
//!
//! Interfaces the pipeline consumes but does not implement: the document
//! parser and the translation backend. Stage handlers depend only on the
//! traits; the adapters here wire them to a parser executable and an HTTP
//! translation service.

mod parser;
mod translator;

pub use parser::{CommandDocumentParser, DocumentParser};
pub use translator::{HttpTranslationBackend, TranslationBackend, TranslationRequest};
