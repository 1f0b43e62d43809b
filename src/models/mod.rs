//! # Data Models
//!
//! Durable records owned by the pipeline stages plus the transient payloads
//! carried on the queues.

pub mod batch_job;
pub mod file_record;
pub mod payloads;
pub mod slide;
pub mod translation;

pub use batch_job::{
    BatchErrorEntry, BatchFailure, BatchJob, BatchProgressDelta, BatchStatus, BatchTransition,
    FileFailure, NewBatchJob, TranslationFailure,
};
pub use file_record::{FileRecord, FileStatus};
pub use payloads::{
    BatchJobPayload, FileDescriptor, FileJobPayload, TextItem, TranslationGroupPayload,
    TranslationOptions,
};
pub use slide::{
    FileStructure, ParsedDocument, ParsedSlide, ParsedText, SlideRecord, TextPosition, TextRecord,
};
pub use translation::{HistoryStatus, TranslationHistoryRecord, TranslationRecord};
