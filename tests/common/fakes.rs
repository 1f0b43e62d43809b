//! Scripted stand-ins for the document parser, the translation backend and
//! the record store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use translation_pipeline::collaborators::{DocumentParser, TranslationBackend};
use translation_pipeline::models::{
    BatchErrorEntry, BatchJob, BatchProgressDelta, BatchTransition, FileRecord, FileStatus,
    FileStructure, ParsedDocument, ParsedSlide, ParsedText, TextPosition,
    TranslationHistoryRecord, TranslationRecord,
};
use translation_pipeline::store::RecordStore;
use translation_pipeline::{InMemoryRecordStore, PipelineError, PipelineResult};
use uuid::Uuid;

/// Texts containing this marker are rejected by [`FakeTranslator`]
pub const REJECTED_TEXT_MARKER: &str = "FAIL";

/// Build a parsed document, one inner slice per slide
pub fn document(slides: &[&[&str]]) -> ParsedDocument {
    ParsedDocument {
        slides: slides
            .iter()
            .enumerate()
            .map(|(index, texts)| ParsedSlide {
                index: index as i32,
                image_path: format!("slide-{index}.png"),
                texts: texts
                    .iter()
                    .map(|text| ParsedText {
                        text: (*text).to_string(),
                        position: TextPosition::default(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Parser keyed by source file name.
///
/// Unknown files parse into a single slide holding "Hello".
#[derive(Debug, Default)]
pub struct FakeParser {
    documents: Mutex<HashMap<String, ParsedDocument>>,
    failures_left: Mutex<HashMap<String, u32>>,
    output_dirs: Mutex<Vec<PathBuf>>,
    calls: AtomicUsize,
}

impl FakeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(&self, file_name: &str, document: ParsedDocument) {
        self.documents.lock().insert(file_name.to_string(), document);
    }

    /// Fail the next `times` parses of `file_name`
    pub fn fail_times(&self, file_name: &str, times: u32) {
        self.failures_left.lock().insert(file_name.to_string(), times);
    }

    pub fn always_fail(&self, file_name: &str) {
        self.fail_times(file_name, u32::MAX);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn output_dirs(&self) -> Vec<PathBuf> {
        self.output_dirs.lock().clone()
    }
}

#[async_trait]
impl DocumentParser for FakeParser {
    async fn parse(&self, source: &Path, output_dir: &Path) -> PipelineResult<ParsedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output_dirs.lock().push(output_dir.to_path_buf());

        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        {
            let mut failures = self.failures_left.lock();
            if let Some(left) = failures.get_mut(&file_name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PipelineError::parse(&file_name, "corrupt archive"));
                }
            }
        }

        Ok(self
            .documents
            .lock()
            .get(&file_name)
            .cloned()
            .unwrap_or_else(|| document(&[&["Hello"]])))
    }
}

/// Backend with a tiny dictionary. Other texts come back tagged with the
/// target language.
#[derive(Debug, Default)]
pub struct FakeTranslator {
    calls: AtomicUsize,
    stalls_left: AtomicU32,
    stall: Mutex<Duration>,
    outages_left: AtomicU32,
}

impl FakeTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hang for `duration` on each of the next `times` calls
    pub fn stall_next(&self, times: u32, duration: Duration) {
        *self.stall.lock() = duration;
        self.stalls_left.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` calls as if the backend were unreachable
    pub fn outage_next(&self, times: u32) {
        self.outages_left.store(times, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn dictionary(text: &str, target_lang: &str) -> Option<&'static str> {
        match (text, target_lang) {
            ("Hello", "ja") => Some("こんにちは"),
            ("Hello", "fr") => Some("Bonjour"),
            _ => None,
        }
    }
}

#[async_trait]
impl TranslationBackend for FakeTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
        _model: &str,
    ) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let stalled = self
            .stalls_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if stalled {
            let stall = *self.stall.lock();
            tokio::time::sleep(stall).await;
        }

        let outage = self
            .outages_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if outage {
            return Err(PipelineError::Internal("backend unreachable".to_string()));
        }

        if text.contains(REJECTED_TEXT_MARKER) {
            return Err(PipelineError::Translation(format!(
                "backend rejected text: {text}"
            )));
        }
        Ok(Self::dictionary(text, target_lang)
            .map(str::to_string)
            .unwrap_or_else(|| format!("[{target_lang}] {text}")))
    }
}

/// In-memory store whose batch lookups can be made to fail
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<InMemoryRecordStore>,
    lookup_failures_left: AtomicU32,
    permanent: AtomicBool,
    lookups: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryRecordStore>) -> Self {
        Self {
            inner,
            lookup_failures_left: AtomicU32::new(0),
            permanent: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` batch lookups with a retryable database error
    pub fn fail_lookups(&self, times: u32) {
        self.permanent.store(false, Ordering::SeqCst);
        self.lookup_failures_left.store(times, Ordering::SeqCst);
    }

    /// Fail the next batch lookup with an error that is never retried
    pub fn corrupt_next_lookup(&self) {
        self.permanent.store(true, Ordering::SeqCst);
        self.lookup_failures_left.store(1, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create_batch_job(&self, batch: &BatchJob) -> PipelineResult<()> {
        self.inner.create_batch_job(batch).await
    }

    async fn find_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<Option<BatchJob>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .lookup_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            if self.permanent.load(Ordering::SeqCst) {
                return Err(PipelineError::Serialization(
                    "stored batch options are not valid JSON".to_string(),
                ));
            }
            return Err(PipelineError::Database("connection reset by peer".to_string()));
        }
        self.inner.find_batch_job(batch_job_id).await
    }

    async fn mark_batch_started(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        self.inner.mark_batch_started(batch_job_id).await
    }

    async fn cancel_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        self.inner.cancel_batch_job(batch_job_id).await
    }

    async fn apply_batch_progress(
        &self,
        batch_job_id: Uuid,
        delta: &BatchProgressDelta,
    ) -> PipelineResult<BatchTransition> {
        self.inner.apply_batch_progress(batch_job_id, delta).await
    }

    async fn mark_batch_failed(
        &self,
        batch_job_id: Uuid,
        entry: &BatchErrorEntry,
    ) -> PipelineResult<BatchTransition> {
        self.inner.mark_batch_failed(batch_job_id, entry).await
    }

    async fn find_file_for_source(
        &self,
        batch_job_id: Uuid,
        storage_path: &str,
    ) -> PipelineResult<Option<FileRecord>> {
        self.inner.find_file_for_source(batch_job_id, storage_path).await
    }

    async fn find_file_record(&self, file_id: Uuid) -> PipelineResult<Option<FileRecord>> {
        self.inner.find_file_record(file_id).await
    }

    async fn create_file_record(&self, record: &FileRecord) -> PipelineResult<FileRecord> {
        self.inner.create_file_record(record).await
    }

    async fn set_file_status(&self, file_id: Uuid, status: FileStatus) -> PipelineResult<()> {
        self.inner.set_file_status(file_id, status).await
    }

    async fn claim_file(
        &self,
        file_id: Uuid,
        claim_token: Uuid,
        stale_after: Duration,
    ) -> PipelineResult<bool> {
        self.inner.claim_file(file_id, claim_token, stale_after).await
    }

    async fn insert_file_structure(
        &self,
        file_id: Uuid,
        structure: &FileStructure,
    ) -> PipelineResult<()> {
        self.inner.insert_file_structure(file_id, structure).await
    }

    async fn load_file_structure(&self, file_id: Uuid) -> PipelineResult<FileStructure> {
        self.inner.load_file_structure(file_id).await
    }

    async fn upsert_translation(&self, record: &TranslationRecord) -> PipelineResult<()> {
        self.inner.upsert_translation(record).await
    }

    async fn find_translation(
        &self,
        text_id: Uuid,
        target_lang: &str,
    ) -> PipelineResult<Option<TranslationRecord>> {
        self.inner.find_translation(text_id, target_lang).await
    }

    async fn insert_translation_history(
        &self,
        record: &TranslationHistoryRecord,
    ) -> PipelineResult<()> {
        self.inner.insert_translation_history(record).await
    }

    async fn list_translation_history(
        &self,
        file_id: Uuid,
    ) -> PipelineResult<Vec<TranslationHistoryRecord>> {
        self.inner.list_translation_history(file_id).await
    }
}
