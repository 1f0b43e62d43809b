//! Pipeline stages and their queue names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{job_names, queues};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    BatchTranslation,
    FileProcessing,
    Translation,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 3] = [
        PipelineStage::BatchTranslation,
        PipelineStage::FileProcessing,
        PipelineStage::Translation,
    ];

    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::BatchTranslation => queues::BATCH_TRANSLATION,
            Self::FileProcessing => queues::FILE_PROCESSING,
            Self::Translation => queues::TRANSLATION,
        }
    }

    /// Name stamped on every job of this stage
    pub fn job_name(&self) -> &'static str {
        match self {
            Self::BatchTranslation => job_names::PROCESS_BATCH,
            Self::FileProcessing => job_names::PROCESS_FILE,
            Self::Translation => job_names::TRANSLATE_TEXTS,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::BatchTranslation => 0,
            Self::FileProcessing => 1,
            Self::Translation => 2,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

impl FromStr for PipelineStage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.queue_name() == s)
            .ok_or_else(|| PipelineError::InvalidStage(s.to_string()))
    }
}
