//! Conversion job handed from the dispatcher to workers.

use std::path::Path;

use crate::catalog::{FileKind, Fingerprint, JobState, PendingConversion, SourceFile};

/// One requested conversion of one source file version.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub source: SourceFile,
    pub state: JobState,
    /// Failed attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl ConversionJob {
    pub fn new(source: SourceFile) -> Self {
        Self {
            source,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
        }
    }

    /// Continue a conversion the catalog still has pending.
    pub fn resume(pending: PendingConversion) -> Self {
        Self {
            attempts: pending.attempts,
            ..Self::new(pending.source)
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.source.fingerprint
    }

    pub fn source_path(&self) -> &Path {
        &self.source.path
    }

    pub fn kind(&self) -> FileKind {
        self.source.kind
    }
}
