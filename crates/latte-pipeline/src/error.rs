use std::path::PathBuf;

use thiserror::Error;

/// The native shading-language compiler rejected a synthesized shader variant.
///
/// Carries the full assembled source so the failure can be reported alongside the diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to compile `{entry_point}`: {diagnostic}")]
pub struct CompileError {
    pub entry_point: String,
    pub diagnostic: String,
    pub source_text: String,
}

impl CompileError {
    pub fn new(
        entry_point: impl Into<String>,
        diagnostic: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            entry_point: entry_point.into(),
            diagnostic: diagnostic.into(),
            source_text: source_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("pipeline stages failed to link: {0}")]
    Link(String),
    #[error("native pipeline creation failed: {0}")]
    Native(String),
    #[error("pipeline binary not present in archive")]
    ArchiveMiss,
    #[error("{0} are not supported by this device")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("binary archive not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("binary archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("binary archive is corrupt: {0}")]
    Corrupt(String),
    #[error("binary archives are not supported by this device")]
    Unsupported,
}
