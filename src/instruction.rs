use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Text used in place of the instruction file when the fallback policy applies.
pub const FALLBACK_INSTRUCTION: &str = "默认操作说明";

/// What to do when the instruction file cannot be read at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionPolicy {
    /// Abort startup with the read error.
    Strict,
    /// Log a warning and continue with [`FALLBACK_INSTRUCTION`].
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionSource {
    File(PathBuf),
    Fallback,
}

/// The site operation manual injected into every prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionDocument {
    text: String,
    source: InstructionSource,
}

impl InstructionDocument {
    pub fn new(text: impl Into<String>, source: InstructionSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_INSTRUCTION, InstructionSource::Fallback)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &InstructionSource {
        &self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source == InstructionSource::Fallback
    }
}

#[derive(Debug)]
pub struct InstructionError {
    path: PathBuf,
    source: io::Error,
}

impl InstructionError {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Display for InstructionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to load instruction file {}: {}",
            self.path.display(),
            self.source
        )
    }
}

impl Error for InstructionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Reads the instruction file once. Contents are returned verbatim.
pub fn load_instruction(
    path: &Path,
    policy: InstructionPolicy,
) -> Result<InstructionDocument, InstructionError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            info!(path = %path.display(), chars = text.chars().count(), "loaded instruction file");
            Ok(InstructionDocument::new(
                text,
                InstructionSource::File(path.to_path_buf()),
            ))
        }
        Err(source) => match policy {
            InstructionPolicy::Strict => Err(InstructionError {
                path: path.to_path_buf(),
                source,
            }),
            InstructionPolicy::Fallback => {
                warn!(
                    path = %path.display(),
                    error = %source,
                    "instruction file unavailable, using fallback text"
                );
                Ok(InstructionDocument::fallback())
            }
        },
    }
}
