//! Script sources
//!
//! A [`Source`] names where a script's text comes from — a file on disk
//! or an in-memory string — together with the token replacements to
//! apply while reading it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A registered token substitution
#[derive(Debug, Clone)]
pub struct TokenReplacement {
    /// Substring to replace
    pub token: String,
    /// Replacement text; re-scanned after substitution
    pub replacement: String,
}

enum SourceKind {
    File(PathBuf),
    Memory(String),
}

/// An unparsed script plus its token replacements
pub struct Source {
    kind: SourceKind,
    replacements: Vec<TokenReplacement>,
}

impl Source {
    /// Script stored in a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            kind: SourceKind::File(path.as_ref().to_path_buf()),
            replacements: Vec::new(),
        }
    }

    /// Script held in memory
    pub fn from_string<S: Into<String>>(text: S) -> Self {
        Self {
            kind: SourceKind::Memory(text.into()),
            replacements: Vec::new(),
        }
    }

    /// Register a token replacement applied to every logical line
    pub fn add_token_replacement(&mut self, token: &str, replacement: &str) -> &mut Self {
        self.replacements.push(TokenReplacement {
            token: token.to_owned(),
            replacement: replacement.to_owned(),
        });
        self
    }

    /// The registered replacements
    pub fn replacements(&self) -> &[TokenReplacement] {
        &self.replacements
    }

    /// Name used in diagnostics
    pub fn filename(&self) -> String {
        match &self.kind {
            SourceKind::File(path) => path.display().to_string(),
            SourceKind::Memory(_) => "(string)".to_owned(),
        }
    }

    /// Read the full script text
    pub fn read_contents(&self) -> io::Result<String> {
        match &self.kind {
            SourceKind::File(path) => fs::read_to_string(path),
            SourceKind::Memory(text) => Ok(text.clone()),
        }
    }
}
