//! Script Path Resolution
//!
//! Turns a caller-supplied script name into a path inside the scripts root.
//! Resolution never leaves the root: both the candidate and the root are
//! canonicalized before comparison, so `..` segments and symlinks that point
//! outside are rejected even when the joined path looks confined.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffixes probed, in priority order, when looking up a script.
#[cfg(windows)]
pub const SCRIPT_SUFFIXES: &[&str] = &[".bat", ".cmd", ".ps1"];

/// Suffixes probed, in priority order, when looking up a script.
#[cfg(not(windows))]
pub const SCRIPT_SUFFIXES: &[&str] = &[""];

/// Error types for script resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid script name")]
    InvalidIdentifier(String),

    #[error("Script {0} not found")]
    NotFound(String),

    #[error("Access denied")]
    AccessDenied(PathBuf),

    #[error("Failed to resolve script path: {0}")]
    Io(#[from] io::Error),
}

/// A script path that passed confinement checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPath {
    path: PathBuf,
    suffix: &'static str,
}

impl ScriptPath {
    /// Canonical location of the script
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The probed suffix that matched (empty on Unix)
    pub fn suffix(&self) -> &'static str {
        self.suffix
    }
}

/// Check the shape of a script identifier without touching the filesystem.
///
/// An identifier is rejected when it is empty or contains `/`, `\` or `..`.
pub fn validate_identifier(identifier: &str) -> Result<(), ResolveError> {
    if identifier.is_empty()
        || identifier.contains('/')
        || identifier.contains('\\')
        || identifier.contains("..")
    {
        return Err(ResolveError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}

/// Resolves script identifiers against a fixed root directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for the given scripts root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured (non-canonical) scripts root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an identifier into a confined script path
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` if the name fails [`validate_identifier`]
    /// - `NotFound` if no suffix candidate exists
    /// - `AccessDenied` if the canonical path escapes the scripts root
    pub fn resolve(&self, identifier: &str) -> Result<ScriptPath, ResolveError> {
        validate_identifier(identifier)?;

        let (candidate, suffix) = self
            .probe(identifier)
            .ok_or_else(|| ResolveError::NotFound(identifier.to_string()))?;

        let canonical_root = self.root.canonicalize()?;
        let canonical = candidate.canonicalize()?;

        if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
            warn!(
                path = %candidate.display(),
                resolved = %canonical.display(),
                "Attempted to access script outside scripts directory"
            );
            return Err(ResolveError::AccessDenied(candidate));
        }

        ensure_executable(&canonical);

        debug!(script = identifier, path = %canonical.display(), "Resolved script");
        Ok(ScriptPath {
            path: canonical,
            suffix,
        })
    }

    /// First suffix candidate that exists on disk
    fn probe(&self, identifier: &str) -> Option<(PathBuf, &'static str)> {
        SCRIPT_SUFFIXES.iter().find_map(|suffix| {
            let candidate = self.root.join(format!("{identifier}{suffix}"));
            candidate.exists().then_some((candidate, *suffix))
        })
    }
}

/// Set `rwxr-xr-x` on the script if any execute bit is missing.
#[cfg(unix)]
fn ensure_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let result = std::fs::metadata(path).and_then(|meta| {
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0o111 {
            return Ok(());
        }
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)
    });

    if let Err(e) = result {
        warn!(path = %path.display(), "Failed to mark script executable: {}", e);
    }
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) {}
