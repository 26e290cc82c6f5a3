//! Diagnostics returned by every pipeline step.
//!
//! A [`Diagnostics`] value is an ordered list of [`Diagnostic`] entries. A step
//! failed if and only if at least one entry has [`Severity::Error`]; warnings
//! never abort a pipeline but are surfaced to the user.

use std::{fmt, path::PathBuf};

use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};

/// Severity of a single diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Stable short codes attached to select diagnostics for support and tooling.
///
/// The list is intentionally not exhaustive: most diagnostics carry no code.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
pub enum DiagId {
    #[strum(serialize = "ECONFIG")]
    ConfigurationError,
    #[strum(serialize = "WCONFIG")]
    ConfigurationWarning,
    #[strum(serialize = "EINTERNAL")]
    InternalError,
    #[strum(serialize = "EARTIFACT")]
    ArtifactError,
    #[strum(serialize = "EIO")]
    IoError,
    #[strum(serialize = "EABORTED")]
    AbortedError,
    #[strum(serialize = "EPERM1")]
    CannotChangePathPermissions,
    #[strum(serialize = "EPERM2")]
    PathPermissionDenied,
    #[strum(serialize = "EPERM3")]
    CannotChangeResourcePermissions,
    #[strum(serialize = "EPERM4")]
    ResourcePermissionDenied,
    #[strum(serialize = "EPERM5")]
    RunAsDenied,
    #[strum(serialize = "EBUILD")]
    BuildError,
    #[strum(serialize = "EWSCLIENT")]
    WorkspaceClientError,
    #[strum(serialize = "EGIT")]
    GitError,
    #[strum(serialize = "ETARGETMODE")]
    TargetModeError,
    #[strum(serialize = "ESYNC")]
    SyncError,
    #[strum(serialize = "ELOCK")]
    LockError,
    #[strum(serialize = "ESTATE")]
    StateError,
    #[strum(serialize = "ECONFLICT")]
    DeploymentConflict,
    #[strum(serialize = "EEXECSETUP")]
    ExecutorSetupError,
    #[strum(serialize = "EEXEC")]
    ExecutorError,
}

/// A position in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A single severity-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DiagId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Attach a source location.
    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} [{}]: {}", self.severity, id, self.summary)?,
            None => write!(f, "{}: {}", self.severity, self.summary)?,
        }
        if let Some(location) = &self.location {
            write!(f, "\n  at {}", location)?;
        }
        Ok(())
    }
}

/// Ordered sequence of diagnostics produced by a pipeline step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut, From)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// No diagnostics: the step succeeded silently.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A single error diagnostic.
    pub fn error(id: impl Into<Option<DiagId>>, summary: impl Into<String>) -> Self {
        Self(vec![Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            id: id.into(),
            location: None,
        }])
    }

    /// A single warning diagnostic.
    pub fn warning(id: impl Into<Option<DiagId>>, summary: impl Into<String>) -> Self {
        Self(vec![Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            id: id.into(),
            location: None,
        }])
    }

    /// Wrap an error as a single error diagnostic, keeping the full context chain.
    pub fn from_err(id: impl Into<Option<DiagId>>, err: impl Into<anyhow::Error>) -> Self {
        Self::error(id, format!("{:#}", err.into()))
    }

    /// Attach a location to every entry that does not have one yet.
    pub fn with_location(mut self, location: Option<Location>) -> Self {
        for d in self.0.iter_mut().filter(|d| d.location.is_none()) {
            d.location = location.clone();
        }
        self
    }

    /// Append all entries of `other`.
    pub fn extend(mut self, other: Diagnostics) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Warning)
    }

    /// Whether any entry carries the given code.
    pub fn contains_id(&self, id: DiagId) -> bool {
        self.0.iter().any(|d| d.id == Some(id))
    }

    /// Convert into a `Result`, failing with the first error if there is one.
    pub fn into_result(self) -> anyhow::Result<()> {
        match self.errors().next() {
            Some(first) => Err(anyhow::anyhow!("{}", first)),
            None => Ok(()),
        }
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(d: Diagnostic) -> Self {
        Self(vec![d])
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
