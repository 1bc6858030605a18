//! Sink credential resolution.
//!
//! A [`CredentialProvider`] yields the user/password pair the write
//! dispatcher folds into its Basic-Auth header. Three implementations:
//! inline values, a JSON credential file, and ambient environment variables
//! (plaintext, gated behind an explicit unlock).
//!
//! [`resolve_chain`] applies the fixed precedence order:
//! inline > explicit file path > default on-disk path > explicit
//! user/password pair > unlocked plaintext environment > fatal.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

/// Default environment variable carrying the sink user.
pub const AMBIENT_USER_VAR: &str = "VMFLUX_SINK_USER";
/// Default environment variable carrying the sink password.
pub const AMBIENT_PASSWORD_VAR: &str = "VMFLUX_SINK_PASSWORD";

/// Resolved sink credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCredentials {
    pub user: String,
    pub password: String,
}

/// Error type for credential resolution.
#[derive(Debug)]
pub enum CredentialError {
    /// The credential file cannot be read.
    FileUnavailable { path: PathBuf, reason: String },
    /// The credential file does not parse.
    Malformed { path: PathBuf, reason: String },
    /// Plaintext environment credentials exist but were not unlocked.
    PlaintextLocked,
    /// No provider in the chain produced credentials.
    NoCredentials,
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::FileUnavailable { path, reason } => {
                write!(f, "credential file {} unavailable: {}", path.display(), reason)
            }
            CredentialError::Malformed { path, reason } => {
                write!(f, "credential file {} malformed: {}", path.display(), reason)
            }
            CredentialError::PlaintextLocked => write!(
                f,
                "plaintext environment credentials present but not unlocked"
            ),
            CredentialError::NoCredentials => write!(f, "no sink credentials available"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// A source of sink credentials.
pub trait CredentialProvider {
    fn resolve(&self) -> Result<SinkCredentials, CredentialError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Credentials supplied directly by the caller.
pub struct InlineProvider {
    credentials: SinkCredentials,
}

impl InlineProvider {
    pub fn new(credentials: SinkCredentials) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for InlineProvider {
    fn resolve(&self) -> Result<SinkCredentials, CredentialError> {
        Ok(self.credentials.clone())
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

#[derive(Deserialize)]
struct CredentialFile {
    user: String,
    password: String,
}

/// Credentials loaded from a JSON file: `{"user": ..., "password": ...}`.
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    /// Creates a provider after checking the file is actually readable.
    /// The capability check happens at construction, not at resolve time.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        if let Err(e) = fs::metadata(&path) {
            return Err(CredentialError::FileUnavailable {
                path,
                reason: e.to_string(),
            });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for FileProvider {
    fn resolve(&self) -> Result<SinkCredentials, CredentialError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| CredentialError::FileUnavailable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let parsed: CredentialFile =
            serde_json::from_str(&raw).map_err(|e| CredentialError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(SinkCredentials {
            user: parsed.user,
            password: parsed.password,
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Credentials taken from the process environment.
///
/// Environment variables are plaintext passthrough; resolution fails unless
/// the caller explicitly allowed it.
pub struct AmbientProvider {
    user_var: String,
    password_var: String,
    allow_plaintext: bool,
}

impl AmbientProvider {
    pub fn new(allow_plaintext: bool) -> Self {
        Self::with_vars(AMBIENT_USER_VAR, AMBIENT_PASSWORD_VAR, allow_plaintext)
    }

    /// Variant with explicit variable names, for tests and unusual setups.
    pub fn with_vars(
        user_var: impl Into<String>,
        password_var: impl Into<String>,
        allow_plaintext: bool,
    ) -> Self {
        Self {
            user_var: user_var.into(),
            password_var: password_var.into(),
            allow_plaintext,
        }
    }
}

impl CredentialProvider for AmbientProvider {
    fn resolve(&self) -> Result<SinkCredentials, CredentialError> {
        let user = env::var(&self.user_var).map_err(|_| CredentialError::NoCredentials)?;
        let password = env::var(&self.password_var).map_err(|_| CredentialError::NoCredentials)?;
        if !self.allow_plaintext {
            return Err(CredentialError::PlaintextLocked);
        }
        Ok(SinkCredentials { user, password })
    }

    fn name(&self) -> &'static str {
        "ambient"
    }
}

/// Inputs to [`resolve_chain`], roughly one field per CLI option.
#[derive(Default)]
pub struct CredentialOptions {
    pub inline: Option<SinkCredentials>,
    /// Explicit credential-file path; unreadable or malformed is fatal.
    pub file: Option<PathBuf>,
    /// Default on-disk location; consulted only when it exists.
    pub default_file: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Unlocks the plaintext environment fallback.
    pub allow_plaintext: bool,
}

/// Resolves credentials through the precedence chain.
pub fn resolve_chain(options: &CredentialOptions) -> Result<SinkCredentials, CredentialError> {
    if let Some(inline) = &options.inline {
        debug!(provider = "inline", "sink credentials resolved");
        return InlineProvider::new(inline.clone()).resolve();
    }

    if let Some(path) = &options.file {
        // An explicitly named file must work; no silent fallthrough.
        let provider = FileProvider::new(path)?;
        debug!(provider = "file", path = %path.display(), "sink credentials resolved");
        return provider.resolve();
    }

    if let Some(path) = &options.default_file
        && path.exists()
    {
        let provider = FileProvider::new(path)?;
        debug!(provider = "file", path = %path.display(), "sink credentials resolved from default path");
        return provider.resolve();
    }

    if let (Some(user), Some(password)) = (&options.user, &options.password) {
        debug!(provider = "pair", "sink credentials resolved");
        return Ok(SinkCredentials {
            user: user.clone(),
            password: password.clone(),
        });
    }

    match AmbientProvider::new(options.allow_plaintext).resolve() {
        Ok(credentials) => {
            debug!(provider = "ambient", "sink credentials resolved");
            Ok(credentials)
        }
        Err(CredentialError::NoCredentials) => Err(CredentialError::NoCredentials),
        Err(e) => Err(e),
    }
}
