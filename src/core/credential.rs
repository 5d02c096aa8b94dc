//! Scoped SSH credentials.
//!
//! A [`RemoteCredential`] is acquired from a [`CredentialSource`] right before
//! one remote command and lives inside a [`CredentialScope`] for exactly that
//! command. Inline key text is written to a private temp file for `ssh -i`;
//! dropping the scope deletes the file and overwrites the in-memory copy.
//! Nothing is cached between commands.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use keyring::Entry;
use tempfile::NamedTempFile;

use crate::config::SecretRef;
use crate::error::{Error, Result};

const KEYCHAIN_SERVICE: &str = "dockhand";

pub enum KeyMaterial {
    /// Identity file already on disk; used in place and never deleted.
    File(PathBuf),
    /// Private key text held in memory until the scope ends.
    Inline(String),
}

pub struct RemoteCredential {
    pub principal: String,
    pub key: KeyMaterial,
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match &self.key {
            KeyMaterial::File(path) => format!("File({})", path.display()),
            KeyMaterial::Inline(_) => "Inline(<redacted>)".to_string(),
        };
        f.debug_struct("RemoteCredential")
            .field("principal", &self.principal)
            .field("key", &key)
            .finish()
    }
}

pub trait CredentialSource: Send + Sync {
    /// Produce a fresh credential. Called once per remote command.
    fn acquire(&self) -> Result<RemoteCredential>;

    /// Principal and key origin for logs and dry runs; never the key itself.
    fn describe(&self) -> String;
}

/// Credential described by `remote.principal` and `remote.key` in config.
#[derive(Debug, Clone)]
pub struct ConfiguredCredential {
    pub principal: String,
    pub key: SecretRef,
}

impl ConfiguredCredential {
    pub fn new(principal: impl Into<String>, key: SecretRef) -> Self {
        Self {
            principal: principal.into(),
            key,
        }
    }
}

impl CredentialSource for ConfiguredCredential {
    fn acquire(&self) -> Result<RemoteCredential> {
        let key = match &self.key {
            SecretRef::File { path } => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(expanded));
                }
                KeyMaterial::File(PathBuf::from(expanded))
            }
            other => KeyMaterial::Inline(resolve_secret(other)?),
        };

        Ok(RemoteCredential {
            principal: self.principal.clone(),
            key,
        })
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.principal, self.key.describe())
    }
}

/// Resolve a secret to its text. File secrets are read, not referenced.
pub fn resolve_secret(secret: &SecretRef) -> Result<String> {
    let value = match secret {
        SecretRef::File { path } => {
            let expanded = shellexpand::tilde(path).to_string();
            std::fs::read_to_string(&expanded).map_err(|e| {
                Error::credential_unavailable(secret.describe(), e.to_string())
            })?
        }
        SecretRef::Env { var } => std::env::var(var).map_err(|_| {
            Error::credential_unavailable(secret.describe(), "environment variable not set")
                .with_hint(format!("Export {} before starting the run", var))
        })?,
        SecretRef::Keychain { account } => {
            let entry = Entry::new(KEYCHAIN_SERVICE, account)
                .map_err(|e| Error::credential_unavailable(secret.describe(), e.to_string()))?;
            match entry.get_password() {
                Ok(value) => value,
                Err(keyring::Error::NoEntry) => {
                    return Err(Error::credential_unavailable(
                        secret.describe(),
                        "no keychain entry",
                    ))
                }
                Err(e) => return Err(Error::credential_unavailable(secret.describe(), e.to_string())),
            }
        }
    };

    if value.trim().is_empty() {
        return Err(Error::credential_unavailable(secret.describe(), "secret is empty"));
    }
    Ok(value)
}

/// A credential checked out for one command.
pub struct CredentialScope {
    principal: String,
    key_path: PathBuf,
    key_file: Option<NamedTempFile>,
    inline: Option<String>,
}

impl CredentialScope {
    pub fn open(credential: RemoteCredential) -> Result<Self> {
        let RemoteCredential { principal, key } = credential;

        match key {
            KeyMaterial::File(path) => Ok(Self {
                principal,
                key_path: path,
                key_file: None,
                inline: None,
            }),
            KeyMaterial::Inline(text) => {
                // Scope owns the text from here so Drop erases it on every path.
                let mut scope = Self {
                    principal,
                    key_path: PathBuf::new(),
                    key_file: None,
                    inline: Some(text),
                };
                let mut file = tempfile::Builder::new()
                    .prefix(".dockhand-key-")
                    .tempfile()
                    .map_err(|e| Error::internal_io(e.to_string(), Some("create key file".to_string())))?;

                let text = scope.inline.as_deref().unwrap_or_default();
                let mut payload = text.as_bytes().to_vec();
                if !text.ends_with('\n') {
                    payload.push(b'\n');
                }
                let written = file.write_all(&payload).and_then(|_| file.flush());
                erase(payload);
                written.map_err(|e| {
                    Error::internal_io(e.to_string(), Some("write key file".to_string()))
                })?;

                scope.key_path = file.path().to_path_buf();
                scope.key_file = Some(file);
                Ok(scope)
            }
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// True when the key file is temporary and goes away with the scope.
    pub fn is_ephemeral(&self) -> bool {
        self.key_file.is_some()
    }
}

impl Drop for CredentialScope {
    fn drop(&mut self) {
        if let Some(file) = self.key_file.take() {
            let _ = file.close();
        }
        if let Some(text) = self.inline.take() {
            erase(text.into_bytes());
        }
    }
}

fn erase(mut bytes: Vec<u8>) {
    bytes.iter_mut().for_each(|b| *b = 0);
    std::hint::black_box(&bytes);
}

/// Acquire a credential, run `f` with it, release it on every exit path.
pub fn with_credential<T>(
    source: &dyn CredentialSource,
    f: impl FnOnce(&CredentialScope) -> Result<T>,
) -> Result<T> {
    let scope = CredentialScope::open(source.acquire()?)?;
    f(&scope)
}
