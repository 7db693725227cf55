use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Opaque session token produced by the brokerage client. Only the client
/// knows its format; everything else stores and forwards the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenBlob(Vec<u8>);

impl TokenBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TokenBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenBlob(<{} bytes>)", self.0.len())
    }
}

/// Where an authenticated session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Cache,
    Login,
}

/// An authenticated session. Handed out as `Arc<Session>`; only the
/// session manager creates or replaces one.
#[derive(Debug)]
pub struct Session {
    token: TokenBlob,
    origin: SessionOrigin,
    created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(token: TokenBlob, origin: SessionOrigin) -> Self {
        Self {
            token,
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn token(&self) -> &TokenBlob {
        &self.token
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }
}

/// The on-disk token cache: a single file holding the raw blob.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached blob, if any. An empty file counts as no cache.
    pub fn load(&self) -> io::Result<Option<TokenBlob>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded cached session");
                Ok(Some(TokenBlob::new(bytes)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist the blob atomically: write a temp file created exclusively
    /// next to the target, sync it, then rename over the old cache.
    pub fn store(&self, token: &TokenBlob) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        // A leftover temp file from a crashed write would block create_new
        match fs::remove_file(&tmp_path) {
            Ok(()) => debug!(path = %tmp_path.display(), "Removed stale temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let result = (|| {
            let mut file = options.open(&tmp_path)?;
            file.write_all(token.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        } else {
            debug!(path = %self.path.display(), "Session cached");
        }
        result
    }

    /// Delete the cached blob. Missing files are not an error.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Session cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
