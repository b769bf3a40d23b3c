//! In-memory store of RSA signing keys loaded from a key directory.
//!
//! Layout expected by [`KeyStore::load`]:
//!
//! ```text
//! keys/
//!   54bb2165-71e1-41a6-af3e-7da4a0e1e2c1-private.pem   ← loaded, kid = 54bb2165-…
//!   54bb2165-71e1-41a6-af3e-7da4a0e1e2c1-public.pem    ← ignored
//!   active.txt                                         ← names the active kid
//! ```
//!
//! The table is filled once at startup and only read afterwards, so a loaded
//! store is shared behind an `Arc` without any locking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::pkcs8::DecodePrivateKey;
use tracing::debug;

/// Name of the marker file holding the active kid.
pub const ACTIVE_KID_FILE: &str = "active.txt";

/// Key files larger than this are truncated before parsing.
const MAX_KEY_FILE_SIZE: u64 = 1024 * 1024;

const PRIVATE_SUFFIX: &str = "-private";
const PUBLIC_SUFFIX: &str = "-public";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key not found for kid {0:?}")]
    NotFound(String),
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{0}: no PEM block found")]
    InvalidPem(PathBuf),
    #[error("parsing private key {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("opening active kid file: {0}")]
    MissingActiveKid(io::Error),
    #[error("active kid {0:?} has no private key in the store")]
    UnknownActiveKid(String),
}

impl KeyStoreError {
    /// `true` for a lookup miss, `false` for a corrupt or unreadable store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ── Key sources ───────────────────────────────────────────────────────────────

/// A file-like tree keys are loaded from.
pub trait KeySource {
    /// Every file in the source, recursively, relative to its root.
    fn files(&self) -> io::Result<Vec<PathBuf>>;

    /// Contents of the file at `path`, relative to the root.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// A directory on disk.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl KeySource for DirSource {
    fn files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(rel.to_path_buf());
            }
        }
        Ok(files)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let file = std::fs::File::open(self.root.join(path))?;
        let mut buf = Vec::new();
        file.take(MAX_KEY_FILE_SIZE).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// An in-memory tree, handy for tests and embedded key material.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl KeySource for MemorySource {
    fn files(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

// ── KeyStore ──────────────────────────────────────────────────────────────────

/// Both halves of one RSA keypair in the form the token layer consumes.
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Resolves a kid to key material. Implemented by [`KeyStore`]; tests may
/// supply their own.
pub trait KeyLookup: Send + Sync {
    fn private_key(&self, kid: &str) -> Result<&EncodingKey, KeyStoreError>;
    fn public_key(&self, kid: &str) -> Result<&DecodingKey, KeyStoreError>;
}

#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<String, SigningKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `<kid>-private.<ext>` file of `source` and returns the
    /// active kid named by [`ACTIVE_KID_FILE`]. On error the store is left
    /// as it was.
    pub fn load(&mut self, source: &impl KeySource) -> Result<String, KeyStoreError> {
        let files = source.files().map_err(|source| KeyStoreError::Io {
            path: PathBuf::from("."),
            source,
        })?;

        let mut loaded = HashMap::new();
        for path in files {
            let Some(kid) = private_key_kid(&path) else {
                continue;
            };
            let pem = source
                .read(&path)
                .map_err(|source| KeyStoreError::Io { path: path.clone(), source })?;
            let key = parse_private_pem(&path, &pem)?;
            debug!(kid, "loaded signing key");
            loaded.insert(kid.to_owned(), key);
        }

        let marker = source
            .read(Path::new(ACTIVE_KID_FILE))
            .map_err(KeyStoreError::MissingActiveKid)?;
        let active = String::from_utf8_lossy(&marker).trim().to_owned();
        if !loaded.contains_key(&active) && !self.keys.contains_key(&active) {
            return Err(KeyStoreError::UnknownActiveKid(active));
        }

        self.keys.extend(loaded);
        Ok(active)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    fn get(&self, kid: &str) -> Result<&SigningKey, KeyStoreError> {
        self.keys.get(kid).ok_or_else(|| KeyStoreError::NotFound(kid.to_owned()))
    }
}

impl KeyLookup for KeyStore {
    fn private_key(&self, kid: &str) -> Result<&EncodingKey, KeyStoreError> {
        self.get(kid).map(|k| &k.encoding)
    }

    fn public_key(&self, kid: &str) -> Result<&DecodingKey, KeyStoreError> {
        self.get(kid).map(|k| &k.decoding)
    }
}

/// Lists kids only. Key material never reaches a formatter.
impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `Some(kid)` for `<kid>-private.<ext>`, `None` for anything else.
fn private_key_kid(path: &Path) -> Option<&str> {
    path.extension()?;
    let stem = path.file_stem()?.to_str()?;
    if stem.ends_with(PUBLIC_SUFFIX) {
        return None;
    }
    stem.strip_suffix(PRIVATE_SUFFIX).filter(|kid| !kid.is_empty())
}

/// Accepts PKCS#1 (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) blocks.
fn parse_private_pem(path: &Path, pem: &[u8]) -> Result<SigningKey, KeyStoreError> {
    let parse_err = |reason: String| KeyStoreError::Parse { path: path.to_path_buf(), reason };

    let text = std::str::from_utf8(pem).map_err(|_| KeyStoreError::InvalidPem(path.to_path_buf()))?;
    if !text.contains("-----BEGIN ") {
        return Err(KeyStoreError::InvalidPem(path.to_path_buf()));
    }

    let private = RsaPrivateKey::from_pkcs1_pem(text)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(text))
        .map_err(|e| parse_err(e.to_string()))?;
    let public_pem = private
        .to_public_key()
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| parse_err(e.to_string()))?;

    let encoding = EncodingKey::from_rsa_pem(pem).map_err(|e| parse_err(e.to_string()))?;
    let decoding =
        DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(|e| parse_err(e.to_string()))?;
    Ok(SigningKey { encoding, decoding })
}
