//! PEM key storage.
//!
//! Layout under the key root:
//! - `identities/<name>.pem`: PKCS#8 private keys of local signing identities
//! - `authorized/<name>.pem`: SPKI public keys forming the authorized registry

use crate::db::{Result, StorageError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tally_core::{Keypair, PublicKey};
use tracing::debug;

const IDENTITIES_DIR: &str = "identities";
const AUTHORIZED_DIR: &str = "authorized";
const PEM_EXTENSION: &str = "pem";

/// Directory-backed store for signing identities and authorized public keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    /// Use `root` as the key directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory layout if it does not exist.
    pub fn init(&self) -> Result<()> {
        for dir in [self.identities_dir(), self.authorized_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.root.join(IDENTITIES_DIR)
    }

    pub fn authorized_dir(&self) -> PathBuf {
        self.root.join(AUTHORIZED_DIR)
    }

    // =========================================================================
    // Signing identities
    // =========================================================================

    /// Save a signing identity's private key.
    pub fn save_identity(&self, name: &str, keypair: &Keypair) -> Result<PathBuf> {
        let path = pem_path(&self.identities_dir(), name)?;
        write_pem(&path, &keypair.to_pkcs8_pem()?, true)?;
        debug!(name, fingerprint = %keypair.public_key.fingerprint(), "saved signing identity");
        Ok(path)
    }

    /// Load a signing identity by name.
    pub fn load_identity(&self, name: &str) -> Result<Keypair> {
        let path = pem_path(&self.identities_dir(), name)?;
        if !path.exists() {
            return Err(StorageError::NotFound(format!("identity {name}")));
        }
        let pem = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(Keypair::from_pkcs8_pem(&pem)?)
    }

    /// Names of all stored identities, sorted.
    pub fn list_identities(&self) -> Result<Vec<String>> {
        list_pem_names(&self.identities_dir())
    }

    /// Load every stored identity, sorted by name.
    pub fn load_identities(&self) -> Result<Vec<(String, Keypair)>> {
        self.list_identities()?
            .into_iter()
            .map(|name| {
                let keypair = self.load_identity(&name)?;
                Ok((name, keypair))
            })
            .collect()
    }

    // =========================================================================
    // Authorized keys
    // =========================================================================

    /// Add a public key to the authorized set under `name`.
    pub fn authorize(&self, name: &str, public_key: &PublicKey) -> Result<PathBuf> {
        let path = pem_path(&self.authorized_dir(), name)?;
        write_pem(&path, &public_key.to_pem()?, false)?;
        debug!(name, fingerprint = %public_key.fingerprint(), "authorized public key");
        Ok(path)
    }

    /// Add a PEM public key to the authorized set; the PEM must parse.
    pub fn authorize_pem(&self, name: &str, pem: &str) -> Result<PublicKey> {
        let public_key = PublicKey::from_pem(pem)?;
        self.authorize(name, &public_key)?;
        Ok(public_key)
    }

    /// Names of all authorized keys, sorted.
    pub fn list_authorized(&self) -> Result<Vec<String>> {
        list_pem_names(&self.authorized_dir())
    }

    /// Load the authorized public keys as a fresh snapshot.
    ///
    /// A file that does not parse is an error rather than being skipped.
    pub fn load_authorized(&self) -> Result<Vec<PublicKey>> {
        let dir = self.authorized_dir();
        self.list_authorized()?
            .into_iter()
            .map(|name| {
                let path = pem_path(&dir, &name)?;
                let pem = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
                Ok(PublicKey::from_pem(&pem)?)
            })
            .collect()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

fn pem_path(dir: &Path, name: &str) -> Result<PathBuf> {
    validate_name(name)?;
    Ok(dir.join(format!("{name}.{PEM_EXTENSION}")))
}

/// Write `pem` to `path`. Private keys are owner-only before any byte of
/// key material is written.
fn write_pem(path: &Path, pem: &str, private: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    let mut file = options.open(path).map_err(|e| StorageError::io(path, e))?;

    // `mode` only applies on creation; an existing file keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if private {
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| StorageError::io(path, e))?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    file.write_all(pem.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io(path, e))
}

fn list_pem_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
        if path.extension().and_then(|s| s.to_str()) != Some(PEM_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}
