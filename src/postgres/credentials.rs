//! Persistence for generated database credentials.
//!
//! When an environment's postgres password is `auto_generated`, the password
//! is created once and stored in `.poststack/credentials.env` so that every
//! subsequent `start` produces identical credentials. Writes go through an
//! exclusive file lock and re-read under the lock, so two concurrent
//! `poststack` processes agree on the generated value.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".poststack";
const CREDENTIALS_FILE: &str = "credentials.env";

/// Generate a 16-char alphanumeric password using a CSPRNG.
pub fn generate_password() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Env-file key holding the generated password for one environment.
fn password_key(environment: &str) -> String {
    format!(
        "POSTSTACK_{}_DB_PASSWORD",
        environment.to_uppercase().replace('-', "_")
    )
}

fn credentials_path(work_dir: &Path) -> PathBuf {
    work_dir.join(STATE_DIR).join(CREDENTIALS_FILE)
}

fn load_existing(path: &Path) -> HashMap<String, String> {
    if !path.exists() {
        return HashMap::new();
    }
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(|r| r.ok()).collect(),
        Err(_) => HashMap::new(),
    }
}

/// Return the stored password for `environment`, generating and persisting
/// one on first use.
pub fn ensure_password(work_dir: &Path, environment: &str) -> Result<String> {
    let path = credentials_path(work_dir);
    let key = password_key(environment);

    // Fast path: already stored
    if let Some(existing) = load_existing(&path).remove(&key) {
        return Ok(existing);
    }

    std::fs::create_dir_all(path.parent().expect("credentials path has a parent"))?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::Filesystem(format!("Cannot write '{}': {}", path.display(), e)))?;

    // Exclusive lock — blocks until any concurrent writer finishes
    file.lock_exclusive()
        .map_err(|e| Error::Filesystem(format!("Cannot lock '{}': {}", path.display(), e)))?;

    // Re-read under lock to see what another process may have written
    let result = (|| {
        if let Some(existing) = load_existing(&path).remove(&key) {
            return Ok(existing);
        }

        let metadata = file
            .metadata()
            .map_err(|e| Error::Filesystem(format!("Cannot stat '{}': {}", path.display(), e)))?;
        if metadata.len() == 0 {
            writeln!(
                &file,
                "# Generated by poststack — do not commit this file"
            )
            .map_err(|e| Error::Filesystem(format!("Write error: {}", e)))?;
        }

        let password = generate_password();
        writeln!(&file, "{}={}", key, password)
            .map_err(|e| Error::Filesystem(format!("Write error: {}", e)))?;
        Ok(password)
    })();

    file.unlock()
        .map_err(|e| Error::Filesystem(format!("Cannot unlock '{}': {}", path.display(), e)))?;

    result
}
