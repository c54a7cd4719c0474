//! Sidecar fingerprint cache.
//!
//! Fingerprints are cached as a JSON array of `{time, hash}` objects in a
//! `<audio>.fingerprints.json` file next to the audio file. A present and
//! readable cache bypasses decoding and fingerprinting entirely.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::fingerprint::Fingerprint;

/// Cache file path for an audio file: the full file name plus the
/// `.fingerprints.json` suffix, in the same directory.
pub fn cache_path(audio: &Path) -> PathBuf {
    let mut name = audio.file_name().unwrap_or_default().to_os_string();
    name.push(".fingerprints.json");
    audio.with_file_name(name)
}

/// Load cached fingerprints for `audio` if a valid cache exists.
///
/// A missing cache returns `Ok(None)`. A malformed cache is logged and
/// ignored (the caller recomputes). Any other read failure is surfaced.
pub fn load(audio: &Path) -> io::Result<Option<Vec<Fingerprint>>> {
    let path = cache_path(audio);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match serde_json::from_str::<Vec<Fingerprint>>(&contents) {
        Ok(fingerprints) => {
            log::info!(
                "Loaded {} cached fingerprints from {}",
                fingerprints.len(),
                path.display()
            );
            Ok(Some(fingerprints))
        }
        Err(e) => {
            log::warn!("Ignoring malformed cache {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Write fingerprints back next to the audio file. Best effort: a failed
/// write costs a recompute next run, so it is logged rather than fatal.
pub fn store(audio: &Path, fingerprints: &[Fingerprint]) {
    let path = cache_path(audio);
    let json = match serde_json::to_string(fingerprints) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Failed to serialize fingerprints for {}: {}", path.display(), e);
            return;
        }
    };
    match fs::write(&path, json) {
        Ok(()) => log::debug!("Cached {} fingerprints to {}", fingerprints.len(), path.display()),
        Err(e) => log::warn!("Failed to write cache {}: {}", path.display(), e),
    }
}
