//! File-to-report orchestration: cache lookup, decode, fingerprint, match.

use std::path::Path;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::cache;
use crate::config::AppConfig;
use crate::decoder::{self, DecodeError};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::matcher::{self, MatchOptions, MatchReport};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Cache error: {0}")]
    Cache(#[from] std::io::Error),
}

/// Outcome of a full query-in-reference run.
pub struct LocateResult {
    pub report: MatchReport,
    pub query_fingerprints: usize,
    pub reference_fingerprints: usize,
}

/// Fingerprint the query and reference files (in parallel) and locate the
/// query inside the reference.
pub fn locate(
    query: &Path,
    reference: &Path,
    config: &AppConfig,
) -> Result<LocateResult, PipelineError> {
    let progress = MultiProgress::new();
    let (a, b) = rayon::join(
        || fingerprints_for(query, config, &progress),
        || fingerprints_for(reference, config, &progress),
    );
    let (a, b) = (a?, b?);

    let options = MatchOptions {
        bin_size_ms: config.bin_size_ms,
        confidence_threshold: config.confidence_threshold,
    };
    let report = matcher::match_fingerprints(&a, &b, &options);

    Ok(LocateResult {
        report,
        query_fingerprints: a.len(),
        reference_fingerprints: b.len(),
    })
}

/// Fingerprints for one file. A present, valid sidecar cache bypasses the
/// decode and fingerprint stages entirely.
fn fingerprints_for(
    path: &Path,
    config: &AppConfig,
    progress: &MultiProgress,
) -> Result<Vec<Fingerprint>, PipelineError> {
    if config.cache {
        if let Some(cached) = cache::load(path)? {
            return Ok(cached);
        }
    }

    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("?")
        .to_string();
    let pb = progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} fingerprinting {msg} ({bytes})").unwrap(),
    );
    pb.set_message(name);

    let mut fingerprinter = Fingerprinter::new();
    let mut fingerprints = Vec::new();
    decoder::stream_pcm(path, &config.ffmpeg_path, |chunk| {
        fingerprints.extend(fingerprinter.push(chunk));
        pb.inc(chunk.len() as u64);
    })?;
    fingerprints.extend(fingerprinter.finish());
    pb.finish_and_clear();

    log::info!("{}: {} fingerprints", path.display(), fingerprints.len());

    if config.cache {
        cache::store(path, &fingerprints);
    }
    Ok(fingerprints)
}

/// Format a millisecond offset as `H:MM:SS.mmm`, signed when negative.
pub fn format_offset(ms: f64) -> String {
    let sign = if ms < 0.0 { "-" } else { "" };
    let total = ms.abs().round() as u64;
    let millis = total % 1000;
    let seconds = (total / 1000) % 60;
    let minutes = (total / 60_000) % 60;
    let hours = total / 3_600_000;
    format!("{sign}{hours}:{minutes:02}:{seconds:02}.{millis:03}")
}
