//! Audio decoding via an ffmpeg child process.
//!
//! ffmpeg handles every input format and resamples to the fingerprinter's
//! contract: raw signed 16-bit little-endian mono PCM at 44100 Hz, streamed
//! over stdout. Raw `s16le` output is requested so no container header ever
//! reaches the PCM stream.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;

use crate::fingerprint::SAMPLING_RATE;

/// Bytes handed to the sink per read.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("ffmpeg not found (is it installed and on PATH?)")]
    FfmpegNotFound,
    #[error("ffmpeg decode error: {0}")]
    Ffmpeg(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode `path` and feed its PCM byte stream into `sink` chunk by chunk.
///
/// The child's stderr is collected on a separate thread; a nonzero exit or
/// any error output is reported as [`DecodeError::Ffmpeg`].
pub fn stream_pcm<F>(path: &Path, ffmpeg: &str, mut sink: F) -> Result<(), DecodeError>
where
    F: FnMut(&[u8]),
{
    // Check ffmpeg is available
    if Command::new(ffmpeg).arg("-version").output().is_err() {
        return Err(DecodeError::FfmpegNotFound);
    }

    let rate = SAMPLING_RATE.to_string();
    let mut child = Command::new(ffmpeg)
        .args([
            "-loglevel",
            "error",
            "-i",
            &path.to_string_lossy(),
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-ar",
            &rate,
            "-ac",
            "1",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");

    // Drain stderr concurrently so a chatty child cannot deadlock the pipe.
    let stderr_thread = thread::spawn(move || {
        let mut msg = String::new();
        stderr.read_to_string(&mut msg).ok();
        msg
    });

    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = stdout.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        sink(&chunk[..n]);
    }

    let status = child.wait()?;
    let errors = stderr_thread.join().unwrap_or_default();
    let errors = errors.trim();

    if !status.success() {
        let msg = if errors.is_empty() {
            format!("ffmpeg exited with {status}")
        } else {
            errors.to_string()
        };
        return Err(DecodeError::Ffmpeg(msg));
    }
    if !errors.is_empty() {
        return Err(DecodeError::Ffmpeg(errors.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_reported() {
        let result = stream_pcm(
            Path::new("input.wav"),
            "definitely-not-an-ffmpeg-binary",
            |_| {},
        );
        assert!(matches!(result, Err(DecodeError::FfmpegNotFound)));
    }
}
