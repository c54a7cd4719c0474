//! Streaming landmark fingerprinter.
//!
//! Consumes raw mono 16-bit little-endian PCM as opaque byte chunks and
//! emits (time, hash) landmark fingerprints. Each frame of NFFT samples is
//! Hann-windowed and FFT'd, the magnitude spectrum is compared against an
//! adaptive per-bin log threshold, and the surviving spectral peaks are
//! paired into constellation hashes once their pruning window has closed.

mod marks;
mod tables;

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use marks::{Mark, MarkRing, Peak};
pub use tables::NBINS;
use tables::{HANN, MASK};

/// Input PCM rate in Hz. The decoder resamples everything to this.
pub const SAMPLING_RATE: u32 = 44100;
/// Bytes per sample (signed 16-bit little-endian).
pub const BPS: usize = 2;
/// FFT window length in samples.
pub const NFFT: usize = 64;
/// Hop size in samples (50% overlap).
pub const STEP: usize = NFFT / 2;

/// Max peaks kept per frame.
const MNLM: usize = 10;
/// Max fingerprints emitted per anchor frame.
const MPPP: usize = 10;
/// Lowest frequency bin considered for peaks and pairing.
const IF_MIN: usize = 0;
/// One past the highest frequency bin considered.
const IF_MAX: usize = NBINS;
/// Max bin distance between paired peaks (capped at NBINS).
const WINDOW_DF: usize = 80;
/// Max frame distance a pair may span into the past.
const WINDOW_DT: usize = 120;
/// Frames of latency before a frame's peaks are final and may anchor pairs.
const PRUNING_DT: usize = 32;
/// Width scale of the Gaussian threshold mask on the frequency axis.
const MASK_DF: f64 = 3.0;
/// Per-frame decay of the log-domain threshold, ln(0.99).
const MASK_DECAY_LOG: f64 = -0.010050335853501441;
/// Floor applied before every logarithm.
const LOG_EPSILON: f64 = 1e-6;
/// Soft cap on retained input bytes before the buffer is compacted.
const BUFFER_SOFT_CAP: usize = 1_000_000;

/// One landmark pair: the anchor frame's timestamp in milliseconds and the
/// packed (past bin, anchor bin, frame delta) hash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub time: f64,
    pub hash: u32,
}

/// Convert a frame index to the timestamp of that frame in milliseconds.
pub fn frame_to_ms(frame: usize) -> f64 {
    frame as f64 * (STEP as f64 * 1000.0) / SAMPLING_RATE as f64
}

fn pack_hash(f_past: usize, f_anchor: usize, dt: usize) -> u32 {
    (f_past + NBINS * (f_anchor + NBINS * dt)) as u32
}

/// Streaming fingerprint generator for one PCM byte stream.
///
/// Feed arbitrary byte chunks with [`push`](Self::push); each call processes
/// every complete frame the buffered bytes admit and returns the
/// fingerprints generated along the way, in nondecreasing anchor time.
/// Chunk boundaries are irrelevant to the output. Signal end-of-stream with
/// [`finish`](Self::finish); anchors still inside the pruning window at that
/// point are dropped, consistent with the streaming model.
pub struct Fingerprinter {
    /// Unconsumed input bytes. `base` is the absolute stream offset of
    /// `buffer[0]`, so absolute sample indices stay valid across compaction.
    buffer: Vec<u8>,
    base: usize,
    /// Next frame index to process.
    frame: usize,
    /// Adaptive per-bin log-magnitude floor.
    threshold: [f64; NBINS],
    marks: MarkRing,
    fft: Arc<dyn Fft<f64>>,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            base: 0,
            frame: 0,
            threshold: [0.0; NBINS],
            marks: MarkRing::new(),
            fft: FftPlanner::<f64>::new().plan_fft_forward(NFFT),
        }
    }

    /// Feed a chunk of the PCM byte stream and collect any fingerprints
    /// whose anchor frame closed during this call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Fingerprint> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        self.drain_frames(&mut out);
        self.compact();
        out
    }

    /// Signal end-of-stream and collect any remaining fingerprints. A
    /// trailing partial sample is treated as missing; anchors whose pruning
    /// window never closed are dropped.
    pub fn finish(mut self) -> Vec<Fingerprint> {
        let mut out = Vec::new();
        self.drain_frames(&mut out);
        out
    }

    fn drain_frames(&mut self, out: &mut Vec<Fingerprint>) {
        while self.base + self.buffer.len() >= (self.frame * STEP + NFFT) * BPS {
            self.process_frame(out);
        }
    }

    /// Run steps 1-11 of the per-frame algorithm on frame `self.frame`.
    fn process_frame(&mut self, out: &mut Vec<Fingerprint>) {
        let t = self.frame;

        // Window and normalize the frame's NFFT samples, then FFT in place.
        let start = t * STEP * BPS - self.base;
        let mut fft_buf = [Complex::new(0.0f64, 0.0); NFFT];
        for (i, slot) in fft_buf.iter_mut().enumerate() {
            let o = start + i * BPS;
            let s = i16::from_le_bytes([self.buffer[o], self.buffer[o + 1]]);
            *slot = Complex::new(s as f64 * HANN[i] / 32768.0, 0.0);
        }
        self.fft.process(&mut fft_buf);

        // Magnitudes with a treble-favoring boost: bass is dense but carries
        // little landmark information.
        let mut spectrum = [0.0f64; NBINS];
        for i in IF_MIN..IF_MAX {
            spectrum[i] = fft_buf[i].norm() * ((i + 16) as f64).sqrt();
        }

        // Excess of the log spectrum over the adaptive threshold.
        let mut diff = [0.0f64; NBINS];
        for i in 0..NBINS {
            diff[i] = (spectrum[i].max(LOG_EPSILON).ln() - self.threshold[i]).max(0.0);
        }

        // Local maxima of the excess, ranked by raw magnitude. Ties keep the
        // earlier bin.
        let mut peaks: Vec<Peak> = Vec::new();
        for i in IF_MIN + 1..IF_MAX - 1 {
            if diff[i] > diff[i - 1] && diff[i] > diff[i + 1] {
                peaks.push(Peak { bin: i, mag: spectrum[i] });
            }
        }
        peaks.sort_by(|a, b| b.mag.total_cmp(&a.mag).then(a.bin.cmp(&b.bin)));
        peaks.truncate(MNLM);

        // Raise the floor around each accepted peak, more broadly at high
        // bins where the mask widens.
        for p in &peaks {
            let floor = p.mag.max(LOG_EPSILON).ln();
            for (j, th) in self.threshold.iter_mut().enumerate() {
                let masked = floor + MASK[p.bin][j];
                if masked > *th {
                    *th = masked;
                }
            }
        }

        self.marks.push(Mark { t, peaks });

        self.back_prune(t);

        // The frame whose pruning window just closed becomes an anchor; its
        // surviving peaks are final from here on.
        if t > PRUNING_DT {
            let t0 = t - PRUNING_DT - 1;
            self.emit_anchor(t0, out);
            self.marks.drop_before((t0 + 1).saturating_sub(WINDOW_DT));
        }

        for th in &mut self.threshold {
            *th += MASK_DECAY_LOG;
        }

        self.frame += 1;
    }

    /// Re-test recent peaks against the threshold as it stands now; peaks
    /// that sank below it are struck before they can anchor a pair. Bin 0 is
    /// reserved for DC and exempt.
    fn back_prune(&mut self, t: usize) {
        for tm in t.saturating_sub(PRUNING_DT)..=t {
            let age = (t - tm) as f64;
            let Some(mark) = self.marks.get_mut(tm) else {
                continue;
            };
            for p in &mut mark.peaks {
                if !p.mag.is_finite() || p.bin == 0 {
                    continue;
                }
                if p.mag.max(LOG_EPSILON).ln() < self.threshold[p.bin] + MASK_DECAY_LOG * age {
                    p.mag = f64::NEG_INFINITY;
                }
            }
        }
    }

    /// Pair every surviving peak of anchor frame `t0` with valid peaks of
    /// the preceding WINDOW_DT frames, nearest frames first, strongest
    /// anchors first, stopping at the per-frame emission cap.
    fn emit_anchor(&self, t0: usize, out: &mut Vec<Fingerprint>) {
        let Some(anchor) = self.marks.get(t0) else {
            return;
        };
        let time = frame_to_ms(t0);
        let df_cap = WINDOW_DF.min(NBINS);
        let mut budget = MPPP;

        for p in anchor.peaks.iter().filter(|p| p.mag.is_finite()) {
            for j in (t0.saturating_sub(WINDOW_DT)..=t0).rev() {
                let Some(past) = self.marks.get(j) else {
                    continue;
                };
                for q in past.peaks.iter().filter(|q| q.mag.is_finite()) {
                    if q.bin == p.bin || q.bin.abs_diff(p.bin) >= df_cap {
                        continue;
                    }
                    out.push(Fingerprint {
                        time,
                        hash: pack_hash(q.bin, p.bin, t0 - j),
                    });
                    budget -= 1;
                    if budget == 0 {
                        return;
                    }
                }
            }
        }
    }

    /// Drop consumed bytes once the buffer outgrows the soft cap, advancing
    /// the base offset so absolute sample indices keep working. Nothing an
    /// upcoming frame could read is ever discarded.
    fn compact(&mut self) {
        if self.buffer.len() <= BUFFER_SOFT_CAP {
            return;
        }
        let keep_from = self.frame * STEP * BPS;
        if keep_from > self.base {
            self.buffer.drain(..keep_from - self.base);
            self.base = keep_from;
        }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
