//! Precomputed DSP tables, shared read-only by all fingerprinter instances.

use std::sync::LazyLock;

use super::{MASK_DF, NFFT};

/// Number of usable frequency bins of the real-input FFT.
pub const NBINS: usize = NFFT / 2;

/// Hann window coefficients for one analysis frame.
pub(crate) static HANN: LazyLock<[f64; NFFT]> = LazyLock::new(|| {
    let mut w = [0.0; NFFT];
    for (i, v) in w.iter_mut().enumerate() {
        *v = 0.5
            * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (NFFT - 1) as f64).cos());
    }
    w
});

/// Log-domain Gaussian mask, one row per anchor bin. The mask widens with
/// the anchor bin, so high-frequency peaks suppress a broader neighborhood.
pub(crate) static MASK: LazyLock<[[f64; NBINS]; NBINS]> = LazyLock::new(|| {
    let mut m = [[0.0; NBINS]; NBINS];
    for (i, row) in m.iter_mut().enumerate() {
        let width = MASK_DF * ((i + 3) as f64).sqrt();
        for (j, v) in row.iter_mut().enumerate() {
            let d = (j as f64 - i as f64) / width;
            *v = -0.5 * d * d;
        }
    }
    m
});
