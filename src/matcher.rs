//! Offset-histogram matching of two fingerprint lists.
//!
//! The matcher joins the query (A) and reference (B) fingerprint lists on
//! hash equality, bins the time offsets of the joined pairs, and reports the
//! dominant bin. It is a pure function: identical inputs and options yield a
//! byte-identical report.

use std::collections::HashMap;

use serde::Serialize;

use crate::fingerprint::Fingerprint;

/// Matcher knobs.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Width of one offset histogram bin in milliseconds.
    pub bin_size_ms: f64,
    /// Confidence below this is reported to the user as dubious.
    pub confidence_threshold: u64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            bin_size_ms: 0.05,
            confidence_threshold: 5,
        }
    }
}

/// One hash the query and reference have in common.
#[derive(Debug, Clone, Serialize)]
pub struct MatchDetail {
    pub hash: u32,
    pub time_a: f64,
    pub time_b: f64,
    pub offset: f64,
}

/// Where the query sits inside the reference, with supporting evidence.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    /// Center of the winning offset bin, in milliseconds (B time - A time).
    pub offset_ms: f64,
    /// Number of evidence entries within tolerance of the winning bin.
    pub match_count: usize,
    /// `match_count / |A|`, 0 when A is empty.
    pub match_rate: f64,
    /// Count of joined pairs that landed in the winning bin.
    pub confidence: u64,
    pub matches: Vec<MatchDetail>,
}

impl MatchReport {
    fn empty() -> Self {
        Self {
            offset_ms: 0.0,
            match_count: 0,
            match_rate: 0.0,
            confidence: 0,
            matches: Vec::new(),
        }
    }
}

/// Locate the query list `a` inside the reference list `b`.
///
/// Neither list is assumed sorted. Duplicate hashes are meaningful and kept
/// on both sides. An empty list on either side yields the all-zero report.
pub fn match_fingerprints(a: &[Fingerprint], b: &[Fingerprint], options: &MatchOptions) -> MatchReport {
    if a.is_empty() || b.is_empty() {
        return MatchReport::empty();
    }
    let bin_size = options.bin_size_ms;

    // Index B: hash -> every time it occurs, in input order.
    let mut index: HashMap<u32, Vec<f64>> = HashMap::new();
    for fp in b {
        index.entry(fp.hash).or_default().push(fp.time);
    }

    // Join A against the index, binning each offset. Rounding is
    // half-away-from-zero so the binning is platform-deterministic.
    let mut counts: HashMap<i64, u64> = HashMap::new();
    let mut candidates: Vec<MatchDetail> = Vec::new();
    for fp in a {
        let Some(times) = index.get(&fp.hash) else {
            continue;
        };
        for &time_b in times {
            let offset = time_b - fp.time;
            let bin = (offset / bin_size).round() as i64;
            *counts.entry(bin).or_insert(0) += 1;
            candidates.push(MatchDetail {
                hash: fp.hash,
                time_a: fp.time,
                time_b,
                offset,
            });
        }
    }

    // Dominant bin; ties go to the smallest bin value for determinism.
    let mut best: Option<(i64, u64)> = None;
    for (&bin, &count) in &counts {
        let better = match best {
            None => true,
            Some((best_bin, best_count)) => {
                count > best_count || (count == best_count && bin < best_bin)
            }
        };
        if better {
            best = Some((bin, count));
        }
    }
    let Some((best_bin, confidence)) = best else {
        return MatchReport::empty();
    };
    let offset_ms = best_bin as f64 * bin_size;

    // Evidence within two bins of the winner.
    let tolerance = 2.0 * bin_size;
    let matches: Vec<MatchDetail> = candidates
        .into_iter()
        .filter(|d| (d.offset - offset_ms).abs() <= tolerance)
        .collect();

    MatchReport {
        offset_ms,
        match_count: matches.len(),
        match_rate: matches.len() as f64 / a.len() as f64,
        confidence,
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tests::{fingerprint_all, music_pcm, noise_pcm};
    use crate::fingerprint::{frame_to_ms, BPS, SAMPLING_RATE, STEP};

    fn fp(time: f64, hash: u32) -> Fingerprint {
        Fingerprint { time, hash }
    }

    #[test]
    fn test_empty_inputs_yield_zero_report() {
        let some = vec![fp(0.0, 1)];
        for (a, b) in [(&[][..], &some[..]), (&some[..], &[][..]), (&[][..], &[][..])] {
            let report = match_fingerprints(a, b, &MatchOptions::default());
            assert_eq!(report.offset_ms, 0.0);
            assert_eq!(report.match_count, 0);
            assert_eq!(report.match_rate, 0.0);
            assert_eq!(report.confidence, 0);
            assert!(report.matches.is_empty());
        }
    }

    #[test]
    fn test_self_match_with_unique_hashes() {
        let a: Vec<Fingerprint> = (0..50).map(|i| fp(i as f64 * 0.7, i)).collect();
        let report = match_fingerprints(&a, &a, &MatchOptions::default());
        assert_eq!(report.offset_ms, 0.0);
        assert_eq!(report.confidence, 50);
        assert_eq!(report.match_count, 50);
        assert_eq!(report.match_rate, 1.0);
    }

    #[test]
    fn test_known_shift_is_recovered() {
        let a: Vec<Fingerprint> = (0..40).map(|i| fp(i as f64 * 2.0, 100 + i)).collect();
        let b: Vec<Fingerprint> = a.iter().map(|f| fp(f.time + 1000.0, f.hash)).collect();
        let report = match_fingerprints(&a, &b, &MatchOptions::default());
        assert!((report.offset_ms - 1000.0).abs() <= 0.05);
        assert_eq!(report.confidence, 40);
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        let options = MatchOptions {
            bin_size_ms: 1.0,
            ..Default::default()
        };
        // Offsets of exactly +0.5 must land in the +1 bin.
        let a = vec![fp(0.0, 7), fp(10.0, 8)];
        let b = vec![fp(0.5, 7), fp(10.5, 8)];
        let report = match_fingerprints(&a, &b, &options);
        assert_eq!(report.offset_ms, 1.0);

        // And -0.5 in the -1 bin, not 0.
        let b = vec![fp(-0.5, 7), fp(9.5, 8)];
        let report = match_fingerprints(&a, &b, &options);
        assert_eq!(report.offset_ms, -1.0);
    }

    #[test]
    fn test_tie_breaks_to_smallest_bin() {
        let a = vec![fp(100.0, 1), fp(200.0, 2)];
        let b = vec![fp(110.0, 1), fp(190.0, 2)]; // offsets +10 and -10, one each
        let report = match_fingerprints(&a, &b, &MatchOptions::default());
        assert_eq!(report.offset_ms, -10.0);
        assert_eq!(report.confidence, 1);
    }

    #[test]
    fn test_duplicate_hashes_all_join() {
        let a = vec![fp(0.0, 5)];
        let b = vec![fp(3.0, 5), fp(3.0, 5), fp(900.0, 5)];
        let report = match_fingerprints(&a, &b, &MatchOptions::default());
        assert_eq!(report.offset_ms, 3.0);
        assert_eq!(report.confidence, 2);
        assert_eq!(report.match_count, 2);
        assert_eq!(report.match_rate, 2.0);
    }

    #[test]
    fn test_evidence_tolerance_spans_two_bins() {
        let options = MatchOptions {
            bin_size_ms: 1.0,
            ..Default::default()
        };
        let a = vec![fp(0.0, 1), fp(10.0, 2), fp(20.0, 3), fp(30.0, 4)];
        let b = vec![
            fp(100.0, 1),   // offset 100, winning bin
            fp(110.0, 2),   // offset 100
            fp(121.8, 3),   // offset 101.8, within tolerance 2
            fp(135.0, 4),   // offset 105, outside
        ];
        let report = match_fingerprints(&a, &b, &options);
        assert_eq!(report.offset_ms, 100.0);
        assert_eq!(report.confidence, 2);
        assert_eq!(report.match_count, 3);
        assert_eq!(report.match_rate, 0.75);
    }

    // Scenario tests running the full fingerprinter-to-matcher path on
    // synthesized PCM.

    #[test]
    fn test_fingerprint_self_match() {
        let fps = fingerprint_all(&music_pcm(2.0, 11));
        assert!(!fps.is_empty());
        let report = match_fingerprints(&fps, &fps, &MatchOptions::default());
        assert_eq!(report.offset_ms, 0.0);
        assert!(report.confidence >= fps.len() as u64);
    }

    #[test]
    fn test_frame_aligned_silence_prefix_recovers_offset() {
        // Prefix a whole number of frames of silence so A's and B's frame
        // grids line up exactly.
        let prefix_frames = 1376;
        let music = music_pcm(2.0, 21);
        let mut shifted = vec![0u8; prefix_frames * STEP * BPS];
        shifted.extend_from_slice(&music);

        let a = fingerprint_all(&music);
        let b = fingerprint_all(&shifted);
        assert!(!a.is_empty() && !b.is_empty());

        let options = MatchOptions::default();
        let report = match_fingerprints(&a, &b, &options);
        let expected = frame_to_ms(prefix_frames);
        assert!(
            (report.offset_ms - expected).abs() <= options.bin_size_ms,
            "offset {} vs expected {expected}",
            report.offset_ms
        );
        assert!(report.confidence as usize * 3 >= a.len());
    }

    #[test]
    fn test_unaligned_silence_prefix_with_coarser_bins() {
        // 1000 ms is not a whole number of frames; a 1 ms bin absorbs the
        // frame-grid quantization.
        let music = music_pcm(2.0, 5);
        let mut shifted = vec![0u8; SAMPLING_RATE as usize * BPS];
        shifted.extend_from_slice(&music);

        let a = fingerprint_all(&music);
        let b = fingerprint_all(&shifted);

        let options = MatchOptions {
            bin_size_ms: 1.0,
            ..Default::default()
        };
        let report = match_fingerprints(&a, &b, &options);
        assert!(
            (report.offset_ms - 1000.0).abs() <= options.bin_size_ms,
            "offset {}",
            report.offset_ms
        );
    }

    #[test]
    fn test_music_against_unrelated_noise_matches_poorly() {
        let a = fingerprint_all(&music_pcm(2.0, 1001));
        let b = fingerprint_all(&noise_pcm(2.0, 2002));
        assert!(!a.is_empty() && !b.is_empty());
        let report = match_fingerprints(&a, &b, &MatchOptions::default());
        assert!(report.match_rate < 0.1, "match rate {}", report.match_rate);
    }

    #[test]
    fn test_report_is_deterministic() {
        let a = fingerprint_all(&music_pcm(1.0, 31));
        let b = fingerprint_all(&music_pcm(2.0, 32));
        let r1 = match_fingerprints(&a, &b, &MatchOptions::default());
        let r2 = match_fingerprints(&a, &b, &MatchOptions::default());
        assert_eq!(
            serde_json::to_string(&r1).unwrap(),
            serde_json::to_string(&r2).unwrap()
        );
    }
}
