//! Homogeneity scoring for rectangular regions.
//!
//! Each metric reduces a region to a single non-negative score; the
//! quadtree splits a block whenever its score exceeds the threshold. The
//! set is closed: callers select one of exactly five kinds by identifier,
//! and every kind knows its own valid threshold range.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::buffer::{PixelBuffer, Region};

/// SSIM stabilization constants, `(0.01·255)²` and `(0.03·255)²`.
const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

/// Luma weights used to combine per-channel SSIM scores.
const SSIM_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

/// The error measurement driving the split/stop decision.
///
/// All metrics score a perfectly uniform region as 0; larger scores mean a
/// less homogeneous block. Unless noted, per-channel statistics are
/// combined with an unweighted average over R, G and B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMetric {
    /// Per-channel population variance around the region mean.
    Variance,

    /// Mean absolute deviation from the region mean.
    Mad,

    /// Spread between the brightest and darkest value per channel.
    MaxDiff,

    /// Shannon entropy of the per-channel value histograms, in bits.
    Entropy,

    /// `1 − SSIM` between the region and a flat block of its own average
    /// color, with luma-weighted channel combination.
    Ssim,
}

impl ErrorMetric {
    pub const ALL: [ErrorMetric; 5] = [
        ErrorMetric::Variance,
        ErrorMetric::Mad,
        ErrorMetric::MaxDiff,
        ErrorMetric::Entropy,
        ErrorMetric::Ssim,
    ];

    /// Identifier used for selection, range lookup and reporting.
    pub fn name(self) -> &'static str {
        match self {
            ErrorMetric::Variance => "variance",
            ErrorMetric::Mad => "mad",
            ErrorMetric::MaxDiff => "max-diff",
            ErrorMetric::Entropy => "entropy",
            ErrorMetric::Ssim => "ssim",
        }
    }

    /// Upper end of the metric's valid threshold range, which doubles as
    /// the bisection search's initial `high` bound.
    ///
    /// The values fall out of 8-bit channel depth: a region that is half
    /// 0 and half 255 maximizes variance at `(255/2)² = 16256.25` and MAD
    /// at `255/2`; max-diff peaks at the full swing; a flat histogram over
    /// 256 levels carries `log2(256) = 8` bits; SSIM error is `1 − ssim`
    /// with ssim in `[0, 1]`.
    pub fn max_threshold(self) -> f64 {
        match self {
            ErrorMetric::Variance => 16_256.25,
            ErrorMetric::Mad => 127.5,
            ErrorMetric::MaxDiff => 255.0,
            ErrorMetric::Entropy => 8.0,
            ErrorMetric::Ssim => 1.0,
        }
    }

    /// Threshold used when the caller gives neither a threshold nor a
    /// target ratio.
    pub fn default_threshold(self) -> f64 {
        match self {
            ErrorMetric::Variance => 2000.0,
            ErrorMetric::Mad => 10.0,
            ErrorMetric::MaxDiff => 15.0,
            ErrorMetric::Entropy => 5.0,
            ErrorMetric::Ssim => 0.1,
        }
    }

    /// Score `region` of `buffer`.
    ///
    /// A region with no pixels scores 0 (perfectly homogeneous) for every
    /// metric; degenerate rectangles show up during odd-dimension splits
    /// and must not fail.
    pub fn evaluate(self, buffer: &PixelBuffer, region: Region) -> f64 {
        match self {
            ErrorMetric::Variance => variance(buffer, region),
            ErrorMetric::Mad => mean_absolute_deviation(buffer, region),
            ErrorMetric::MaxDiff => max_difference(buffer, region),
            ErrorMetric::Entropy => entropy(buffer, region),
            ErrorMetric::Ssim => ssim_error(buffer, region),
        }
    }
}

impl fmt::Display for ErrorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown error metric {0:?}; expected one of variance, mad, max-diff, entropy, ssim")]
pub struct UnknownMetric(String);

impl FromStr for ErrorMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Ok(match lower.as_str() {
            "variance" => ErrorMetric::Variance,
            "mad" => ErrorMetric::Mad,
            "max-diff" | "maxdiff" | "max_diff" => ErrorMetric::MaxDiff,
            "entropy" => ErrorMetric::Entropy,
            "ssim" => ErrorMetric::Ssim,
            _ => return Err(UnknownMetric(s.to_string())),
        })
    }
}

/// Per-channel f64 means, or `None` for an empty region.
fn channel_means(buffer: &PixelBuffer, region: Region) -> Option<[f64; 3]> {
    if region.is_empty() {
        return None;
    }

    let mut sum = [0.0f64; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for (s, v) in sum.iter_mut().zip(channels) {
                *s += v as f64;
            }
        }
    }

    let n = region.area() as f64;
    Some(sum.map(|s| s / n))
}

fn variance(buffer: &PixelBuffer, region: Region) -> f64 {
    let Some(means) = channel_means(buffer, region) else {
        return 0.0;
    };

    let mut sq = [0.0f64; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for ((s, v), mean) in sq.iter_mut().zip(channels).zip(means) {
                let diff = v as f64 - mean;
                *s += diff * diff;
            }
        }
    }

    let n = region.area() as f64;
    sq.iter().map(|s| s / n).sum::<f64>() / 3.0
}

fn mean_absolute_deviation(buffer: &PixelBuffer, region: Region) -> f64 {
    let Some(means) = channel_means(buffer, region) else {
        return 0.0;
    };

    let mut dev = [0.0f64; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for ((s, v), mean) in dev.iter_mut().zip(channels).zip(means) {
                *s += (v as f64 - mean).abs();
            }
        }
    }

    let n = region.area() as f64;
    dev.iter().map(|s| s / n).sum::<f64>() / 3.0
}

fn max_difference(buffer: &PixelBuffer, region: Region) -> f64 {
    if region.is_empty() {
        return 0.0;
    }

    let mut min = [255u8; 3];
    let mut max = [0u8; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for c in 0..3 {
                min[c] = min[c].min(channels[c]);
                max[c] = max[c].max(channels[c]);
            }
        }
    }

    (0..3).map(|c| (max[c] - min[c]) as f64).sum::<f64>() / 3.0
}

fn entropy(buffer: &PixelBuffer, region: Region) -> f64 {
    if region.is_empty() {
        return 0.0;
    }

    let mut hist = [[0u32; 256]; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for c in 0..3 {
                hist[c][channels[c] as usize] += 1;
            }
        }
    }

    let n = region.area() as f64;
    let channel_entropy = |counts: &[u32; 256]| {
        counts
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = count as f64 / n;
                -p * p.log2()
            })
            .sum::<f64>()
    };

    hist.iter().map(channel_entropy).sum::<f64>() / 3.0
}

/// SSIM of the region against a constant block of its own average color.
///
/// The reference block has zero variance and zero covariance with the
/// region, so the standard formula collapses to a closed form per channel.
fn ssim_error(buffer: &PixelBuffer, region: Region) -> f64 {
    let Some(means) = channel_means(buffer, region) else {
        return 0.0;
    };

    let reference = buffer.average_color(region).channels();
    let n = region.area() as f64;

    let mut sq = [0.0f64; 3];
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            let channels = buffer.get(x, y).channels();
            for ((s, v), mean) in sq.iter_mut().zip(channels).zip(means) {
                let diff = v as f64 - mean;
                *s += diff * diff;
            }
        }
    }

    let mut ssim = 0.0;
    for c in 0..3 {
        let mu = means[c];
        let mu_ref = reference[c] as f64;
        let var = sq[c] / n;

        let numerator = (2.0 * mu * mu_ref + SSIM_C1) * SSIM_C2;
        let denominator = (mu * mu + mu_ref * mu_ref + SSIM_C1) * (var + SSIM_C2);

        let channel = if denominator == 0.0 {
            1.0
        } else {
            numerator / denominator
        };
        ssim += SSIM_WEIGHTS[c] * channel;
    }

    1.0 - ssim
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Pixel;

    fn uniform(color: Pixel) -> PixelBuffer {
        PixelBuffer::filled(6, 6, color)
    }

    /// Half-black half-white buffer, split vertically down the middle.
    fn half_and_half(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        for y in 0..h {
            for x in w / 2..w {
                buf.set(x, y, Pixel::WHITE);
            }
        }
        buf
    }

    #[test]
    fn all_metrics_are_neutral_on_uniform_regions() {
        let buf = uniform(Pixel::new(17, 130, 201));
        for metric in ErrorMetric::ALL {
            let score = metric.evaluate(&buf, buf.bounds());
            assert!(
                score.abs() < 1e-9,
                "{} scored {score} on a uniform region",
                metric.name()
            );
        }
    }

    #[test]
    fn all_metrics_are_neutral_on_empty_regions() {
        let buf = uniform(Pixel::WHITE);
        for metric in ErrorMetric::ALL {
            assert_eq!(metric.evaluate(&buf, Region::new(2, 2, 0, 3)), 0.0);
        }
    }

    #[test]
    fn variance_peaks_at_its_threshold_bound() {
        // Half 0 / half 255 realizes the documented (255/2)² maximum.
        let buf = half_and_half(8, 8);
        let score = ErrorMetric::Variance.evaluate(&buf, buf.bounds());
        assert!((score - ErrorMetric::Variance.max_threshold()).abs() < 1e-9);
    }

    #[test]
    fn mad_peaks_at_its_threshold_bound() {
        let buf = half_and_half(8, 8);
        let score = ErrorMetric::Mad.evaluate(&buf, buf.bounds());
        assert!((score - ErrorMetric::Mad.max_threshold()).abs() < 1e-9);
    }

    #[test]
    fn max_diff_sees_full_swing() {
        let buf = half_and_half(8, 8);
        assert_eq!(ErrorMetric::MaxDiff.evaluate(&buf, buf.bounds()), 255.0);
    }

    #[test]
    fn entropy_of_two_equally_likely_values_is_one_bit() {
        let buf = half_and_half(8, 8);
        let score = ErrorMetric::Entropy.evaluate(&buf, buf.bounds());
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ssim_error_grows_with_texture() {
        let flat = uniform(Pixel::new(90, 90, 90));
        let busy = half_and_half(8, 8);
        let flat_score = ErrorMetric::Ssim.evaluate(&flat, flat.bounds());
        let busy_score = ErrorMetric::Ssim.evaluate(&busy, busy.bounds());
        assert!(flat_score < 1e-9);
        assert!(busy_score > flat_score);
        assert!(busy_score <= 1.0);
    }

    #[test]
    fn metric_names_round_trip_through_from_str() {
        for metric in ErrorMetric::ALL {
            assert_eq!(metric.name().parse::<ErrorMetric>().unwrap(), metric);
        }
        assert!("fractal".parse::<ErrorMetric>().is_err());
    }
}
