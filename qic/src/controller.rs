//! Parameter search: drives repeated quadtree builds against a byte-size
//! oracle until the encoded output lands on a caller-specified compression
//! target.
//!
//! Two modes. Fixed-threshold compression is a single validated build.
//! Target-ratio compression searches the threshold empirically, since the
//! mapping from threshold to encoded size depends on the image and the
//! external codec: bisection for the single-parameter metrics, a joint
//! block-size/threshold sweep for SSIM.

use std::io;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::buffer::PixelBuffer;
use crate::metric::ErrorMetric;
use crate::quadtree::{BuildParams, Quadtree};

/// Gap between the bisection bounds (and distance-to-target, in percent
/// points, for the plateau stop) at which the search ends.
const BISECT_TOLERANCE: f64 = 1e-4;

/// Consecutive identical compression readings needed before the plateau
/// stop may trigger. Guards against step-function compression curves that
/// would otherwise keep the bisection oscillating inside one plateau.
const PLATEAU_LIMIT: u32 = 3;

/// Joint search: a probe must land within this many percent points of the
/// target before the block size is considered worth refining. Tunable, not
/// a precise requirement.
const SKIP_BAND_PP: f64 = 15.0;

/// Joint search: refinement stops once a sample is within this many
/// percent points of the target.
const REFINE_TOLERANCE_PP: f64 = 1.0;

/// Joint search: probe thresholds sit at these fractions of the metric's
/// range, and refinement walks in steps of the smaller fraction.
const PROBE_FRACTIONS: [f64; 2] = [0.1, 0.9];
const REFINE_STEP_FRACTION: f64 = 1.0 / 32.0;

/// Upper bound on refinement steps per block size.
const REFINE_STEP_LIMIT: u32 = 32;

/// Byte-size oracle for candidate images: the narrow contract with the
/// external image codec. Implementations encode the buffer in whatever
/// format the caller cares about and report the resulting byte length.
pub trait SizeProbe {
    fn encoded_len(&mut self, image: &PixelBuffer) -> io::Result<u64>;
}

impl<F> SizeProbe for F
where
    F: FnMut(&PixelBuffer) -> io::Result<u64>,
{
    fn encoded_len(&mut self, image: &PixelBuffer) -> io::Result<u64> {
        self(image)
    }
}

/// A rejected configuration, caught before any build starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("threshold {value} is outside the {metric} range; valid values are 0 to {max}")]
    ThresholdOutOfRange {
        metric: &'static str,
        value: f64,
        max: f64,
    },

    #[error("minimum block size must be between 1 and {max} pixels, got {value}")]
    InvalidMinBlockSize { value: u64, max: u64 },

    #[error("target compression ratio must be strictly between 0 and 1, got {value}")]
    TargetOutOfRange { value: f64 },

    #[error("image must have a nonzero width and height")]
    EmptyImage,
}

/// Failure of a target-ratio search. Missing the target is NOT a failure;
/// only bad configuration or a broken codec collaborator is.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("size probe failed: {0}")]
    Probe(#[from] io::Error),
}

/// Result record of a target-ratio search: the closest-achieved image and
/// the numbers a caller needs to judge how close it got.
#[derive(Debug)]
pub struct CompressionOutcome {
    /// The painted image of the best candidate.
    pub image: PixelBuffer,

    /// Threshold of the best candidate.
    pub threshold: f64,

    /// Minimum block area of the best candidate. Always the caller's own
    /// value for bisection; chosen by the search in joint mode.
    pub min_block_area: u64,

    /// Achieved compression in percent removed, `(1 − c/o)·100`. Compare
    /// against the requested target to detect a missed target.
    pub achieved_percent: f64,

    pub original_bytes: u64,
    pub compressed_bytes: u64,

    /// Stats of the best candidate's tree.
    pub node_count: u64,
    pub max_depth: u32,

    /// Build-and-measure cycles the search spent.
    pub builds: u32,

    pub elapsed: Duration,
}

pub fn validate_threshold(metric: ErrorMetric, threshold: f64) -> Result<(), ConfigError> {
    let max = metric.max_threshold();
    if !threshold.is_finite() || threshold < 0.0 || threshold > max {
        return Err(ConfigError::ThresholdOutOfRange {
            metric: metric.name(),
            value: threshold,
            max,
        });
    }
    Ok(())
}

pub fn validate_min_block_area(value: u64, image_area: u64) -> Result<(), ConfigError> {
    if value < 1 || value > image_area {
        return Err(ConfigError::InvalidMinBlockSize {
            value,
            max: image_area,
        });
    }
    Ok(())
}

pub fn validate_target(target: f64) -> Result<(), ConfigError> {
    if !target.is_finite() || target <= 0.0 || target >= 1.0 {
        return Err(ConfigError::TargetOutOfRange { value: target });
    }
    Ok(())
}

fn validate_image(image: &PixelBuffer) -> Result<(), ConfigError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ConfigError::EmptyImage);
    }
    Ok(())
}

/// Mode A: one validated build at a caller-chosen threshold. No search, no
/// byte measurement; callers that want the size report run their own probe
/// over [`Quadtree::image`].
pub fn compress_fixed(
    image: &PixelBuffer,
    params: &BuildParams,
) -> Result<Quadtree, ConfigError> {
    validate_image(image)?;
    validate_threshold(params.metric, params.threshold)?;
    validate_min_block_area(params.min_block_area, image.area())?;

    Ok(Quadtree::build(image.clone(), params))
}

/// Mode B: search for parameters whose encoded output removes `target`
/// (a fraction in `(0, 1)`) of the original encoded size.
///
/// Dispatches to threshold bisection, except for SSIM which uses the
/// joint block-size/threshold search ([`compress_to_target_joint`]).
/// Always returns the closest candidate found, even when the exact target
/// is unreachable for the metric; inspect
/// [`CompressionOutcome::achieved_percent`] to detect a miss.
pub fn compress_to_target<P: SizeProbe>(
    image: &PixelBuffer,
    metric: ErrorMetric,
    min_block_area: u64,
    target: f64,
    probe: &mut P,
) -> Result<CompressionOutcome, SearchError> {
    if metric == ErrorMetric::Ssim {
        return compress_to_target_joint(image, metric, target, probe);
    }

    validate_image(image)?;
    validate_min_block_area(min_block_area, image.area())?;
    validate_target(target)?;

    bisect_threshold(image, metric, min_block_area, target * 100.0, probe)
}

/// Best candidate seen so far across a search, kept one at a time so a
/// long search never holds more than a single built image.
struct BestCandidate {
    distance: f64,
    achieved_percent: f64,
    threshold: f64,
    min_block_area: u64,
    image: PixelBuffer,
    compressed_bytes: u64,
    node_count: u64,
    max_depth: u32,
}

impl BestCandidate {
    fn consider(
        slot: &mut Option<BestCandidate>,
        tree: Quadtree,
        threshold: f64,
        min_block_area: u64,
        compressed_bytes: u64,
        achieved_percent: f64,
        distance: f64,
    ) {
        if slot.as_ref().is_none_or(|best| distance < best.distance) {
            *slot = Some(BestCandidate {
                distance,
                achieved_percent,
                threshold,
                min_block_area,
                node_count: tree.node_count(),
                max_depth: tree.max_depth(),
                image: tree.into_image(),
                compressed_bytes,
            });
        }
    }

    fn into_outcome(self, original_bytes: u64, builds: u32, elapsed: Duration) -> CompressionOutcome {
        CompressionOutcome {
            achieved_percent: self.achieved_percent,
            image: self.image,
            threshold: self.threshold,
            min_block_area: self.min_block_area,
            original_bytes,
            compressed_bytes: self.compressed_bytes,
            node_count: self.node_count,
            max_depth: self.max_depth,
            builds,
            elapsed,
        }
    }
}

/// Binary search on threshold over `[0, metric.max_threshold()]`.
///
/// Each cycle builds a tree at the midpoint, encodes it through the probe
/// and compares the removed percentage against the target: too little
/// compression raises the floor (permitting coarser blocks), too much
/// lowers the ceiling. Terminates when the bounds meet or when the
/// measured value plateaus on target; bounded by
/// `log2(range / tolerance)` cycles either way.
fn bisect_threshold<P: SizeProbe>(
    image: &PixelBuffer,
    metric: ErrorMetric,
    min_block_area: u64,
    target_percent: f64,
    probe: &mut P,
) -> Result<CompressionOutcome, SearchError> {
    let started = Instant::now();
    let original_bytes = probe.encoded_len(image)?;
    let percent_removed =
        |compressed: u64| (1.0 - compressed as f64 / original_bytes as f64) * 100.0;

    let mut low = 0.0f64;
    let mut high = metric.max_threshold();
    let mut best: Option<BestCandidate> = None;
    let mut previous_reading = f64::NAN;
    let mut plateau = 0u32;
    let mut builds = 0u32;

    loop {
        let mid = (low + high) / 2.0;
        let params = BuildParams {
            metric,
            threshold: mid,
            min_block_area,
            max_depth: None,
        };

        let tree = Quadtree::build(image.clone(), &params);
        let compressed = probe.encoded_len(tree.image())?;
        builds += 1;

        let achieved = percent_removed(compressed);
        let distance = (achieved - target_percent).abs();
        debug!(
            "bisect {}: threshold {mid:.4} -> {compressed} bytes, {achieved:.2}% removed",
            metric.name()
        );

        if achieved == previous_reading {
            plateau += 1;
        } else {
            plateau = 0;
        }
        previous_reading = achieved;

        BestCandidate::consider(&mut best, tree, mid, min_block_area, compressed, achieved, distance);

        if achieved < target_percent {
            low = mid;
        } else {
            high = mid;
        }

        let plateaued = plateau >= PLATEAU_LIMIT && distance <= BISECT_TOLERANCE;
        if high - low <= BISECT_TOLERANCE || plateaued {
            break;
        }
    }

    // The loop always runs at least once, so a best candidate exists.
    let best = best.expect("bisection performed no builds");
    Ok(best.into_outcome(original_bytes, builds, started.elapsed()))
}

/// Candidate minimum block sides for the joint search: a descending
/// power-of-4 ladder from the largest power of 8 not exceeding the short
/// image dimension, down to a floor of 4.
fn block_side_ladder(min_dimension: u32) -> Vec<u32> {
    let mut side = 1u32;
    while side * 8 <= min_dimension {
        side *= 8;
    }
    side = side.max(4);

    let mut ladder = Vec::new();
    while side >= 4 {
        ladder.push(side);
        side /= 4;
    }
    ladder
}

/// The two-parameter search: block size and threshold together.
///
/// For each candidate block side the metric range is probed at two
/// endpoint thresholds; a side whose better probe misses the target by
/// more than the skip band is discarded wholesale, otherwise a fixed-step
/// walk refines the threshold toward the target. The globally closest
/// sample wins — best effort, never a hard failure.
pub fn compress_to_target_joint<P: SizeProbe>(
    image: &PixelBuffer,
    metric: ErrorMetric,
    target: f64,
    probe: &mut P,
) -> Result<CompressionOutcome, SearchError> {
    validate_image(image)?;
    validate_target(target)?;

    let started = Instant::now();
    let target_percent = target * 100.0;
    let original_bytes = probe.encoded_len(image)?;
    let percent_removed =
        |compressed: u64| (1.0 - compressed as f64 / original_bytes as f64) * 100.0;

    let range = metric.max_threshold();
    let step = range * REFINE_STEP_FRACTION;
    let image_area = image.area();

    let mut best: Option<BestCandidate> = None;
    let mut builds = 0u32;

    let sample = |threshold: f64,
                  min_block_area: u64,
                  best: &mut Option<BestCandidate>,
                  builds: &mut u32,
                  probe: &mut P|
     -> io::Result<f64> {
        let params = BuildParams {
            metric,
            threshold,
            min_block_area,
            max_depth: None,
        };
        let tree = Quadtree::build(image.clone(), &params);
        let compressed = probe.encoded_len(tree.image())?;
        *builds += 1;

        let achieved = percent_removed(compressed);
        let distance = (achieved - target_percent).abs();
        debug!(
            "joint {}: block area {min_block_area}, threshold {threshold:.4} -> {achieved:.2}% removed",
            metric.name()
        );

        BestCandidate::consider(best, tree, threshold, min_block_area, compressed, achieved, distance);
        Ok(achieved)
    };

    'sides: for side in block_side_ladder(image.width().min(image.height())) {
        // A block floor larger than the image makes every build identical
        // to the next smaller rung; skip it.
        let min_block_area = (side as u64 * side as u64).min(image_area);

        let mut nearest: Option<(f64, f64)> = None; // (distance, threshold)
        for fraction in PROBE_FRACTIONS {
            let threshold = range * fraction;
            let achieved = sample(threshold, min_block_area, &mut best, &mut builds, probe)?;
            let distance = (achieved - target_percent).abs();
            if nearest.is_none_or(|(d, _)| distance < d) {
                nearest = Some((distance, threshold));
            }
        }

        let (probe_distance, probe_threshold) = nearest.unwrap();
        if probe_distance > SKIP_BAND_PP {
            continue;
        }

        // Inside the band: walk the threshold toward the target in fixed
        // steps, re-choosing the direction from each fresh reading.
        let mut threshold = probe_threshold;
        for _ in 0..REFINE_STEP_LIMIT {
            if best.as_ref().is_some_and(|b| b.distance <= REFINE_TOLERANCE_PP) {
                break 'sides;
            }

            let achieved = sample(threshold, min_block_area, &mut best, &mut builds, probe)?;
            threshold = if achieved < target_percent {
                threshold + step
            } else {
                threshold - step
            };

            if threshold < 0.0 || threshold > range {
                break; // probe range exhausted for this block size
            }
        }
    }

    let best = best.expect("joint search performed no builds");
    Ok(best.into_outcome(original_bytes, builds, started.elapsed()))
}
