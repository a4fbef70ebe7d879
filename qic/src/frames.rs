//! Progressive-refinement frame sampling for visualization exporters.
//!
//! A built tree is walked at a bounded set of depths to produce a short
//! sequence of renderings, from the untouched original down to the final
//! compressed image. How the frames are containerized (GIF or otherwise)
//! and the per-frame delay are the consumer's concern.

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::buffer::PixelBuffer;
use crate::quadtree::Quadtree;

/// Default cap on the number of frames, deep trees included.
pub const DEFAULT_FRAME_CAP: usize = 15;

/// The depths to render: `min(max_depth + 1, cap)` frames spread evenly
/// across `[0, max_depth]`, excluding the slot reserved for the original
/// image. Empty when a single frame (the original) is all the cap allows.
pub fn frame_depths(max_depth: u32, cap: usize) -> Vec<u32> {
    let count = (max_depth as usize + 1).min(cap.max(1));
    if count <= 1 {
        return Vec::new();
    }

    let step = max_depth as f64 / (count - 1) as f64;
    (1..count)
        .map(|i| (i as f64 * step).round() as u32)
        .collect()
}

/// Render the frame sequence: the original image first, then one frame
/// per sampled depth, ending on the fully refined render.
///
/// Depth renders are independent read-only walks over the tree, so they
/// run in parallel.
pub fn sample_frames(tree: &Quadtree, original: &PixelBuffer, cap: usize) -> Vec<PixelBuffer> {
    let depths = frame_depths(tree.max_depth(), cap);

    let mut frames = Vec::with_capacity(depths.len() + 1);
    frames.push(original.clone());
    frames.extend(
        depths
            .into_par_iter()
            .map(|depth| tree.render_at_depth(depth))
            .collect::<Vec<_>>(),
    );
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Pixel;
    use crate::metric::ErrorMetric;
    use crate::quadtree::BuildParams;

    fn speckle(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        let mut state = 0xB529_7A4Du32;
        for y in 0..h {
            for x in 0..w {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                buf.set(x, y, Pixel::from_u32(state >> 8));
            }
        }
        buf
    }

    #[test]
    fn shallow_trees_get_one_frame_per_depth() {
        assert_eq!(frame_depths(0, 15), Vec::<u32>::new());
        assert_eq!(frame_depths(3, 15), vec![1, 2, 3]);
    }

    #[test]
    fn deep_trees_are_capped_and_evenly_spaced() {
        let depths = frame_depths(28, 15);
        assert_eq!(depths.len(), 14);
        assert_eq!(*depths.last().unwrap(), 28);
        // Round-to-nearest over an even step never repeats a depth.
        let mut sorted = depths.clone();
        sorted.dedup();
        assert_eq!(sorted, depths);
    }

    #[test]
    fn sequence_starts_at_the_original_and_ends_fully_refined() {
        let original = speckle(32, 32);
        let params = BuildParams::new(ErrorMetric::Variance, 0.0);
        let tree = Quadtree::build(original.clone(), &params);

        let frames = sample_frames(&tree, &original, DEFAULT_FRAME_CAP);

        assert!(frames.len() <= DEFAULT_FRAME_CAP + 1);
        assert_eq!(frames[0], original);
        assert_eq!(*frames.last().unwrap(), *tree.image());
    }

    #[test]
    fn frame_count_follows_the_tree_depth() {
        let original = speckle(64, 64);
        let params = BuildParams::new(ErrorMetric::Variance, 0.0);
        let tree = Quadtree::build(original.clone(), &params);

        let frames = sample_frames(&tree, &original, DEFAULT_FRAME_CAP);

        // One frame for the original plus one per sampled depth.
        let expected = (tree.max_depth() as usize + 1).min(DEFAULT_FRAME_CAP);
        assert_eq!(frames.len(), expected);
        for frame in &frames {
            assert_eq!(frame.width(), original.width());
            assert_eq!(frame.height(), original.height());
        }
    }
}
