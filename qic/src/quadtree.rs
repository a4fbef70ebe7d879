//! The recursive partitioner: builds a tree of blocks over a pixel buffer,
//! stopping wherever the error metric says a block is homogeneous enough,
//! then paints every leaf's average color back over its rectangle.

use crate::buffer::{Pixel, PixelBuffer, Region};
use crate::metric::ErrorMetric;

/// Stopping policy for a single build.
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    /// The homogeneity score used for the split decision.
    pub metric: ErrorMetric,

    /// Blocks scoring at or below this stop splitting.
    pub threshold: f64,

    /// Blocks with fewer pixels than this are never split.
    pub min_block_area: u64,

    /// Optional hard recursion cap. `None` (the default) lets the error
    /// test and block size drive the depth alone.
    pub max_depth: Option<u32>,
}

impl BuildParams {
    /// Parameters with a minimum block of one pixel and no depth cap.
    pub fn new(metric: ErrorMetric, threshold: f64) -> Self {
        BuildParams {
            metric,
            threshold,
            min_block_area: 1,
            max_depth: None,
        }
    }
}

/// One node of a built tree.
///
/// A node either has no children (a leaf, rendered as one flat color) or
/// exactly four, which tile its region per [`Region::split`]. Nodes are
/// immutable once the build pass returns; a new target needs a new tree.
#[derive(Debug, Clone)]
pub struct QuadNode {
    /// The rectangle this node covers.
    pub region: Region,

    /// Distance from the root, which sits at 0.
    pub depth: u32,

    /// Integer-truncated per-channel mean over the region.
    pub color: Pixel,

    /// The metric's score for the region.
    pub error: f64,

    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Children in top-left, top-right, bottom-left, bottom-right order,
    /// or `None` for a leaf.
    pub fn children(&self) -> Option<&[QuadNode; 4]> {
        self.children.as_deref()
    }
}

/// Running totals accumulated during the single build pass.
struct BuildStats {
    nodes: u64,
    max_depth: u32,
}

/// A fully built quadtree plus the working buffer its leaves were painted
/// into.
///
/// Building consumes the buffer it is given; callers that want to keep
/// their original image pass a clone.
#[derive(Debug, Clone)]
pub struct Quadtree {
    root: QuadNode,
    image: PixelBuffer,
    node_count: u64,
    max_depth: u32,
}

impl Quadtree {
    /// Decompose `buffer` top-down and paint the leaf colors back into it.
    ///
    /// Child order is fixed, so identical inputs always produce identical
    /// trees. The build never touches anything but its own `buffer`.
    pub fn build(buffer: PixelBuffer, params: &BuildParams) -> Quadtree {
        let mut stats = BuildStats { nodes: 0, max_depth: 0 };
        let root = build_node(&buffer, buffer.bounds(), 0, params, &mut stats);

        let mut image = buffer;
        paint_leaves(&root, &mut image);

        Quadtree {
            root,
            image,
            node_count: stats.nodes,
            max_depth: stats.max_depth,
        }
    }

    pub fn root(&self) -> &QuadNode {
        &self.root
    }

    /// The painted (compressed-preview) image.
    pub fn image(&self) -> &PixelBuffer {
        &self.image
    }

    pub fn into_image(self) -> PixelBuffer {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Total number of nodes, leaves included.
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Deepest level reached, with the root at 0.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn leaf_count(&self) -> u64 {
        fn count(node: &QuadNode) -> u64 {
            match node.children() {
                None => 1,
                Some(children) => children.iter().map(count).sum(),
            }
        }
        count(&self.root)
    }

    /// Paint into a fresh buffer, treating every node at `depth` as a
    /// leaf. `render_at_depth(max_depth)` reproduces [`Self::image`];
    /// shallower depths give the progressively coarser frames used for
    /// visualization.
    pub fn render_at_depth(&self, depth: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(self.image.width(), self.image.height());
        paint_to_depth(&self.root, &mut out, depth);
        out
    }
}

fn build_node(
    buffer: &PixelBuffer,
    region: Region,
    depth: u32,
    params: &BuildParams,
    stats: &mut BuildStats,
) -> QuadNode {
    stats.nodes += 1;
    stats.max_depth = stats.max_depth.max(depth);

    let color = buffer.average_color(region);
    let error = params.metric.evaluate(buffer, region);

    let stop = region.area() < params.min_block_area
        || error <= params.threshold
        || params.max_depth.is_some_and(|cap| depth >= cap);

    let children = if stop {
        None
    } else {
        let quadrants = region.split();
        Some(Box::new(
            quadrants.map(|q| build_node(buffer, q, depth + 1, params, stats)),
        ))
    };

    QuadNode {
        region,
        depth,
        color,
        error,
        children,
    }
}

fn paint_leaves(node: &QuadNode, image: &mut PixelBuffer) {
    match node.children() {
        None => image.fill_region(node.region, node.color),
        Some(children) => {
            for child in children.iter() {
                paint_leaves(child, image);
            }
        }
    }
}

fn paint_to_depth(node: &QuadNode, image: &mut PixelBuffer, depth_cap: u32) {
    match node.children() {
        Some(children) if node.depth < depth_cap => {
            for child in children.iter() {
                paint_to_depth(child, image, depth_cap);
            }
        }
        _ => image.fill_region(node.region, node.color),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(threshold: f64) -> BuildParams {
        BuildParams::new(ErrorMetric::Variance, threshold)
    }

    /// Deterministic speckle pattern with plenty of local contrast.
    fn noisy(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        let mut state = 0x2545_F491u32;
        for y in 0..h {
            for x in 0..w {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                buf.set(x, y, Pixel::from_u32(state >> 8));
            }
        }
        buf
    }

    /// Every leaf must cover every one of its pixels exactly once.
    fn assert_tiling(tree: &Quadtree) {
        let mut covered =
            vec![0u32; tree.width() as usize * tree.height() as usize];

        fn visit(node: &QuadNode, covered: &mut [u32], width: u32) {
            match node.children() {
                Some(children) => {
                    for child in children.iter() {
                        visit(child, covered, width);
                    }
                }
                None => {
                    let r = node.region;
                    for y in r.y..r.y + r.h {
                        for x in r.x..r.x + r.w {
                            covered[(y * width + x) as usize] += 1;
                        }
                    }
                }
            }
        }

        visit(tree.root(), &mut covered, tree.width());
        assert!(
            covered.iter().all(|&c| c == 1),
            "leaf rectangles must tile the image exactly once"
        );
    }

    #[test]
    fn leaves_tile_exactly_for_all_parities() {
        for (w, h) in [(16, 16), (15, 16), (16, 15), (13, 9), (1, 7), (5, 1)] {
            let tree = Quadtree::build(noisy(w, h), &params(0.0));
            assert_tiling(&tree);
        }
    }

    #[test]
    fn uniform_image_is_a_single_node() {
        let buf = PixelBuffer::filled(4, 4, Pixel::new(255, 0, 0));
        let tree = Quadtree::build(buf.clone(), &params(0.0));

        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.max_depth(), 0);
        assert!(tree.root().is_leaf());
        assert_eq!(*tree.image(), buf);
    }

    #[test]
    fn split_image_refines_only_across_the_boundary() {
        // Left half black, right half white. The first split yields four
        // monochrome quadrants, each a zero-error leaf.
        let mut buf = PixelBuffer::new(8, 8);
        for y in 0..8 {
            for x in 4..8 {
                buf.set(x, y, Pixel::WHITE);
            }
        }

        let tree = Quadtree::build(buf.clone(), &params(0.0));

        assert!(!tree.root().is_leaf());
        let children = tree.root().children().unwrap();
        for child in children.iter() {
            assert!(child.is_leaf());
            assert!(child.error.abs() < 1e-9);
        }
        // Lossless at threshold 0: the painted image equals the input.
        assert_eq!(*tree.image(), buf);
    }

    #[test]
    fn raising_the_threshold_never_adds_nodes() {
        let buf = noisy(32, 32);
        let mut previous = u64::MAX;
        for threshold in [0.0, 50.0, 200.0, 1000.0, 5000.0, 16_256.25] {
            let tree = Quadtree::build(buf.clone(), &params(threshold));
            assert!(
                tree.node_count() <= previous,
                "node count rose from {previous} to {} at threshold {threshold}",
                tree.node_count()
            );
            previous = tree.node_count();
        }
    }

    #[test]
    fn min_block_area_stops_splitting() {
        let buf = noisy(16, 16);
        let mut coarse = params(0.0);
        coarse.min_block_area = 64; // blocks below 8×8 never split

        let tree = Quadtree::build(buf, &coarse);
        assert!(tree.max_depth() <= 2);
    }

    #[test]
    fn depth_cap_is_honored_when_set() {
        let buf = noisy(64, 64);
        let mut capped = params(0.0);
        capped.max_depth = Some(3);

        let tree = Quadtree::build(buf.clone(), &capped);
        assert_eq!(tree.max_depth(), 3);

        // Without the cap the same image keeps splitting deeper.
        let free = Quadtree::build(buf, &params(0.0));
        assert!(free.max_depth() > 3);
    }

    #[test]
    fn identical_inputs_build_identical_trees() {
        let buf = noisy(24, 24);
        let a = Quadtree::build(buf.clone(), &params(120.0));
        let b = Quadtree::build(buf, &params(120.0));

        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.max_depth(), b.max_depth());
        assert_eq!(*a.image(), *b.image());
    }

    #[test]
    fn repainting_is_idempotent() {
        let tree = Quadtree::build(noisy(20, 14), &params(300.0));
        let once = tree.render_at_depth(tree.max_depth());
        let twice = tree.render_at_depth(tree.max_depth());

        assert_eq!(once, twice);
        assert_eq!(once, *tree.image());
    }

    #[test]
    fn depth_zero_render_is_one_flat_block() {
        let tree = Quadtree::build(noisy(16, 16), &params(0.0));
        let frame = tree.render_at_depth(0);

        let root_color = tree.root().color;
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(frame.get(x, y), root_color);
            }
        }
    }
}
