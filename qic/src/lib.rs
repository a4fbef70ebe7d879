//! QIC (**Q**uadtree **I**mage **C**ompression) compresses a raster image
//! by recursively carving it into a quadtree of rectangular blocks and
//! painting every sufficiently homogeneous block with its average color.
//! Five interchangeable error metrics decide what "homogeneous enough"
//! means, and an empirical parameter search can adjust the threshold (and
//! block size) until the encoded output hits a target compression ratio.
//!
//! The crate is the engine only: it never touches files or picks an image
//! codec. Loading pictures, writing PNGs or GIFs and rendering progress
//! belong to a thin frontend such as the `qic_tools` binary; the engine
//! reaches the codec through the narrow [`SizeProbe`] contract when a
//! search needs byte measurements.
//!
//! # Example
//! ## Compressing with a fixed threshold
//! ```
//! use qic::{compress_fixed, BuildParams, ErrorMetric, Pixel, PixelBuffer};
//!
//! // A flat image collapses to a single root block.
//! let image = PixelBuffer::filled(16, 16, Pixel::new(200, 40, 40));
//! let params = BuildParams::new(ErrorMetric::Variance, 0.0);
//!
//! let tree = compress_fixed(&image, &params).expect("valid parameters");
//! assert_eq!(tree.node_count(), 1);
//! assert_eq!(*tree.image(), image);
//! ```
//!
//! ## Searching for a target compression ratio
//! ```
//! use qic::{compress_to_target, ErrorMetric, PixelBuffer};
//!
//! let image = PixelBuffer::new(32, 32);
//! // Any size oracle works; real callers encode through an image codec.
//! let mut probe = |img: &PixelBuffer| Ok(img.to_rgb8().len() as u64);
//!
//! let outcome =
//!     compress_to_target(&image, ErrorMetric::Variance, 1, 0.5, &mut probe)
//!         .expect("search always returns its best candidate");
//! println!("removed {:.1}% of the original bytes", outcome.achieved_percent);
//! ```

mod binio;

pub mod buffer;
pub mod container;
pub mod controller;
pub mod frames;
pub mod metric;
pub mod quadtree;

// ----------------------- //
// INLINED USEFUL FEATURES //
// ----------------------- //
#[doc(inline)]
pub use buffer::{Pixel, PixelBuffer, Region};

#[doc(inline)]
pub use metric::ErrorMetric;

#[doc(inline)]
pub use quadtree::{BuildParams, Quadtree};

#[doc(inline)]
pub use controller::{
    compress_fixed, compress_to_target, compress_to_target_joint, CompressionOutcome,
    SizeProbe,
};

#[doc(inline)]
pub use frames::sample_frames;
