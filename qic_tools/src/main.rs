mod utils;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageReader};
use qic::frames::DEFAULT_FRAME_CAP;
use qic::{
    compress_fixed, compress_to_target, container, sample_frames, BuildParams, ErrorMetric,
    PixelBuffer, Quadtree, SizeProbe,
};
use utils::{exists_decision, parse_metric, to_rgba_image, Assume, PngProbe};

/// Milliseconds each GIF frame stays on screen.
const GIF_FRAME_DELAY_MS: u32 = 500;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Subcommands,

    /// Overwrite output files without asking
    #[arg(short = 'y', long = "overwrite", conflicts_with = "assumeno")]
    assumeyes: bool,

    /// Never overwrite output files
    #[arg(short = 'n', long = "preserve", conflicts_with = "assumeyes")]
    assumeno: bool,
}

#[derive(Debug, Subcommand)]
enum Subcommands {
    /// Compress an image into a quadtree rendering
    Compress(CompressArgs),

    /// Decode a .qic container into another image format
    Decode(DecodeArgs),
}

#[derive(Debug, Args)]
struct CompressArgs {
    /// Input image file of any type supported by `image`
    input: PathBuf,

    /// Output path; `.qic` writes the compact container, any other
    /// extension is encoded through `image`
    output: PathBuf,

    /// Error metric driving the split decision
    ///
    /// Valid values:
    ///  - variance
    ///  - mad
    ///  - max-diff
    ///  - entropy
    ///  - ssim
    #[arg(short, long, default_value = "variance", value_parser = parse_metric, verbatim_doc_comment)]
    metric: ErrorMetric,

    /// Split threshold in the metric's own range; defaults to the
    /// metric's built-in value
    #[arg(short, long, conflicts_with = "target")]
    threshold: Option<f64>,

    /// Minimum block area in pixels; blocks smaller than this never split
    #[arg(short = 'b', long, default_value_t = 1)]
    min_block_size: u64,

    /// Hard recursion depth cap (unlimited unless given)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Target compression ratio in (0, 1); searches for parameters
    /// instead of using a fixed threshold
    #[arg(long)]
    target: Option<f64>,

    /// Also write a progressive-refinement GIF to this path
    #[arg(long)]
    gif: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DecodeArgs {
    /// Input .qic container
    input: PathBuf,

    /// Output image file
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let assume = if args.assumeyes {
        Some(Assume::Yes)
    } else if args.assumeno {
        Some(Assume::No)
    } else {
        None
    };

    match args.command {
        Subcommands::Compress(a) => compress(a, assume),
        Subcommands::Decode(a) => decode(a, assume),
    }
}

fn compress(args: CompressArgs, assume: Option<Assume>) -> Result<()> {
    if !args.input.try_exists()? {
        bail!("Input file {:?} does not exist", args.input);
    }

    if args.output.try_exists()? && !exists_decision("Output", "Overwrite", &args.output, assume) {
        return Ok(());
    }

    let image = ImageReader::open(&args.input)?.decode()?;
    let rgb = image.to_rgb8();
    let buffer = PixelBuffer::from_rgb8(rgb.width(), rgb.height(), rgb.as_raw());

    let mut probe = PngProbe;
    let started = Instant::now();

    // Target mode searches for the parameters; fixed mode builds once at
    // the caller's (or the metric's default) threshold. Either way the
    // tree at the winning parameters drives every export path.
    let (tree, report) = if let Some(target) = args.target {
        let outcome =
            compress_to_target(&buffer, args.metric, args.min_block_size, target, &mut probe)?;

        let params = BuildParams {
            metric: args.metric,
            threshold: outcome.threshold,
            min_block_area: outcome.min_block_area,
            max_depth: None,
        };
        let tree = compress_fixed(&buffer, &params)?;

        let report = Report {
            threshold: outcome.threshold,
            original_bytes: outcome.original_bytes,
            compressed_bytes: outcome.compressed_bytes,
            achieved_percent: outcome.achieved_percent,
            builds: outcome.builds,
        };
        (tree, report)
    } else {
        let params = BuildParams {
            metric: args.metric,
            threshold: args.threshold.unwrap_or_else(|| args.metric.default_threshold()),
            min_block_area: args.min_block_size,
            max_depth: args.max_depth,
        };
        let tree = compress_fixed(&buffer, &params)?;

        let original_bytes = probe.encoded_len(&buffer)?;
        let compressed_bytes = probe.encoded_len(tree.image())?;
        let report = Report {
            threshold: params.threshold,
            original_bytes,
            compressed_bytes,
            achieved_percent: (1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0,
            builds: 1,
        };
        (tree, report)
    };
    let elapsed = started.elapsed();

    write_output(&tree, &args.output)?;

    if let Some(gif_path) = &args.gif {
        if !gif_path.try_exists()? || exists_decision("GIF", "Overwrite", gif_path, assume) {
            write_gif(&tree, &buffer, gif_path)
                .with_context(|| format!("could not write GIF to {gif_path:?}"))?;
        }
    }

    println!("Execution time: {} ms", elapsed.as_millis());
    println!("Original size (PNG): {} bytes", report.original_bytes);
    println!("Compressed size (PNG): {} bytes", report.compressed_bytes);
    println!(
        "Compression: {:.2}% removed at {} threshold {:.4}",
        report.achieved_percent,
        args.metric,
        report.threshold
    );
    println!(
        "Tree: {} nodes, max depth {}, {} build(s)",
        tree.node_count(),
        tree.max_depth(),
        report.builds
    );
    println!("Output image saved at: {:?}", args.output);

    Ok(())
}

/// The numbers the summary block prints; formatting stays out of the
/// library.
struct Report {
    threshold: f64,
    original_bytes: u64,
    compressed_bytes: u64,
    achieved_percent: f64,
    builds: u32,
}

fn write_output(tree: &Quadtree, output: &Path) -> Result<()> {
    if output.extension().is_some_and(|e| e.eq_ignore_ascii_case("qic")) {
        let mut writer = BufWriter::new(File::create(output)?);
        container::write_image(tree, &mut writer)?;
    } else {
        image::save_buffer(
            output,
            &tree.image().to_rgb8(),
            tree.width(),
            tree.height(),
            image::ColorType::Rgb8,
        )?;
    }
    Ok(())
}

fn write_gif(tree: &Quadtree, original: &PixelBuffer, path: &Path) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = GifEncoder::new(file);
    encoder.set_repeat(Repeat::Infinite)?;

    for frame in sample_frames(tree, original, DEFAULT_FRAME_CAP) {
        let delay = Delay::from_numer_denom_ms(GIF_FRAME_DELAY_MS, 1);
        encoder.encode_frame(Frame::from_parts(to_rgba_image(&frame), 0, 0, delay))?;
    }

    Ok(())
}

fn decode(args: DecodeArgs, assume: Option<Assume>) -> Result<()> {
    if !args.input.try_exists()? {
        bail!("Input file {:?} does not exist", args.input);
    }

    if args.output.try_exists()? && !exists_decision("Output", "Overwrite", &args.output, assume) {
        return Ok(());
    }

    let mut reader = BufReader::new(File::open(&args.input)?);
    let image = container::read_image(&mut reader)
        .with_context(|| format!("could not decode {:?}", args.input))?;

    image::save_buffer(
        &args.output,
        &image.to_rgb8(),
        image.width(),
        image.height(),
        image::ColorType::Rgb8,
    )?;

    Ok(())
}
