use std::io;
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use qic::{ErrorMetric, PixelBuffer, SizeProbe};
use text_io::read;

#[derive(Clone, Copy)]
pub enum Assume {
    Yes,
    No,
}

pub fn parse_metric(s: &str) -> Result<ErrorMetric, String> {
    s.parse::<ErrorMetric>().map_err(|e| e.to_string())
}

/// The codec collaborator for target searches and size reports: encodes a
/// buffer as PNG in memory and reports the byte length.
pub struct PngProbe;

impl SizeProbe for PngProbe {
    fn encoded_len(&mut self, image: &PixelBuffer) -> io::Result<u64> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(
                &image.to_rgb8(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(io::Error::other)?;
        Ok(bytes.len() as u64)
    }
}

/// GIF frames want RGBA; pad the alpha channel to opaque.
pub fn to_rgba_image(buffer: &PixelBuffer) -> RgbaImage {
    let mut data = Vec::with_capacity(buffer.area() as usize * 4);
    for chunk in buffer.to_rgb8().chunks_exact(3) {
        data.extend_from_slice(chunk);
        data.push(0xFF);
    }
    RgbaImage::from_raw(buffer.width(), buffer.height(), data)
        .expect("RGBA data length always matches the buffer dimensions")
}

pub fn exists_decision<P: AsRef<Path>>(
    place: &str,
    action: &str,
    path: &P,
    assume: Option<Assume>,
) -> bool {
    let path = path.as_ref();

    match assume {
        Some(Assume::Yes) => return true,
        Some(Assume::No) => return false,
        None => (),
    }

    loop {
        print!("{place} file {path:?} already exists. {action}? [y/N] ");

        let opt: String = read!("{}\n");
        let opt = opt.to_lowercase();

        if opt.is_empty() || opt == "n" {
            return false;
        } else if opt == "y" {
            return true;
        }
    }
}
