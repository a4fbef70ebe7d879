//! The compact on-wire form of a built quadtree.
//!
//! Layout: an 8-byte magic, the image dimensions as little-endian `u32`s,
//! a varint node count, then the preorder node stream packed to the bit —
//! one leaf flag per node, 24 bits of packed color per leaf. Branch
//! geometry is never stored: decoding re-derives every region from the
//! root dimensions and the quadrant tiling rule, so a decoder can only
//! ever paint rectangles the encoder's tree actually had.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use integer_encoding::{VarIntReader, VarIntWriter};
use thiserror::Error;

use crate::binio::{BitReader, BitWriter};
use crate::buffer::{Pixel, PixelBuffer, Region};
use crate::quadtree::{QuadNode, Quadtree};

/// Identifier at the start of every container.
pub const MAGIC: [u8; 8] = *b"qicquadt";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("incorrect identifier, got {0:?}")]
    InvalidIdentifier([u8; 8]),

    #[error("node stream ended before the tree was complete")]
    Truncated,

    #[error("node stream disagrees with the declared count of {declared} nodes")]
    NodeCountMismatch { declared: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encode a built tree into anything that implements [`Write`].
pub fn write_image<W: Write + WriteBytesExt>(tree: &Quadtree, output: &mut W) -> io::Result<()> {
    output.write_all(&MAGIC)?;
    output.write_u32::<LE>(tree.width())?;
    output.write_u32::<LE>(tree.height())?;
    output.write_varint(tree.node_count())?;

    let mut bits = BitWriter::new();
    encode_node(tree.root(), &mut bits);
    let payload = bits.finish();

    output.write_varint(payload.len() as u64)?;
    output.write_all(&payload)?;
    Ok(())
}

fn encode_node(node: &QuadNode, bits: &mut BitWriter) {
    match node.children() {
        None => {
            bits.push_bit(true);
            bits.push_bits(node.color.to_u32(), 24);
        }
        Some(children) => {
            bits.push_bit(false);
            for child in children.iter() {
                encode_node(child, bits);
            }
        }
    }
}

/// Decode a container from anything that implements [`Read`] and render
/// it to a pixel buffer.
pub fn read_image<R: Read + ReadBytesExt>(input: &mut R) -> Result<PixelBuffer, DecodeError> {
    let mut magic = [0u8; 8];
    input.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidIdentifier(magic));
    }

    let width = input.read_u32::<LE>()?;
    let height = input.read_u32::<LE>()?;
    let declared: u64 = input.read_varint()?;
    let payload_len: u64 = input.read_varint()?;

    let mut payload = vec![0u8; payload_len as usize];
    input.read_exact(&mut payload)?;

    let mut image = PixelBuffer::new(width, height);
    let mut bits = BitReader::new(&payload);
    let mut decoded = 0u64;
    decode_node(
        &mut bits,
        Region::new(0, 0, width, height),
        &mut image,
        declared,
        &mut decoded,
    )?;

    if decoded != declared {
        return Err(DecodeError::NodeCountMismatch { declared });
    }

    Ok(image)
}

fn decode_node(
    bits: &mut BitReader<'_>,
    region: Region,
    image: &mut PixelBuffer,
    declared: u64,
    decoded: &mut u64,
) -> Result<(), DecodeError> {
    if *decoded == declared {
        return Err(DecodeError::NodeCountMismatch { declared });
    }
    *decoded += 1;

    let leaf = bits.read_bit().ok_or(DecodeError::Truncated)?;
    if leaf {
        let packed = bits.read_bits(24).ok_or(DecodeError::Truncated)?;
        image.fill_region(region, Pixel::from_u32(packed));
    } else {
        for quadrant in region.split() {
            decode_node(bits, quadrant, image, declared, decoded)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::ErrorMetric;
    use crate::quadtree::BuildParams;

    fn sample_tree() -> Quadtree {
        let mut buf = PixelBuffer::new(13, 9);
        let mut state = 0x0DDB_A11Du32;
        for y in 0..9 {
            for x in 0..13 {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                buf.set(x, y, Pixel::from_u32(state >> 8));
            }
        }
        Quadtree::build(buf, &BuildParams::new(ErrorMetric::Variance, 800.0))
    }

    #[test]
    fn round_trip_reproduces_the_painted_image() {
        let tree = sample_tree();
        let mut bytes = Vec::new();
        write_image(&tree, &mut bytes).unwrap();

        let decoded = read_image(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, *tree.image());
    }

    #[test]
    fn container_stays_compact() {
        let tree = sample_tree();
        let mut bytes = Vec::new();
        write_image(&tree, &mut bytes).unwrap();

        // Header plus about 25 bits per leaf and 1 per branch.
        let ceiling = 24 + tree.node_count() * 4;
        assert!(
            (bytes.len() as u64) < ceiling,
            "{} bytes for {} nodes",
            bytes.len(),
            tree.node_count()
        );
    }

    #[test]
    fn rejects_a_wrong_identifier() {
        let mut bytes = Vec::new();
        write_image(&sample_tree(), &mut bytes).unwrap();
        bytes[..8].copy_from_slice(b"notaquad");

        assert!(matches!(
            read_image(&mut bytes.as_slice()),
            Err(DecodeError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_a_truncated_node_stream() {
        // Root branch flag, one leaf flag, then the stream runs out in the
        // middle of the leaf's 24 color bits.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.push(5); // varint node count: 5
        bytes.push(1); // varint payload length: 1
        bytes.push(0b0000_0010);

        assert!(matches!(
            read_image(&mut bytes.as_slice()),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn rejects_a_lying_node_count() {
        // A single declared node whose flag says "branch" forces the
        // decoder past the declared count immediately.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.push(1); // varint node count: 1
        bytes.push(1); // varint payload length: 1
        bytes.push(0); // branch flag for the root

        assert!(matches!(
            read_image(&mut bytes.as_slice()),
            Err(DecodeError::NodeCountMismatch { declared: 1 })
        ));
    }
}
