//! Motion-JPEG frame splitting for the media feed.
//!
//! The backend serves `multipart/x-mixed-replace` parts, each holding one
//! JPEG. Part headers are skipped by scanning for JPEG SOI/EOI markers
//! instead of parsing the multipart boundary.

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use image::{GenericImageView, RgbaImage};

/// Largest single frame accepted; a part growing past this is dropped.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub struct MjpegReader<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    chunk: Box<[u8]>,
    /// Offset of the SOI of the frame being collected.
    frame_start: Option<usize>,
    /// Everything before this offset has already been searched.
    scanned: usize,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            frame_start: None,
            scanned: 0,
        }
    }

    /// Next complete JPEG, or `Ok(None)` when the stream ends cleanly.
    pub fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(end) = self.scan() {
                let start = self.frame_start.take().unwrap_or(0);
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                self.scanned = 0;
                return Ok(Some(frame));
            }
            self.discard_overflow();

            let read = self
                .reader
                .read(&mut self.chunk)
                .context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&self.chunk[..read]);
        }
    }

    /// Bounds the buffer once it has been fully scanned: bytes before an SOI
    /// are noise, and a frame past `MAX_JPEG_BYTES` is abandoned.
    fn discard_overflow(&mut self) {
        let overflow = match self.frame_start {
            None => self.buffer.len() > READ_CHUNK,
            Some(start) => self.buffer.len() - start > MAX_JPEG_BYTES,
        };
        if !overflow {
            return;
        }
        if self.frame_start.take().is_some() {
            log::warn!("dropping mjpeg frame larger than {} bytes", MAX_JPEG_BYTES);
        }
        // Keep the tail; it may hold the first half of a marker.
        let keep = 2.min(self.buffer.len());
        let drain_len = self.buffer.len() - keep;
        self.buffer.drain(..drain_len);
        self.scanned = 0;
    }

    /// Searches only bytes appended since the last call. Returns the end of
    /// a complete frame once its EOI is seen.
    fn scan(&mut self) -> Option<usize> {
        loop {
            let (marker, from) = match self.frame_start {
                None => (SOI, self.scanned),
                Some(start) => (EOI, self.scanned.max(start + 2)),
            };
            let Some(at) = find_marker(&self.buffer[from.min(self.buffer.len())..], marker) else {
                // A marker may straddle the end of the buffer.
                self.scanned = self.buffer.len().saturating_sub(1).max(from);
                return None;
            };
            let at = from + at;
            match self.frame_start {
                None => {
                    self.frame_start = Some(at);
                    self.scanned = at + 2;
                }
                Some(_) => return Some(at + 2),
            }
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Decoded media frame.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub image: RgbaImage,
    pub width: u32,
    pub height: u32,
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<DecodedFrame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("decoded jpeg has zero size"));
    }
    Ok(DecodedFrame {
        image: image.into_rgba8(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(jpeg);
        body.extend_from_slice(b"\r\n");
        body
    }

    #[test]
    fn splits_multipart_parts_into_jpegs() {
        let a = tiny_jpeg(8, 4);
        let b = tiny_jpeg(16, 16);
        let mut stream = part(&a);
        stream.extend(part(&b));

        let mut reader = MjpegReader::new(Cursor::new(stream));
        let first = reader.next_jpeg().unwrap().unwrap();
        let second = reader.next_jpeg().unwrap().unwrap();
        assert!(reader.next_jpeg().unwrap().is_none());

        let decoded = decode_jpeg(&first).unwrap();
        assert_eq!((decoded.width, decoded.height), (8, 4));
        assert_eq!(decode_jpeg(&second).unwrap().width, 16);
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.step);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn frame_needs_both_markers() {
        let mut reader = MjpegReader::new(Cursor::new(vec![0x00, 0xFF, 0xD8, 0x01]));
        assert!(reader.next_jpeg().unwrap().is_none());

        let mut reader =
            MjpegReader::new(Cursor::new(vec![0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0x07]));
        assert_eq!(
            reader.next_jpeg().unwrap(),
            Some(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9])
        );
    }

    #[test]
    fn markers_split_across_reads_are_found() {
        let jpeg = tiny_jpeg(8, 8);
        let mut stream = part(&jpeg);
        stream.extend(part(&jpeg));
        for step in [1, 2, 3, 7] {
            let mut reader = MjpegReader::new(Trickle {
                data: Cursor::new(stream.clone()),
                step,
            });
            assert_eq!(reader.next_jpeg().unwrap().as_deref(), Some(&jpeg[..]), "step {}", step);
            assert_eq!(reader.next_jpeg().unwrap().as_deref(), Some(&jpeg[..]), "step {}", step);
            assert!(reader.next_jpeg().unwrap().is_none());
        }
    }

    #[test]
    fn oversized_frame_is_dropped_and_stream_recovers() {
        let jpeg = tiny_jpeg(8, 8);
        let mut stream = vec![0xFF, 0xD8];
        stream.resize(MAX_JPEG_BYTES + 2 * READ_CHUNK, 0x11);
        stream.extend(part(&jpeg));

        let mut reader = MjpegReader::new(Cursor::new(stream));
        assert_eq!(reader.next_jpeg().unwrap().as_deref(), Some(&jpeg[..]));
    }
}
