//! HTTP camera source.
//!
//! A `multipart/x-mixed-replace` response is read as a live MJPEG stream. Any other
//! response marks the URL as a snapshot endpoint, fetched again for every frame.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use super::synthetic::FramePacer;
use super::CaptureDevice;
use crate::frame::RawImage;

/// Largest JPEG accepted from a camera.
pub const MAX_JPEG_BYTES: usize = 4 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub struct HttpCamera {
    url: String,
    agent: ureq::Agent,
    mode: Mode,
    pacer: FramePacer,
}

enum Mode {
    Stream(JpegScanner<Box<dyn Read + Send + Sync>>),
    Snapshot,
}

impl HttpCamera {
    /// Connect and decide between stream and snapshot mode from the content type.
    pub fn open(url: &str, target_fps: u32) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("connect to camera {}", url))?;
        let multipart = response
            .header("Content-Type")
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/"));
        let mode = if multipart {
            Mode::Stream(JpegScanner::new(response.into_reader()))
        } else {
            Mode::Snapshot
        };
        log::info!(
            "HttpCamera: {} opened as {}",
            url,
            if multipart { "mjpeg stream" } else { "snapshot endpoint" }
        );
        Ok(Self {
            url: url.to_string(),
            agent,
            mode,
            pacer: FramePacer::new(target_fps),
        })
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch snapshot from {}", url))?;
    let mut jpeg = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut jpeg)
        .with_context(|| format!("read snapshot from {}", url))?;
    Ok(jpeg)
}

impl CaptureDevice for HttpCamera {
    fn read(&mut self) -> Result<Option<RawImage>> {
        let jpeg = match &mut self.mode {
            // Live streams run at the camera's rate; frames that arrive early are skipped.
            Mode::Stream(scanner) => loop {
                let jpeg = scanner.next_jpeg()?;
                if !self.pacer.too_early() {
                    break jpeg;
                }
            },
            Mode::Snapshot => {
                self.pacer.wait();
                fetch_snapshot(&self.agent, &self.url)?
            }
        };
        if jpeg.is_empty() {
            return Ok(None);
        }
        let image = decode_rgb(&jpeg)?;
        self.pacer.mark();
        Ok(Some(image))
    }
}

/// Pulls complete JPEG images (SOI through EOI) out of a byte stream, skipping
/// multipart headers and boundaries in between.
struct JpegScanner<R> {
    reader: BufReader<R>,
    image: Vec<u8>,
}

impl<R: Read> JpegScanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(16 * 1024, reader),
            image: Vec::new(),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        self.image.clear();
        self.seek_marker(SOI)?;
        self.image.extend_from_slice(&SOI);
        self.collect_until(EOI)?;
        Ok(std::mem::take(&mut self.image))
    }

    /// Consume bytes up to and including `marker`, keeping none of them.
    fn seek_marker(&mut self, marker: [u8; 2]) -> Result<()> {
        let mut previous = None;
        loop {
            let byte = self.next_byte()?;
            if previous == Some(marker[0]) && byte == marker[1] {
                return Ok(());
            }
            previous = Some(byte);
        }
    }

    /// Append bytes to the current image up to and including `marker`.
    fn collect_until(&mut self, marker: [u8; 2]) -> Result<()> {
        loop {
            let byte = self.next_byte()?;
            self.image.push(byte);
            if self.image.len() > MAX_JPEG_BYTES {
                bail!("mjpeg frame larger than {} bytes", MAX_JPEG_BYTES);
            }
            if self.image.ends_with(&marker) {
                return Ok(());
            }
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        let buf = self.reader.fill_buf().context("read mjpeg stream")?;
        let Some(&byte) = buf.first() else {
            return Err(anyhow!("mjpeg stream ended"));
        };
        self.reader.consume(1);
        Ok(byte)
    }
}

fn decode_rgb(jpeg: &[u8]) -> Result<RawImage> {
    let rgb = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .context("decode camera jpeg")?
        .into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(RawImage::new(rgb.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
    use std::io::Cursor;

    fn jpeg(value: u8) -> Vec<u8> {
        Frame::new("sample", RawImage::new(vec![value; 8 * 8 * 3], 8, 8))
            .encode_jpeg(DEFAULT_JPEG_QUALITY)
            .unwrap()
    }

    fn multipart(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(part);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    #[test]
    fn scanner_yields_each_part_in_order() -> Result<()> {
        let (a, b) = (jpeg(30), jpeg(220));
        let mut scanner = JpegScanner::new(Cursor::new(multipart(&[a.clone(), b.clone()])));
        assert_eq!(scanner.next_jpeg()?, a);
        assert_eq!(scanner.next_jpeg()?, b);
        assert!(scanner.next_jpeg().is_err());
        Ok(())
    }

    #[test]
    fn truncated_part_is_an_error() {
        let whole = jpeg(100);
        let mut scanner = JpegScanner::new(Cursor::new(whole[..whole.len() - 2].to_vec()));
        assert!(scanner.next_jpeg().is_err());
    }

    #[test]
    fn stream_without_images_is_an_error() {
        let mut scanner = JpegScanner::new(Cursor::new(b"--frame\r\n\r\nnothing".to_vec()));
        assert!(scanner.next_jpeg().is_err());
    }

    #[test]
    fn decoded_frames_are_rgb() -> Result<()> {
        let image = decode_rgb(&jpeg(128))?;
        assert_eq!((image.width, image.height), (8, 8));
        assert_eq!(image.pixels.len(), 8 * 8 * 3);
        Ok(())
    }
}
