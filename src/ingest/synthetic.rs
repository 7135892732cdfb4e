//! `stub://` source: a static backdrop with a bright block that walks across it.
//!
//! Used for demos and tests when no camera is at hand. The block position advances
//! every frame, so consecutive frames always differ.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::CaptureDevice;
use crate::frame::RawImage;

const BLOCK_SIDE: u32 = 16;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    pacer: FramePacer,
    tick: u64,
    tint: u8,
}

impl SyntheticSource {
    pub fn new(uri: &str, width: u32, height: u32, target_fps: u32) -> Self {
        let name = uri.trim_start_matches("stub://").to_string();
        // Different stub names get different backdrops.
        let tint = name.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
        log::info!("SyntheticSource: {}x{} frames for stub://{}", width, height, name);
        Self {
            name,
            width: width.max(1),
            height: height.max(1),
            pacer: FramePacer::new(target_fps),
            tick: 0,
            tint,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.tick
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let side = BLOCK_SIDE.min(self.width).min(self.height) as usize;
        let travel = (w - side + 1) as u64;
        let block_x = (self.tick % travel) as usize;
        let block_y = (h - side) / 2;

        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let inside =
                    (block_x..block_x + side).contains(&x) && (block_y..block_y + side).contains(&y);
                if inside {
                    pixels.extend_from_slice(&[255, 255, 255]);
                } else {
                    let shade = ((x + y) % 64) as u8;
                    pixels.extend_from_slice(&[self.tint, shade, shade / 2]);
                }
            }
        }
        pixels
    }
}

impl CaptureDevice for SyntheticSource {
    fn read(&mut self) -> Result<Option<RawImage>> {
        self.pacer.wait();
        let pixels = self.render();
        self.tick += 1;
        log::trace!("SyntheticSource: {} frame {}", self.name, self.tick);
        Ok(Some(RawImage::new(pixels, self.width, self.height)))
    }
}

/// Sleeps so that successive `wait` calls are at least `1 / fps` apart.
#[derive(Debug)]
pub(crate) struct FramePacer {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn new(fps: u32) -> Self {
        let interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            if let Some(remaining) = interval.checked_sub(last.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
        self.last = Some(Instant::now());
    }

    /// True when less than one interval has passed since the last accepted frame.
    pub(crate) fn too_early(&self) -> bool {
        match (self.interval, self.last) {
            (Some(interval), Some(last)) => last.elapsed() < interval,
            _ => false,
        }
    }

    pub(crate) fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}
