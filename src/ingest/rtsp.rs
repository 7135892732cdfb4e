//! RTSP/RTSPS camera source decoded through GStreamer (feature: rtsp-gstreamer).
//!
//! Without the feature, opening an RTSP source fails; the capture loop logs it and
//! retries like any other open failure.

use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::{anyhow, Context};
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;

use super::CaptureDevice;
use crate::frame::RawImage;

/// Longest wait for a decoded sample before the stream counts as stalled.
#[cfg(feature = "rtsp-gstreamer")]
const MIN_PULL_TIMEOUT_MS: u64 = 2_000;

pub struct RtspSource {
    url: String,
    #[cfg(feature = "rtsp-gstreamer")]
    pull_timeout_ms: u64,
    #[cfg(feature = "rtsp-gstreamer")]
    pipeline: gstreamer::Pipeline,
    #[cfg(feature = "rtsp-gstreamer")]
    sink: gstreamer_app::AppSink,
}

#[cfg(not(feature = "rtsp-gstreamer"))]
impl RtspSource {
    pub fn open(url: &str, _target_fps: u32) -> Result<Self> {
        anyhow::bail!("{}: RTSP capture needs the rtsp-gstreamer feature", url)
    }
}

#[cfg(not(feature = "rtsp-gstreamer"))]
impl CaptureDevice for RtspSource {
    fn read(&mut self) -> Result<Option<RawImage>> {
        anyhow::bail!("{}: RTSP capture needs the rtsp-gstreamer feature", self.url)
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl RtspSource {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` for `url` and start playing.
    ///
    /// The sink keeps only the newest sample, so a slow reader sees fresh frames
    /// rather than a backlog.
    pub fn open(url: &str, target_fps: u32) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=frames sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .with_context(|| format!("build capture pipeline for {}", url))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture description for {} is not a pipeline", url))?;
        let sink = pipeline
            .by_name("frames")
            .ok_or_else(|| anyhow!("capture pipeline for {} has no sink", url))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("capture sink for {} is not an appsink", url))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start capture pipeline for {}", url))?;
        log::info!("RtspSource: playing {}", url);

        let frame_ms = if target_fps == 0 {
            0
        } else {
            4_000 / u64::from(target_fps)
        };
        Ok(Self {
            url: url.to_string(),
            pull_timeout_ms: frame_ms.max(MIN_PULL_TIMEOUT_MS),
            pipeline,
            sink,
        })
    }

    /// Pipeline errors and end-of-stream become read failures.
    fn poll_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            match message.view() {
                gstreamer::MessageView::Error(err) => {
                    return Err(anyhow!("{}: pipeline error: {}", self.url, err.error()));
                }
                gstreamer::MessageView::Eos(_) => {
                    return Err(anyhow!("{}: stream ended", self.url));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl CaptureDevice for RtspSource {
    fn read(&mut self) -> Result<Option<RawImage>> {
        self.poll_bus()?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.pull_timeout_ms);
        let Some(sample) = self.sink.try_pull_sample(timeout) else {
            return Err(anyhow!(
                "{}: no frame within {} ms",
                self.url,
                self.pull_timeout_ms
            ));
        };
        let image = rgb_from_sample(&sample)?;
        if image.is_empty() {
            return Ok(None);
        }
        Ok(Some(image))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for RtspSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: could not stop {}: {}", self.url, e);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn rgb_from_sample(sample: &gstreamer::Sample) -> Result<RawImage> {
    let caps = sample.caps().context("sample without caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("sample caps")?;
    let buffer = sample.buffer().context("sample without buffer")?;
    let map = buffer.map_readable().context("map sample buffer")?;
    let stride = usize::try_from(info.stride()[0]).context("negative stride")?;
    let pixels = pack_rows(map.as_slice(), info.width(), info.height(), stride)?;
    Ok(RawImage::new(pixels, info.width(), info.height()))
}

/// Copy `height` rows of `width * 3` bytes out of a buffer whose rows are `stride` apart.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn pack_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Result<Vec<u8>> {
    let row = width as usize * 3;
    if stride < row {
        anyhow::bail!("stride {} shorter than a {}-pixel row", stride, width);
    }
    let mut pixels = Vec::with_capacity(row * height as usize);
    for chunk in data.chunks(stride).take(height as usize) {
        let Some(bytes) = chunk.get(..row) else {
            anyhow::bail!("truncated row in {}x{} frame", width, height);
        };
        pixels.extend_from_slice(bytes);
    }
    if pixels.len() != row * height as usize {
        anyhow::bail!("frame buffer holds fewer than {} rows", height);
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_rows_are_packed() -> Result<()> {
        // 2x2 RGB with 2 bytes of padding per row.
        let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let pixels = pack_rows(&data, 2, 2, 8)?;
        assert_eq!(pixels, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        Ok(())
    }

    #[test]
    fn tight_rows_pass_through() -> Result<()> {
        let data: Vec<u8> = (0..12).collect();
        assert_eq!(pack_rows(&data, 2, 2, 6)?, data);
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(pack_rows(&[0; 10], 2, 2, 6).is_err());
        assert!(pack_rows(&[0; 12], 2, 2, 4).is_err());
    }

    #[test]
    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn rtsp_requires_the_gstreamer_feature() {
        let err = RtspSource::open("rtsp://127.0.0.1:554/stream1", 10)
            .err()
            .expect("error");
        assert!(err.to_string().contains("rtsp-gstreamer"));
    }
}
