//! H.264 Annex B streams decoded through GStreamer
//!
//! Chunks are pushed into `appsrc ! h264parse ! <decoder> ! videoconvert !
//! video/x-raw,format=RGB ! appsink`. Frames depend on earlier chunks, so one
//! chunk does not always yield one frame: after each push the newest frame the
//! sink holds is copied out, and `Pending` is reported while the decoder is
//! still buffering.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::{DecodeStatus, FrameDecoder, FrameShape};
use crate::error::DecodeError;
use crate::PipelineConfig;

/// How long to wait for a decoded frame after pushing a chunk
const PULL_TIMEOUT_MS: u64 = 5;

pub struct H264Decoder {
    threads: usize,
    hardware: bool,
    session: Option<GstSession>,
}

impl H264Decoder {
    /// `threads` is the software decoder's slice-thread count, 0 for its default
    pub fn new(threads: usize, hardware: bool) -> Self {
        Self {
            threads,
            hardware,
            session: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.decode_threads, config.use_hardware_acceleration)
    }

    /// Detect best available H.264 decoder (hardware > software)
    fn select_decoder(&self) -> &'static str {
        if self.hardware {
            let decoders = [
                "nvh264dec",     // NVIDIA hardware decoder
                "vah264dec",     // VA-API (Intel/AMD)
                "vaapih264dec",  // Legacy VA-API plugin
                "v4l2h264dec",   // V4L2 stateful hardware decoder
            ];

            for decoder in decoders {
                if let Some(factory) = gst::ElementFactory::find(decoder) {
                    debug!(
                        "Found decoder: {} - {}",
                        decoder,
                        factory.metadata("long-name").unwrap_or("")
                    );
                    return decoder;
                }
            }

            warn!("No hardware H.264 decoder found, using software decoder");
        }
        "avdec_h264"
    }
}

impl FrameDecoder for H264Decoder {
    fn decode(
        &mut self,
        data: &[u8],
        shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError> {
        if self.session.as_ref().map_or(true, |s| s.shape != shape) {
            let decoder = self.select_decoder();
            self.session = Some(GstSession::open(shape, decoder, self.threads)?);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(DecodeError::Backend("decode pipeline not open".into()));
        };

        let result = session.decode(data, out);
        if let Err(DecodeError::Backend(_)) = &result {
            // Rebuilt on the next chunk; decoding resumes at the next keyframe
            self.session = None;
        }
        result
    }

    fn name(&self) -> &'static str {
        "h264"
    }
}

/// One running appsrc → appsink pipeline
struct GstSession {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    shape: FrameShape,
}

fn backend(what: &str, e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Backend(format!("{}: {}", what, e))
}

impl GstSession {
    fn open(shape: FrameShape, decoder: &str, threads: usize) -> Result<Self, DecodeError> {
        gst::init().map_err(|e| backend("failed to initialize GStreamer", e))?;

        let launch = format!(
            "appsrc name=src is-live=true do-timestamp=true format=time ! \
             h264parse ! \
             {} name=dec ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=sink",
            decoder
        );
        info!("Pipeline: {}", launch);

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| backend("failed to build pipeline", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| DecodeError::Backend("failed to create pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| DecodeError::Backend("failed to find appsrc element".into()))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| DecodeError::Backend("failed to cast to AppSrc".into()))?;
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| DecodeError::Backend("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| DecodeError::Backend("failed to cast to AppSink".into()))?;

        appsrc.set_caps(Some(
            &gst::Caps::builder("video/x-h264")
                .field("stream-format", "byte-stream")
                .build(),
        ));

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 3u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        if let Some(dec) = pipeline.by_name("dec") {
            configure_threads(&dec, threads);
        }

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| backend("failed to start pipeline", e))?;

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            shape,
        })
    }

    fn decode(&mut self, data: &[u8], out: &mut [u8]) -> Result<DecodeStatus, DecodeError> {
        self.check_bus()?;

        self.appsrc
            .push_buffer(gst::Buffer::from_slice(data.to_vec()))
            .map_err(|e| backend("appsrc refused chunk", e))?;

        // Keep only the newest frame if several are ready
        let mut latest = None;
        let mut timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);
        while let Some(sample) = self.appsink.try_pull_sample(timeout) {
            latest = Some(sample);
            timeout = gst::ClockTime::ZERO;
        }

        self.check_bus()?;

        match latest {
            Some(sample) => {
                copy_sample(&sample, self.shape, out)?;
                Ok(DecodeStatus::Frame)
            }
            None => Ok(DecodeStatus::Pending),
        }
    }

    fn check_bus(&self) -> Result<(), DecodeError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) =
            bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Warning])
        {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    return Err(DecodeError::Backend(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )))
                }
                gst::MessageView::Warning(w) => warn!("GStreamer warning: {}", w.error()),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop decode pipeline: {:?}", e);
        }
    }
}

/// Sliced multi-threaded decode on software decoders that support it
fn configure_threads(dec: &gst::Element, threads: usize) {
    if threads == 0 {
        return;
    }
    if dec.find_property("max-threads").is_some() {
        dec.set_property("max-threads", i32::try_from(threads).unwrap_or(i32::MAX));
    }
    if dec.find_property("thread-type").is_some() {
        dec.set_property_from_str("thread-type", "slice");
    }
    debug!("Decoder threads: {}", threads);
}

fn copy_sample(sample: &gst::Sample, shape: FrameShape, out: &mut [u8]) -> Result<(), DecodeError> {
    let caps = sample
        .caps()
        .ok_or_else(|| DecodeError::Backend("sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|e| backend("bad sample caps", e))?;

    if info.width() != shape.width || info.height() != shape.height {
        return Err(DecodeError::DimensionMismatch {
            expected_width: shape.width,
            expected_height: shape.height,
            actual_width: info.width(),
            actual_height: info.height(),
        });
    }

    let buffer = sample
        .buffer()
        .ok_or_else(|| DecodeError::Backend("sample contains no buffer".into()))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| backend("failed to map frame", e))?;
    let stride = usize::try_from(frame.plane_stride()[0])
        .map_err(|e| backend("negative plane stride", e))?;
    let plane = frame.plane_data(0).map_err(|e| backend("failed to read plane", e))?;

    copy_rows(plane, stride, out, shape.pitch())
}

/// Strip row padding: copy `pitch` bytes out of every `stride`-byte source row
fn copy_rows(src: &[u8], stride: usize, out: &mut [u8], pitch: usize) -> Result<(), DecodeError> {
    // Fast path: no padding
    if stride == pitch && src.len() >= out.len() {
        out.copy_from_slice(&src[..out.len()]);
        return Ok(());
    }

    let rows = out.len() / pitch.max(1);
    for (row, dst) in out.chunks_exact_mut(pitch).enumerate() {
        let start = row * stride;
        let line = src
            .get(start..start + pitch)
            .ok_or(DecodeError::SizeMismatch {
                expected: rows * stride,
                actual: src.len(),
            })?;
        dst.copy_from_slice(line);
    }
    Ok(())
}
