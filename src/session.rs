// Decoder session: owns the external decoder handle and the allocator
// binding, and turns the asynchronous hardware pipeline into a synchronous
// push/pull decode call for the host framework.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use crate::DecodeError;
use crate::backend::{
    ConfigBuffer, DecodeStatus, FormatInfo, HwDecoder, MediaBackend, NativeDisplay, PixelFormat,
    SurfaceAllocator,
};
use crate::buffer::{DECODE_QUEUE_SIZE, DecodeBuffer};
use crate::frame::{FrameData, SurfaceTicket, VideoFrame};
use crate::worker::{SessionShared, WorkerState, spawn_worker};

/// How long a submitter waits between retries while the queue is full.
const SUBMIT_WAIT: Duration = Duration::from_millis(1);
/// How long the caller sleeps while the stream format is still unknown.
const FORMAT_WAIT: Duration = Duration::from_millis(10);
/// Interval between hardware output polls.
const OUTPUT_POLL: Duration = Duration::from_micros(100);
/// Interval between teardown checks while driving the worker to exit.
const CLOSE_WAIT: Duration = Duration::from_millis(10);

/// Codecs the external decode library can be instantiated for. The set is
/// closed: an unsupported codec cannot be named, so there is no fallible
/// id-to-codec dispatch at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Mpeg2,
    Vc1,
}

impl VideoCodec {
    /// MIME type string the external library instantiates decoders by.
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/h264",
            VideoCodec::Hevc => "video/h265",
            VideoCodec::Vp8 => "video/x-vnd.on2.vp8",
            VideoCodec::Vp9 => "video/x-vnd.on2.vp9",
            VideoCodec::Mpeg2 => "video/mpeg2",
            VideoCodec::Vc1 => "video/vc1",
        }
    }
}

/// Stream time base: seconds per tick as a rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

/// Parameters describing the elementary stream a session decodes.
#[derive(Debug, Clone)]
pub struct StreamParameters {
    pub codec: VideoCodec,
    /// Out-of-band codec configuration (SPS/PPS, codec private data).
    pub extradata: Bytes,
    pub time_base: TimeBase,
    /// Ticks of `time_base` per frame.
    pub ticks_per_frame: i32,
    /// Requested output format; `None` lets the session pick the native
    /// (zero-copy) layout.
    pub pixel_format: Option<PixelFormat>,
}

impl StreamParameters {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            extradata: Bytes::new(),
            time_base: TimeBase { num: 1, den: 25 },
            ticks_per_frame: 1,
            pixel_format: None,
        }
    }
}

/// One encoded packet pushed by the host framework.
/// An empty payload signals end of stream.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    pub pts: Option<i64>,
    /// Packet duration in stream ticks, when the container knows it.
    pub duration: Option<i64>,
}

impl<'a> Packet<'a> {
    pub fn new(data: &'a [u8], pts: Option<i64>) -> Self {
        Self {
            data,
            pts,
            duration: None,
        }
    }

    pub fn end_of_stream() -> Packet<'static> {
        Packet {
            data: &[],
            pts: None,
            duration: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of one `decode` call: at most one frame, plus how much of the
/// packet was consumed (always all of it).
#[derive(Debug)]
pub struct DecodeOutcome {
    pub frame: Option<VideoFrame>,
    pub consumed: usize,
}

/// Diagnostic counters, monotonic per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub submitted: u64,
    pub decoded: u64,
    pub rendered: u64,
}

/// A decode session for one elementary stream.
///
/// The session owns the external decoder handle, the display and allocator
/// bindings, the bounded input queue, and the decode worker. `decode`
/// submits one packet and pulls at most one finished frame; `close` (also
/// run on drop) drains the worker and releases the bindings.
pub struct DecoderSession {
    shared: Arc<SessionShared>,
    decoder: Option<Arc<dyn HwDecoder>>,
    allocator: Option<Arc<dyn SurfaceAllocator>>,
    display: Option<Arc<dyn NativeDisplay>>,
    worker: Option<JoinHandle<()>>,
    pixel_format: PixelFormat,
    params: StreamParameters,
}

impl DecoderSession {
    /// Bind the external media library and start a decoder for the stream.
    ///
    /// Display, allocator, decoder creation, and decoder start failures are
    /// all fatal; the framework is expected to `close()` (or drop) the
    /// session regardless of the outcome.
    pub fn open(
        backend: &dyn MediaBackend,
        mut params: StreamParameters,
    ) -> Result<Self, DecodeError> {
        let pixel_format = params.pixel_format.unwrap_or(PixelFormat::Native);

        let display = backend.create_display()?;
        let allocator = backend.create_allocator(&display)?;

        let mime_type = params.codec.mime_type();
        let decoder = backend.create_decoder(mime_type, &display, Arc::clone(&allocator))?;

        adjust_time_base(&mut params);

        let config = ConfigBuffer {
            data: params.extradata.clone(),
        };
        let status = decoder.start(&config);
        if status != DecodeStatus::Success && status != DecodeStatus::FormatChange {
            log::error!("{mime_type} decoder failed to start: {status:?}");
            return Err(DecodeError::Init(format!(
                "{mime_type} decoder failed to start"
            )));
        }

        log::info!("decoder session open: {mime_type}, output {pixel_format:?}");
        Ok(Self {
            shared: Arc::new(SessionShared::new(DECODE_QUEUE_SIZE)),
            decoder: Some(decoder),
            allocator: Some(allocator),
            display: Some(display),
            worker: None,
            pixel_format,
            params,
        })
    }

    /// Push one encoded packet and pull at most one decoded frame.
    ///
    /// An empty packet signals end of stream; repeated end-of-stream calls
    /// keep draining frames the hardware still holds until the worker has
    /// exited, after which `frame` stays `None`.
    pub fn decode(&mut self, packet: &Packet<'_>) -> Result<DecodeOutcome, DecodeError> {
        let Some(decoder) = self.decoder.clone() else {
            return Err(DecodeError::SessionClosed);
        };

        if let Some(duration) = packet.duration {
            if duration != 0 {
                self.shared.duration.store(duration, Ordering::Relaxed);
            }
        }

        self.submit(packet);
        self.update_worker(packet, &decoder);

        let frame = self.acquire_output(packet, decoder.as_ref())?;
        Ok(DecodeOutcome {
            frame,
            consumed: packet.data.len(),
        })
    }

    /// Terminate the worker, stop the decoder, and release the session's
    /// bindings. Calling `close` again is a no-op.
    pub fn close(&mut self) {
        let Some(decoder) = self.decoder.take() else {
            return;
        };

        // Keep signaling end-of-stream until the worker is gone (or was
        // never started); the worker still drains queued buffers first.
        // The queue lock and the session lock are never held together here:
        // the worker takes them nested in the other direction.
        loop {
            {
                let mut ctx = self.shared.lock_ctx();
                if ctx.state == WorkerState::Exited || ctx.state == WorkerState::NotInit {
                    break;
                }
                ctx.state = WorkerState::GotEos;
            }
            self.shared.queue.wake_worker();

            let mut ctx = self.shared.lock_ctx();
            if ctx.state == WorkerState::Exited || ctx.state == WorkerState::NotInit {
                break;
            }
            self.shared.wait_state_change(&mut ctx, CLOSE_WAIT);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        decoder.stop();
        self.allocator = None;
        self.display = None;

        let dropped = self.shared.queue.drain();
        if dropped > 0 {
            log::debug!("discarded {dropped} undecoded buffers at close");
        }
        log::debug!("decoder session closed");
    }

    /// Stream geometry, once the worker has discovered it.
    pub fn format_info(&self) -> Option<FormatInfo> {
        self.shared.format()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn time_base(&self) -> TimeBase {
        self.params.time_base
    }

    pub fn ticks_per_frame(&self) -> i32 {
        self.params.ticks_per_frame
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            decoded: self.shared.decoded.load(Ordering::Relaxed),
            rendered: self.shared.rendered.load(Ordering::Relaxed),
        }
    }

    /// Append a non-empty packet to the input queue, waiting while the
    /// queue is at capacity. Empty packets are never queued; the worker
    /// synthesizes the flush itself once the queue drains.
    ///
    /// While an end-of-stream drain is in progress the packet is discarded.
    /// After the worker exited, a restart submission is queued without
    /// blocking (the successor worker drains whatever is still pending).
    fn submit(&self, packet: &Packet<'_>) {
        if !packet.is_empty() {
            let mut buffer = DecodeBuffer::new(packet.data, packet.pts);
            loop {
                match self.shared.state() {
                    WorkerState::GotEos => {
                        log::debug!("stream is draining, discarding submission");
                        break;
                    }
                    WorkerState::Exited => {
                        if self.shared.queue.try_push(buffer).is_err() {
                            log::debug!("in queue still full after worker exit, discarding");
                        }
                        break;
                    }
                    WorkerState::NotInit | WorkerState::Running => {}
                }
                match self.shared.queue.try_push(buffer) {
                    Ok(()) => break,
                    Err(back) => buffer = back,
                }
                log::debug!(
                    "in queue full ({}), waiting for the worker to drain",
                    self.shared.queue.len()
                );
                self.shared.queue.wait_space(SUBMIT_WAIT);
            }
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Worker lifecycle transitions driven by this packet.
    fn update_worker(&mut self, packet: &Packet<'_>, decoder: &Arc<dyn HwDecoder>) {
        let mut ctx = self.shared.lock_ctx();
        match ctx.state {
            WorkerState::NotInit | WorkerState::Exited => {
                if !packet.is_empty() {
                    ctx.state = WorkerState::Running;
                    drop(ctx);
                    // reap the previous worker before starting its successor
                    if let Some(handle) = self.worker.take() {
                        let _ = handle.join();
                    }
                    log::trace!("starting decode worker");
                    self.worker = Some(spawn_worker(
                        Arc::clone(&self.shared),
                        Arc::clone(decoder),
                    ));
                }
            }
            WorkerState::Running => {
                if packet.is_empty() {
                    ctx.state = WorkerState::GotEos;
                    drop(ctx);
                    self.shared.queue.wake_worker();
                }
            }
            WorkerState::GotEos => {
                drop(ctx);
                self.shared.queue.wake_worker();
            }
        }
    }

    /// Pull at most one finished frame out of the hardware decoder.
    ///
    /// Bounded by: this call supplied new input, a frame was pulled, or the
    /// worker exited — so end-of-stream draining cannot live-lock.
    fn acquire_output(
        &self,
        packet: &Packet<'_>,
        decoder: &dyn HwDecoder,
    ) -> Result<Option<VideoFrame>, DecodeError> {
        let new_input = !packet.is_empty();

        // Nothing can be produced before the format is known.
        let info = loop {
            if let Some(info) = self.shared.format() {
                break info;
            }
            std::thread::sleep(FORMAT_WAIT);
            if self.shared.state() != WorkerState::Running {
                return Ok(None);
            }
        };

        let hw_frame = loop {
            if let Some(frame) = decoder.get_output() {
                break frame;
            }
            if new_input || self.shared.state() == WorkerState::Exited {
                return Ok(None);
            }
            std::thread::sleep(OUTPUT_POLL);
        };

        let frame = self.wrap_frame(hw_frame, &info)?;
        self.shared.rendered.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "submitted={} decoded={} rendered={}",
            self.shared.submitted.load(Ordering::Relaxed),
            self.shared.decoded.load(Ordering::Relaxed),
            self.shared.rendered.load(Ordering::Relaxed)
        );
        Ok(Some(frame))
    }

    /// Wrap a hardware frame for delivery: zero-copy when the output format
    /// is the native one, otherwise copy the pixels out of the surface.
    fn wrap_frame(
        &self,
        hw_frame: crate::backend::HwFrame,
        info: &FormatInfo,
    ) -> Result<VideoFrame, DecodeError> {
        let Some(allocator) = &self.allocator else {
            return Err(DecodeError::SessionClosed);
        };

        // The ticket is armed before any fallible work so the surface goes
        // back to the pool even when the read-back fails.
        let ticket = SurfaceTicket::new(
            hw_frame.surface,
            Arc::clone(allocator),
            Arc::clone(&self.shared),
        );

        let pts = hw_frame.pts.unwrap_or_else(|| {
            self.shared.rendered.load(Ordering::Relaxed) as i64
                * self.shared.duration.load(Ordering::Relaxed)
        });

        let data = match self.pixel_format {
            PixelFormat::Native => FrameData::Surface(hw_frame.surface),
            format => {
                let Some(display) = &self.display else {
                    return Err(DecodeError::SessionClosed);
                };
                let image = display.read_back(hw_frame.surface, format, info)?;
                FrameData::Cpu {
                    data: image.data,
                    strides: image.strides,
                }
            }
        };

        Ok(VideoFrame::new(
            info.width,
            info.height,
            pts,
            self.pixel_format,
            data,
            ticket,
        ))
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// H.264 streams historically advertise one tick per frame while the rate
/// is field-based: double the time-base denominator (halve the numerator
/// when doubling would overflow) and report two ticks per frame.
fn adjust_time_base(params: &mut StreamParameters) {
    if params.codec != VideoCodec::H264 {
        return;
    }
    if params.ticks_per_frame == 1 {
        if params.time_base.den < i32::MAX / 2 {
            params.time_base.den *= 2;
        } else {
            params.time_base.num /= 2;
        }
    }
    params.ticks_per_frame = 2;
}
