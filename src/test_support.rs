// Scripted stand-ins for the external media library. Test-only: the real
// hardware decoder, allocator, and display live outside this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::DecodeError;
use crate::backend::{
    ConfigBuffer, DecodeStatus, FormatInfo, HwDecoder, HwFrame, MediaBackend, NativeDisplay,
    PixelFormat, PlanarImage, SurfaceAllocator, SurfaceId, SurfaceRequest,
};

const DEFAULT_FORMAT: FormatInfo = FormatInfo {
    width: 640,
    height: 360,
};

enum ScriptEntry {
    Status(DecodeStatus),
    FormatChange(FormatInfo),
}

/// Hardware decoder double with scriptable per-call behavior.
///
/// By default every non-empty decode succeeds and immediately makes one
/// output frame available, carrying the input pts through. The stream
/// format becomes known after the first successful decode, like real
/// hardware that has to parse headers first.
pub(crate) struct MockDecoder {
    format: Mutex<FormatInfo>,
    format_known: AtomicBool,
    suppress_format: AtomicBool,
    start_status: Mutex<DecodeStatus>,
    start_config: Mutex<Option<Bytes>>,
    scripted: Mutex<HashMap<usize, ScriptEntry>>,
    calls: AtomicUsize,
    decoded: Mutex<Vec<Vec<u8>>>,
    outputs: Mutex<VecDeque<HwFrame>>,
    next_surface: AtomicU64,
    flushes: AtomicUsize,
    stops: AtomicUsize,
    decode_after_stop: AtomicBool,
    decode_delay: Mutex<Duration>,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self {
            format: Mutex::new(DEFAULT_FORMAT),
            format_known: AtomicBool::new(false),
            suppress_format: AtomicBool::new(false),
            start_status: Mutex::new(DecodeStatus::Success),
            start_config: Mutex::new(None),
            scripted: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            decoded: Mutex::new(Vec::new()),
            outputs: Mutex::new(VecDeque::new()),
            next_surface: AtomicU64::new(1),
            flushes: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            decode_after_stop: AtomicBool::new(false),
            decode_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// The nth non-empty decode call (1-based) returns `status`.
    pub fn script_status(&self, call: usize, status: DecodeStatus) {
        self.scripted
            .lock()
            .insert(call, ScriptEntry::Status(status));
    }

    /// The nth non-empty decode call reports a format change to `format`;
    /// the retry of the same buffer then succeeds.
    pub fn script_format_change(&self, call: usize, format: FormatInfo) {
        self.scripted
            .lock()
            .insert(call, ScriptEntry::FormatChange(format));
    }

    /// Never report a format, as if header parsing kept failing silently.
    pub fn suppress_format_info(&self) {
        self.suppress_format.store(true, Ordering::SeqCst);
    }

    pub fn set_start_status(&self, status: DecodeStatus) {
        *self.start_status.lock() = status;
    }

    /// Make every decode call take this long (backpressure tests).
    pub fn set_decode_delay(&self, delay: Duration) {
        *self.decode_delay.lock() = delay;
    }

    /// Payloads of every non-empty decode call, in call order.
    pub fn decoded_payloads(&self) -> Vec<Vec<u8>> {
        self.decoded.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn decode_called_after_stop(&self) -> bool {
        self.decode_after_stop.load(Ordering::SeqCst)
    }

    pub fn start_config(&self) -> Option<Bytes> {
        self.start_config.lock().clone()
    }
}

impl HwDecoder for MockDecoder {
    fn start(&self, config: &ConfigBuffer) -> DecodeStatus {
        *self.start_config.lock() = Some(config.data.clone());
        *self.start_status.lock()
    }

    fn decode(&self, data: &[u8], pts: Option<i64>) -> DecodeStatus {
        if self.stops.load(Ordering::SeqCst) > 0 {
            self.decode_after_stop.store(true, Ordering::SeqCst);
        }
        if data.is_empty() {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            return DecodeStatus::Success;
        }

        let delay = *self.decode_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.decoded.lock().push(data.to_vec());

        match self.scripted.lock().get(&call) {
            Some(ScriptEntry::Status(status)) => {
                let status = *status;
                if status == DecodeStatus::Success {
                    self.finish_decode(pts);
                }
                status
            }
            Some(ScriptEntry::FormatChange(format)) => {
                *self.format.lock() = *format;
                self.format_known.store(true, Ordering::SeqCst);
                DecodeStatus::FormatChange
            }
            None => {
                self.finish_decode(pts);
                DecodeStatus::Success
            }
        }
    }

    fn get_output(&self) -> Option<HwFrame> {
        self.outputs.lock().pop_front()
    }

    fn format_info(&self) -> Option<FormatInfo> {
        if self.suppress_format.load(Ordering::SeqCst) {
            return None;
        }
        if self.format_known.load(Ordering::SeqCst) {
            Some(*self.format.lock())
        } else {
            None
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockDecoder {
    fn finish_decode(&self, pts: Option<i64>) {
        self.format_known.store(true, Ordering::SeqCst);
        let surface = SurfaceId(self.next_surface.fetch_add(1, Ordering::SeqCst));
        self.outputs.lock().push_back(HwFrame { surface, pts });
    }
}

/// Surface allocator double counting releases per surface.
pub(crate) struct MockAllocator {
    next: AtomicU64,
    allocs: AtomicUsize,
    frees: AtomicUsize,
    unrefs: Mutex<HashMap<u64, usize>>,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            unrefs: Mutex::new(HashMap::new()),
        }
    }

    pub fn unref_count(&self, surface: SurfaceId) -> usize {
        self.unrefs.lock().get(&surface.0).copied().unwrap_or(0)
    }

    pub fn total_unrefs(&self) -> usize {
        self.unrefs.lock().values().sum()
    }

    #[allow(dead_code)]
    pub fn alloc_count(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl SurfaceAllocator for MockAllocator {
    fn alloc(&self, _request: &SurfaceRequest) -> Result<SurfaceId, DecodeError> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(SurfaceId(self.next.fetch_add(1, Ordering::SeqCst)))
    }

    fn free(&self, _surface: SurfaceId) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn unref(&self, surface: SurfaceId) {
        *self.unrefs.lock().entry(surface.0).or_insert(0) += 1;
    }
}

/// Display double synthesizing host-memory planes on read-back.
pub(crate) struct MockDisplay {
    fail_read_back: AtomicBool,
}

impl MockDisplay {
    pub fn new() -> Self {
        Self {
            fail_read_back: AtomicBool::new(false),
        }
    }

    pub fn fail_read_back(&self) {
        self.fail_read_back.store(true, Ordering::SeqCst);
    }
}

impl NativeDisplay for MockDisplay {
    fn read_back(
        &self,
        _surface: SurfaceId,
        format: PixelFormat,
        info: &FormatInfo,
    ) -> Result<PlanarImage, DecodeError> {
        if self.fail_read_back.load(Ordering::SeqCst) {
            return Err(DecodeError::Surface("read back failed".into()));
        }
        let w = info.width as usize;
        let h = info.height as usize;
        match format {
            PixelFormat::Nv12 => Ok(PlanarImage {
                data: vec![0; w * h * 3 / 2],
                strides: [w, w, 0],
            }),
            PixelFormat::I420 => Ok(PlanarImage {
                data: vec![0; w * h * 3 / 2],
                strides: [w, w / 2, w / 2],
            }),
            PixelFormat::Native => Err(DecodeError::Surface(
                "native surfaces are not read back".into(),
            )),
        }
    }
}

/// Media library double wiring the mocks together.
pub(crate) struct MockBackend {
    pub decoder: Arc<MockDecoder>,
    pub allocator: Arc<MockAllocator>,
    pub display: Arc<MockDisplay>,
    fail_display: AtomicBool,
    fail_decoder: AtomicBool,
    requested_mime: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            decoder: Arc::new(MockDecoder::new()),
            allocator: Arc::new(MockAllocator::new()),
            display: Arc::new(MockDisplay::new()),
            fail_display: AtomicBool::new(false),
            fail_decoder: AtomicBool::new(false),
            requested_mime: Mutex::new(None),
        }
    }

    pub fn fail_display(&self) {
        self.fail_display.store(true, Ordering::SeqCst);
    }

    pub fn fail_decoder(&self) {
        self.fail_decoder.store(true, Ordering::SeqCst);
    }

    pub fn requested_mime(&self) -> Option<String> {
        self.requested_mime.lock().clone()
    }
}

impl MediaBackend for MockBackend {
    fn create_display(&self) -> Result<Arc<dyn NativeDisplay>, DecodeError> {
        if self.fail_display.load(Ordering::SeqCst) {
            return Err(DecodeError::Init("no display available".into()));
        }
        Ok(Arc::clone(&self.display) as Arc<dyn NativeDisplay>)
    }

    fn create_allocator(
        &self,
        _display: &Arc<dyn NativeDisplay>,
    ) -> Result<Arc<dyn SurfaceAllocator>, DecodeError> {
        Ok(Arc::clone(&self.allocator) as Arc<dyn SurfaceAllocator>)
    }

    fn create_decoder(
        &self,
        mime_type: &str,
        _display: &Arc<dyn NativeDisplay>,
        _allocator: Arc<dyn SurfaceAllocator>,
    ) -> Result<Arc<dyn HwDecoder>, DecodeError> {
        *self.requested_mime.lock() = Some(mime_type.to_string());
        if self.fail_decoder.load(Ordering::SeqCst) {
            return Err(DecodeError::Init(format!(
                "no decoder for {mime_type}"
            )));
        }
        Ok(Arc::clone(&self.decoder) as Arc<dyn HwDecoder>)
    }
}
