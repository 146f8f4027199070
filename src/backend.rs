// External media library interface
// The session drives an opaque hardware decode library through these traits.
// Implementations live outside this crate (VAAPI, NVDEC, ...); tests use a
// scripted mock.

use std::sync::Arc;

use bytes::Bytes;

use crate::DecodeError;

/// Status reported by the hardware decoder for `start` and `decode` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Success,
    /// Output dimensions/layout changed; the caller must re-learn the format
    /// and re-issue the current buffer.
    FormatChange,
    Fail,
}

impl DecodeStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, DecodeStatus::Fail)
    }
}

/// Stream geometry reported by the decoder once enough bitstream has parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub width: u32,
    pub height: u32,
}

/// Out-of-band codec configuration handed to `HwDecoder::start`
/// (SPS/PPS, codec private data).
#[derive(Debug, Clone, Default)]
pub struct ConfigBuffer {
    pub data: Bytes,
}

impl ConfigBuffer {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }
}

/// Opaque identifier of a hardware-managed decoded-image buffer.
///
/// Not addressable as host memory; pixels only leave the device through
/// `NativeDisplay::read_back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Allocation request issued to the surface allocator.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceRequest {
    pub width: u32,
    pub height: u32,
    pub count: u32,
}

/// A decoded image still owned by the hardware pool.
#[derive(Debug, Clone, Copy)]
pub struct HwFrame {
    pub surface: SurfaceId,
    /// Presentation timestamp carried through the decoder, if any.
    pub pts: Option<i64>,
}

/// Output pixel layout delivered to the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Hardware-native surface reference, no device-to-host copy.
    Native,
    /// NV12 in host memory (copy mode).
    Nv12,
    /// Planar YUV 4:2:0 in host memory (copy mode).
    I420,
}

/// Planar pixel data copied out of a hardware surface.
#[derive(Debug, Clone)]
pub struct PlanarImage {
    pub data: Vec<u8>,
    /// Row strides for the Y, U, V planes (NV12 uses the first two).
    pub strides: [usize; 3],
}

/// The hardware decoder. All methods are documented thread-safe by the
/// external library; the decoder runs its own internal pipeline.
pub trait HwDecoder: Send + Sync {
    /// Start the decoder with out-of-band configuration.
    fn start(&self, config: &ConfigBuffer) -> DecodeStatus;

    /// Feed one encoded buffer. An empty slice is a flush request telling the
    /// decoder to emit any frames it is internally holding.
    fn decode(&self, data: &[u8], pts: Option<i64>) -> DecodeStatus;

    /// Non-blocking pull from the decoder's internal output queue.
    fn get_output(&self) -> Option<HwFrame>;

    /// Geometry discovered from the bitstream, once known.
    fn format_info(&self) -> Option<FormatInfo>;

    /// Stop the decoder and release its internal resources.
    fn stop(&self);
}

/// Surface pool binding installed into the decoder at session open.
pub trait SurfaceAllocator: Send + Sync {
    fn alloc(&self, request: &SurfaceRequest) -> Result<SurfaceId, DecodeError>;
    fn free(&self, surface: SurfaceId);
    /// Return one reference on a surface to the pool.
    fn unref(&self, surface: SurfaceId);
}

/// Native display binding. Also the device-to-host transfer seam: the copy
/// delivery mode reads surfaces back through the display utility layer.
pub trait NativeDisplay: Send + Sync {
    fn read_back(
        &self,
        surface: SurfaceId,
        format: PixelFormat,
        info: &FormatInfo,
    ) -> Result<PlanarImage, DecodeError>;
}

/// Factory binding the external media library: native display creation,
/// surface allocator, and decoder instantiation for a MIME type.
pub trait MediaBackend: Send + Sync {
    fn create_display(&self) -> Result<Arc<dyn NativeDisplay>, DecodeError>;

    fn create_allocator(
        &self,
        display: &Arc<dyn NativeDisplay>,
    ) -> Result<Arc<dyn SurfaceAllocator>, DecodeError>;

    fn create_decoder(
        &self,
        mime_type: &str,
        display: &Arc<dyn NativeDisplay>,
        allocator: Arc<dyn SurfaceAllocator>,
    ) -> Result<Arc<dyn HwDecoder>, DecodeError>;
}
