// Framework-visible decoded frames and the surface lifecycle adapter.
// A frame owns its hardware surface through a drop-enforced ticket, so the
// surface goes back to the pool exactly once no matter which thread lets go
// of the frame last.

use std::fmt;
use std::sync::Arc;

use crate::backend::{PixelFormat, SurfaceAllocator, SurfaceId};
use crate::worker::SessionShared;

/// Pixel payload of a delivered frame.
#[derive(Debug)]
pub enum FrameData {
    /// Opaque hardware surface reference (native output, zero-copy).
    Surface(SurfaceId),
    /// Host-memory planes copied out of the surface.
    Cpu {
        data: Vec<u8>,
        /// Row strides for the Y, U, V planes (NV12 uses the first two).
        strides: [usize; 3],
    },
}

/// Ownership token for one decoded hardware surface.
///
/// Dropping the ticket takes the session lock (serializing against
/// teardown) and returns the surface to the hardware pool. The ticket keeps
/// its own allocator reference, so a frame outliving `close()` still
/// releases its surface.
pub(crate) struct SurfaceTicket {
    surface: SurfaceId,
    allocator: Arc<dyn SurfaceAllocator>,
    shared: Arc<SessionShared>,
}

impl SurfaceTicket {
    pub fn new(
        surface: SurfaceId,
        allocator: Arc<dyn SurfaceAllocator>,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            surface,
            allocator,
            shared,
        }
    }
}

impl Drop for SurfaceTicket {
    fn drop(&mut self) {
        let _ctx = self.shared.lock_ctx();
        self.allocator.unref(self.surface);
        log::trace!("recycled frame surface {:?}", self.surface);
    }
}

/// A decoded frame delivered to the host framework.
///
/// Exactly one `VideoFrame` exists per decoded image; dropping it releases
/// the underlying surface. `pts` is the hardware timestamp when one was
/// carried through, otherwise approximated from the rendered-frame count
/// and the last known packet duration.
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub format: PixelFormat,
    data: FrameData,
    #[allow(dead_code)]
    ticket: SurfaceTicket,
}

impl VideoFrame {
    pub(crate) fn new(
        width: u32,
        height: u32,
        pts: i64,
        format: PixelFormat,
        data: FrameData,
        ticket: SurfaceTicket,
    ) -> Self {
        Self {
            width,
            height,
            pts,
            format,
            data,
            ticket,
        }
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    /// The hardware surface backing this frame (zero-copy delivery).
    pub fn surface(&self) -> Option<SurfaceId> {
        match self.data {
            FrameData::Surface(surface) => Some(surface),
            FrameData::Cpu { .. } => None,
        }
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self.data, FrameData::Cpu { .. })
    }

    /// Host-memory pixels, when the frame was delivered in copy mode.
    pub fn cpu_data(&self) -> Option<&[u8]> {
        match &self.data {
            FrameData::Cpu { data, .. } => Some(data),
            FrameData::Surface(_) => None,
        }
    }

    /// Plane strides, when the frame was delivered in copy mode.
    pub fn strides(&self) -> Option<[usize; 3]> {
        match &self.data {
            FrameData::Cpu { strides, .. } => Some(*strides),
            FrameData::Surface(_) => None,
        }
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("format", &self.format)
            .field("cpu", &self.is_cpu())
            .finish()
    }
}
