// Decode worker: a single background thread drains the input queue into the
// hardware decoder, publishing format discovery and tracking end-of-stream.
// Its lifecycle register is shared with the caller thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::backend::{DecodeStatus, FormatInfo, HwDecoder};
use crate::buffer::InputQueue;

/// Decode worker lifecycle register.
///
/// Advances `NotInit`/`Exited` -> `Running` -> `GotEos` -> `Exited` within
/// one stream; a new submission may restart an `Exited` worker. The derived
/// ordering makes "end-of-stream seen" a `>= GotEos` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    NotInit,
    Running,
    GotEos,
    Exited,
}

/// Fields guarded by the coarse session lock: the worker register and the
/// stream format discovered by the worker. Frame release and session
/// teardown serialize on the same lock.
pub(crate) struct SessionCtx {
    pub state: WorkerState,
    pub format: Option<FormatInfo>,
}

/// State shared between the caller thread, the decode worker, and
/// outstanding frame handles.
pub(crate) struct SessionShared {
    pub queue: InputQueue,
    ctx: Mutex<SessionCtx>,
    state_changed: Condvar,
    pub submitted: AtomicU64,
    pub decoded: AtomicU64,
    pub rendered: AtomicU64,
    /// Most recent packet duration, for the pts fallback.
    pub duration: AtomicI64,
}

impl SessionShared {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue: InputQueue::new(queue_capacity),
            ctx: Mutex::new(SessionCtx {
                state: WorkerState::NotInit,
                format: None,
            }),
            state_changed: Condvar::new(),
            submitted: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
            rendered: AtomicU64::new(0),
            duration: AtomicI64::new(0),
        }
    }

    pub fn lock_ctx(&self) -> MutexGuard<'_, SessionCtx> {
        self.ctx.lock()
    }

    pub fn state(&self) -> WorkerState {
        self.ctx.lock().state
    }

    pub fn set_state(&self, state: WorkerState) {
        self.ctx.lock().state = state;
        self.state_changed.notify_all();
    }

    pub fn format(&self) -> Option<FormatInfo> {
        self.ctx.lock().format
    }

    pub fn publish_format(&self, info: FormatInfo) {
        self.ctx.lock().format = Some(info);
    }

    /// Block until the register changes, bounded by `timeout`. The guard is
    /// re-acquired before returning.
    pub fn wait_state_change(
        &self,
        guard: &mut MutexGuard<'_, SessionCtx>,
        timeout: std::time::Duration,
    ) {
        let _ = self.state_changed.wait_for(guard, timeout);
    }
}

/// Spawn the decode worker. The caller transitions the register to
/// `Running` before calling this.
pub(crate) fn spawn_worker(
    shared: Arc<SessionShared>,
    decoder: Arc<dyn HwDecoder>,
) -> JoinHandle<()> {
    std::thread::spawn(move || decode_loop(&shared, decoder.as_ref()))
}

fn decode_loop(shared: &SessionShared, decoder: &dyn HwDecoder) {
    loop {
        log::trace!("decode worker running");
        let Some(buffer) =
            shared
                .queue
                .next_pending(|| shared.state() == WorkerState::GotEos)
        else {
            // Queue drained after end-of-stream: one flush decode with an
            // empty buffer tells the decoder to emit what it still holds.
            log::debug!("end of stream, flushing decoder");
            decoder.decode(&[], None);
            break;
        };

        log::trace!(
            "processing input buffer, size={} queue={}",
            buffer.len(),
            shared.queue.len()
        );
        let mut status = decoder.decode(&buffer.data, buffer.pts);
        log::trace!(
            "decode status {:?}, decoded {} rendered {}",
            status,
            shared.decoded.load(Ordering::Relaxed),
            shared.rendered.load(Ordering::Relaxed)
        );

        // Format becomes known after the first successful decode.
        if status == DecodeStatus::Success && shared.format().is_none() {
            if let Some(info) = decoder.format_info() {
                log::debug!("decode format {}x{}", info.width, info.height);
                shared.publish_format(info);
            }
        }

        // On a format change, re-learn the format and re-issue the same
        // buffer; the decoder re-accepts it after reconfiguration.
        if status == DecodeStatus::FormatChange {
            if let Some(info) = decoder.format_info() {
                log::debug!("decode format change {}x{}", info.width, info.height);
                shared.publish_format(info);
            }
            status = decoder.decode(&buffer.data, buffer.pts);
            if status.is_error() {
                log::error!("decode error {:?} after format change", status);
            }
        }

        if status.is_error() || shared.format().is_none() {
            log::error!("decode error {:?}, stopping worker", status);
            break;
        }

        shared.decoded.fetch_add(1, Ordering::Relaxed);
        shared.queue.pop_front();
    }

    log::trace!("decode worker exit");
    shared.set_state(WorkerState::Exited);
}
