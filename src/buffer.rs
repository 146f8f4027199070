// Pending-input plumbing shared between the caller thread and the decode
// worker: owned encoded buffers and the bounded FIFO they wait in.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

/// How many encoded buffers may wait for the decode worker at once.
/// Submission blocks once the queue is full.
pub const DECODE_QUEUE_SIZE: usize = 8;

/// One encoded access unit queued for the decode worker.
///
/// Created by the caller on submission (the packet payload is copied) and
/// dropped by the worker once the decoder has consumed it. The end-of-stream
/// flush is never materialized as a `DecodeBuffer`; the worker issues an
/// empty decode call directly.
#[derive(Debug, Clone)]
pub struct DecodeBuffer {
    pub data: Bytes,
    pub pts: Option<i64>,
}

impl DecodeBuffer {
    pub fn new(data: &[u8], pts: Option<i64>) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            pts,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Bounded FIFO of pending encoded buffers.
///
/// Only the caller appends; only the worker removes. `work_ready` wakes the
/// worker on a submission or an end-of-stream signal; `space_freed` wakes a
/// submitter blocked on a full queue.
pub(crate) struct InputQueue {
    entries: Mutex<VecDeque<DecodeBuffer>>,
    capacity: usize,
    work_ready: Condvar,
    space_freed: Condvar,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            work_ready: Condvar::new(),
            space_freed: Condvar::new(),
        }
    }

    /// Append a buffer if a slot is free and wake the worker.
    /// Returns the buffer back when the queue is at capacity.
    pub fn try_push(&self, buffer: DecodeBuffer) -> Result<(), DecodeBuffer> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(buffer);
        }
        entries.push_back(buffer);
        self.work_ready.notify_one();
        Ok(())
    }

    /// Block briefly until a slot may have freed. The caller re-checks its
    /// own abort conditions between waits.
    pub fn wait_space(&self, timeout: std::time::Duration) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            let _ = self.space_freed.wait_for(&mut entries, timeout);
        }
    }

    /// Worker side: the front buffer, left in place, or `None` once the
    /// queue is empty and `got_eos` reports end-of-stream. Blocks on
    /// `work_ready` while the queue is empty and the stream is still open.
    pub fn next_pending<F: Fn() -> bool>(&self, got_eos: F) -> Option<DecodeBuffer> {
        let mut entries = self.entries.lock();
        loop {
            if let Some(front) = entries.front() {
                return Some(front.clone());
            }
            if got_eos() {
                return None;
            }
            log::trace!("decode worker waiting with empty queue");
            self.work_ready.wait(&mut entries);
        }
    }

    /// Worker side: drop the front buffer after the decoder consumed it and
    /// wake one blocked submitter.
    pub fn pop_front(&self) -> Option<DecodeBuffer> {
        let mut entries = self.entries.lock();
        let buffer = entries.pop_front();
        if buffer.is_some() {
            self.space_freed.notify_one();
        }
        buffer
    }

    /// Wake the worker without appending (end-of-stream or teardown signal).
    /// Takes the queue lock so the wake cannot slip between the worker's
    /// empty check and its wait.
    pub fn wake_worker(&self) {
        let _entries = self.entries.lock();
        self.work_ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop all still-queued buffers. Returns how many were discarded.
    pub fn drain(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        self.space_freed.notify_all();
        count
    }
}
