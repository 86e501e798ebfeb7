// Raw byte transport between two endpoints.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Byte-oriented frame transport between the executive and an isolate.
///
/// A transport may reserve the first `data_offset()` bytes of every received
/// frame for its own framing; message decoding starts after them.
pub trait Transport: Send + Sync {
    /// Number of leading bytes of each received frame owned by the transport.
    fn data_offset(&self) -> usize;

    /// Sends one frame of message bytes.
    ///
    /// # Returns
    /// * `Ok(())` if the frame was queued
    /// * `Err(io::Error)` with `WouldBlock` when full, `BrokenPipe` when the peer is gone
    fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Receives one frame, waiting up to `timeout`.
    ///
    /// # Returns
    /// * `Ok(Some(frame))` if a frame arrived, including the reserved prefix
    /// * `Ok(None)` if the timeout was reached
    /// * `Err(io::Error)` with `BrokenPipe` once the peer is gone and nothing is left
    fn receive_timeout(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Stops the transport; blocked receivers return `BrokenPipe`.
    fn close(&self) {}
}

/// Default bound on queued frames per direction.
pub const DEFAULT_MAX_FRAMES: usize = 1024;

struct FrameQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    closed: AtomicBool,
    max_frames: usize,
}

impl FrameQueue {
    fn new(max_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
            max_frames,
        })
    }

    fn close(&self) {
        // take the lock so a receiver between its check and its wait sees the flag
        let _frames = self.frames.lock();
        self.closed.store(true, Ordering::Release);
        self.ready.notify_all();
    }
}

/// In-memory transport endpoint; created in connected pairs.
///
/// Used to wire an executive and an isolate inside one process, which is how
/// the tests and the demo drive the messaging stack.
pub struct LoopbackTransport {
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    data_offset: usize,
}

impl LoopbackTransport {
    /// Two connected endpoints with no reserved prefix.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(0, DEFAULT_MAX_FRAMES)
    }

    /// Two connected endpoints reserving `data_offset` leading bytes per frame.
    /// When at least four bytes are reserved the first four carry the message
    /// length, big-endian.
    pub fn pair_with(data_offset: usize, max_frames: usize) -> (Self, Self) {
        let a_to_b = FrameQueue::new(max_frames);
        let b_to_a = FrameQueue::new(max_frames);
        let a = Self {
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
            data_offset,
        };
        let b = Self {
            inbound: a_to_b,
            outbound: b_to_a,
            data_offset,
        };
        (a, b)
    }

    /// Number of frames waiting to be received on this endpoint.
    pub fn pending(&self) -> usize {
        self.inbound.frames.lock().len()
    }

    fn frame(&self, message: &[u8]) -> io::Result<Vec<u8>> {
        let mut frame = vec![0u8; self.data_offset + message.len()];
        if self.data_offset >= 4 {
            frame[..4].copy_from_slice(&length_prefix(message.len())?);
        }
        frame[self.data_offset..].copy_from_slice(message);
        Ok(frame)
    }
}

/// Big-endian u32 length carried in the reserved frame prefix.
fn length_prefix(len: usize) -> io::Result<[u8; 4]> {
    u32::try_from(len).map(u32::to_be_bytes).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Frame of {} bytes does not fit the length prefix", len),
        )
    })
}

impl Transport for LoopbackTransport {
    fn data_offset(&self) -> usize {
        self.data_offset
    }

    fn send(&self, message: &[u8]) -> io::Result<()> {
        let frame = self.frame(message)?;
        let mut frames = self.outbound.frames.lock();
        if self.outbound.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Peer has terminated",
            ));
        }
        if frames.len() >= self.outbound.max_frames {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Failed to enqueue frame - queue full",
            ));
        }
        frames.push_back(frame);
        self.outbound.ready.notify_one();
        Ok(())
    }

    fn receive_timeout(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut frames = self.inbound.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return Ok(Some(frame));
            }
            if self.inbound.closed.load(Ordering::Acquire) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Peer has terminated",
                ));
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .inbound
                        .ready
                        .wait_until(&mut frames, deadline)
                        .timed_out()
                    {
                        return Ok(frames.pop_front());
                    }
                }
                // too far out to represent: wait without a deadline
                None => self.inbound.ready.wait(&mut frames),
            }
        }
    }

    fn close(&self) {
        self.inbound.close();
        self.outbound.close();
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}
