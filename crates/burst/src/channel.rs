// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bounded single-producer/single-consumer packet queues.
//!
//! A queue holds whole frames up to a byte capacity. Senders never block:
//! a frame that does not fit is refused with [`BurstError::QueueFull`].
//! Receivers optionally spin for a poll window before blocking on a
//! condition variable.
//!
//! ```text
//! PacketSender ──send(frame)──► [ frame | frame | ... ] ──recv()──► PacketReceiver
//!                                 ≤ capacity bytes
//! ```
//!
//! Either end may invalidate the queue, which discards pending frames and
//! releases a blocked receiver. Dropping an end closes the queue; frames
//! already queued can still be drained.

use crate::BurstError;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct QueueState {
    frames: VecDeque<Vec<u8>>,
    bytes: usize,
    open: bool,
}

struct Shared {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self, discard: bool) {
        let mut state = self.state();
        state.open = false;
        if discard {
            state.frames.clear();
            state.bytes = 0;
        }
        drop(state);
        self.ready.notify_all();
    }
}

/// Creates a queue holding at most `capacity` bytes of frames.
pub fn packet_channel(capacity: usize, poll_window: Duration) -> (PacketSender, PacketReceiver) {
    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(QueueState {
            frames: VecDeque::new(),
            bytes: 0,
            open: true,
        }),
        ready: Condvar::new(),
    });
    (
        PacketSender {
            shared: Arc::clone(&shared),
        },
        PacketReceiver {
            shared,
            poll_window,
        },
    )
}

/// The writing end of a packet queue.
pub struct PacketSender {
    shared: Arc<Shared>,
}

impl PacketSender {
    /// Queues `frame` without blocking.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), BurstError> {
        let mut state = self.shared.state();
        if !state.open {
            return Err(BurstError::ChannelClosed);
        }
        let available = self.shared.capacity.saturating_sub(state.bytes);
        if frame.len() > available {
            return Err(BurstError::QueueFull {
                len: frame.len(),
                available,
                capacity: self.shared.capacity,
            });
        }
        state.bytes += frame.len();
        state.frames.push_back(frame);
        drop(state);
        self.shared.ready.notify_one();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Discards pending frames and closes the queue for both ends.
    pub fn invalidate(&self) {
        self.shared.close(true);
    }

    pub fn is_open(&self) -> bool {
        self.shared.state().open
    }
}

impl Drop for PacketSender {
    fn drop(&mut self) {
        self.shared.close(false);
    }
}

/// The reading end of a packet queue.
pub struct PacketReceiver {
    shared: Arc<Shared>,
    poll_window: Duration,
}

impl PacketReceiver {
    /// Takes the next frame if one is queued. Fails once the queue is
    /// closed and drained.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>, BurstError> {
        let mut state = self.shared.state();
        match pop(&mut state) {
            Some(frame) => Ok(Some(frame)),
            None if state.open => Ok(None),
            None => Err(BurstError::ChannelClosed),
        }
    }

    /// Waits for the next frame, spinning for the poll window first.
    pub fn recv(&self) -> Result<Vec<u8>, BurstError> {
        if !self.poll_window.is_zero() {
            let until = Instant::now() + self.poll_window;
            while Instant::now() < until {
                if let Some(frame) = self.try_recv()? {
                    return Ok(frame);
                }
                std::hint::spin_loop();
            }
        }

        let mut state = self.shared.state();
        loop {
            if let Some(frame) = pop(&mut state) {
                return Ok(frame);
            }
            if !state.open {
                return Err(BurstError::ChannelClosed);
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, BurstError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        loop {
            if let Some(frame) = pop(&mut state) {
                return Ok(Some(frame));
            }
            if !state.open {
                return Err(BurstError::ChannelClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Discards pending frames and closes the queue for both ends.
    pub fn invalidate(&self) {
        self.shared.close(true);
    }
}

impl Drop for PacketReceiver {
    fn drop(&mut self) {
        self.shared.close(false);
    }
}

fn pop(state: &mut QueueState) -> Option<Vec<u8>> {
    let frame = state.frames.pop_front()?;
    state.bytes -= frame.len();
    Some(frame)
}
