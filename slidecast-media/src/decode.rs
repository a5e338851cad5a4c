//! Asynchronous decode of processed frames
//!
//! Every submitted data URL gets a monotonically increasing sequence number
//! and is decoded on the blocking pool. At most `capacity` decodes run at
//! once. A submission that arrives while the pool is full waits in a single
//! slot, and a newer submission overwrites it, so a burst of inbound frames
//! costs at most `capacity + 1` decodes. Completions are reported in arrival
//! order, and one is only [`DecodeOutcome::Ready`] when it is newer than
//! everything rendered so far. [`DecodeCanceller::cancel`] makes every
//! running or waiting decode stale; a decode that has not started yet skips
//! the work entirely.

use crate::codec::decode_data_url;
use crate::error::MediaResult;
use crate::frame::VideoFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Default number of decodes running at once
pub const DEFAULT_DECODE_CAPACITY: usize = 2;

/// Result of one decode
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Newest frame so far; render it
    Ready {
        /// Submission sequence
        sequence: u64,
        /// Decoded pixels
        frame: VideoFrame,
    },
    /// Decode failed
    Failed {
        /// Submission sequence
        sequence: u64,
        /// What went wrong
        error: crate::error::MediaError,
    },
    /// Older than the last rendered frame, or cancelled
    Stale {
        /// Submission sequence
        sequence: u64,
    },
}

impl DecodeOutcome {
    /// Sequence the outcome belongs to
    pub fn sequence(&self) -> u64 {
        match self {
            DecodeOutcome::Ready { sequence, .. }
            | DecodeOutcome::Failed { sequence, .. }
            | DecodeOutcome::Stale { sequence } => *sequence,
        }
    }
}

struct Completion {
    epoch: u64,
    sequence: u64,
    /// `None` when the decode was skipped after cancellation
    result: Option<MediaResult<VideoFrame>>,
}

struct Waiting {
    epoch: u64,
    sequence: u64,
    data_url: String,
}

/// Cancels every decode in flight; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct DecodeCanceller {
    epoch: Arc<AtomicU64>,
}

impl DecodeCanceller {
    /// Make every in-flight decode stale
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Bounded queue of in-flight decodes
pub struct DecodeQueue {
    capacity: usize,
    next_sequence: u64,
    running: VecDeque<u64>,
    waiting: Option<Waiting>,
    last_rendered: Option<u64>,
    started: u64,
    canceller: DecodeCanceller,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl DecodeQueue {
    /// Create a queue running at most `capacity` decodes at once
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            capacity: capacity.max(1),
            next_sequence: 1,
            running: VecDeque::new(),
            waiting: None,
            last_rendered: None,
            started: 0,
            canceller: DecodeCanceller::default(),
            tx,
            rx,
        }
    }

    /// Handle that cancels this queue's in-flight decodes
    pub fn canceller(&self) -> DecodeCanceller {
        self.canceller.clone()
    }

    /// Decodes submitted whose outcome has not been reported yet
    pub fn in_flight(&self) -> usize {
        self.running.len() + usize::from(self.waiting.is_some())
    }

    /// Decodes handed to the blocking pool so far
    pub fn decodes_started(&self) -> u64 {
        self.started
    }

    /// Sequence of the last frame reported ready
    pub fn last_rendered(&self) -> Option<u64> {
        self.last_rendered
    }

    /// Queue a data URL for decoding; returns its sequence number
    pub fn submit(&mut self, data_url: String) -> u64 {
        let epoch = self.canceller.current();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.running.len() < self.capacity {
            self.spawn(epoch, sequence, data_url);
        } else if let Some(superseded) = self.waiting.replace(Waiting {
            epoch,
            sequence,
            data_url,
        }) {
            debug!(sequence = superseded.sequence, "Decode superseded");
        }

        sequence
    }

    fn spawn(&mut self, epoch: u64, sequence: u64, data_url: String) {
        self.started += 1;
        self.running.push_back(sequence);

        let tx = self.tx.clone();
        let canceller = self.canceller.clone();
        tokio::task::spawn_blocking(move || {
            let result = (canceller.current() == epoch).then(|| decode_data_url(&data_url));
            // The queue may be gone.
            let _ = tx.send(Completion {
                epoch,
                sequence,
                result,
            });
        });
    }

    fn start_waiting(&mut self) {
        if self.running.len() >= self.capacity {
            return;
        }
        if let Some(waiting) = self.waiting.take() {
            if waiting.epoch != self.canceller.current() {
                debug!(sequence = waiting.sequence, "Dropping cancelled decode");
                return;
            }
            self.spawn(waiting.epoch, waiting.sequence, waiting.data_url);
        }
    }

    /// Wait for the next decode to finish
    ///
    /// Pending forever when nothing is in flight, so it can sit in a
    /// `select!` next to the inbound queue.
    pub async fn next_outcome(&mut self) -> DecodeOutcome {
        match self.rx.recv().await {
            Some(completion) => {
                let outcome = self.classify(completion);
                self.start_waiting();
                outcome
            }
            // The queue owns a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    fn classify(&mut self, completion: Completion) -> DecodeOutcome {
        let Completion {
            epoch,
            sequence,
            result,
        } = completion;
        self.running.retain(|&running| running != sequence);

        let cancelled = epoch != self.canceller.current();
        let older = self.last_rendered.is_some_and(|last| sequence < last);
        let result = match result {
            Some(result) if !cancelled && !older => result,
            _ => {
                debug!(sequence, cancelled, older, "Dropping stale decode");
                return DecodeOutcome::Stale { sequence };
            }
        };

        match result {
            Ok(frame) => {
                self.last_rendered = Some(sequence);
                DecodeOutcome::Ready { sequence, frame }
            }
            Err(error) => DecodeOutcome::Failed { sequence, error },
        }
    }
}

impl Default for DecodeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_CAPACITY)
    }
}
