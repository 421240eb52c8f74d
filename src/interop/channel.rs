//! Chunk channel between the native-call worker and the async consumer.
//!
//! A streaming command runs the blocking native call on one worker thread and
//! delivers decoded chunks to the async consumer through an unbounded
//! single-producer single-consumer channel. The producer side never blocks the
//! native callback; the consumer side is a [`Stream`]. Completion carries an
//! optional fault and is idempotent: the first completion wins, later ones are
//! no-ops.

use crate::error::{LocalError, Result};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

enum Event<T> {
    Chunk(T),
    Done(Option<LocalError>),
}

/// Producer half. Held by the worker driving the native call.
pub struct ChunkSender<T> {
    tx: mpsc::UnboundedSender<Event<T>>,
    completed: AtomicBool,
}

impl<T> ChunkSender<T> {
    /// Deliver one chunk without blocking.
    ///
    /// Returns `false` when the chunk was dropped: the channel is already
    /// completed or the consumer went away. A dropped consumer is
    /// cancellation, not a failure, so callers ignore the return value unless
    /// they want to stop producing early.
    pub fn send(&self, chunk: T) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Event::Chunk(chunk)).is_ok()
    }

    /// Terminate the stream, optionally with a fault.
    ///
    /// Only the first completion takes effect; the return value reports
    /// whether this call was it. Chunks sent after completion are discarded.
    pub fn complete(&self, fault: Option<LocalError>) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.send(Event::Done(fault));
        true
    }

    /// Whether the stream has already been completed.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Consumer half: yields each chunk as `Ok`, then either ends (success) or
/// yields a single `Err` and ends (fault).
///
/// Dropping the stream cancels consumption; the producer keeps running but
/// everything it sends afterwards is discarded.
pub struct ChunkStream<T> {
    rx: mpsc::UnboundedReceiver<Event<T>>,
    finished: bool,
}

impl<T> Stream for ChunkStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Event::Chunk(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Event::Done(fault))) => {
                self.finished = true;
                Poll::Ready(fault.map(Err))
            }
            // Producer dropped without completing; treat as end of stream.
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<T> ChunkStream<T> {
    /// Collect every chunk, surfacing the fault if the stream ends with one.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        use tokio_stream::StreamExt;
        let mut chunks = Vec::new();
        while let Some(item) = self.next().await {
            chunks.push(item?);
        }
        Ok(chunks)
    }
}

/// Create a connected sender/stream pair.
pub fn channel<T>() -> (ChunkSender<T>, ChunkStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChunkSender {
            tx,
            completed: AtomicBool::new(false),
        },
        ChunkStream {
            rx,
            finished: false,
        },
    )
}
