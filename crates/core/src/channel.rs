//! Per-request event channel between the worker and the streaming consumer.
//!
//! Unbounded FIFO: the worker never waits on the consumer, a slow consumer
//! makes events queue rather than drop. The sender latches on the first
//! terminal event; anything published afterwards is discarded. The stream
//! ends right after the terminal event, and if every sender disappears
//! without one it synthesizes an `error` so the consumer never hangs.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::Event;

/// Reason attached to the synthesized terminal event.
pub const CLOSED_WITHOUT_TERMINAL: &str = "event stream closed before a terminal event";

/// Create the producer and consumer halves of a request's event channel.
pub fn event_channel() -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        },
        EventStream { rx, finished: false },
    )
}

/// Producer half. Cheap to clone; all clones share the terminal latch.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
    terminated: Arc<AtomicBool>,
}

impl EventSender {
    /// Enqueue an event. Returns whether it was accepted.
    ///
    /// Rejected when a terminal event was already published, or when the
    /// consumer has gone away; both are logged and absorbed.
    pub fn publish(&self, event: Event) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::AcqRel) {
                debug!(event = event.event_type(), "Dropping second terminal event");
                return false;
            }
        } else if self.terminated.load(Ordering::Acquire) {
            debug!(event = event.event_type(), "Dropping event published after terminal");
            return false;
        }

        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(event = event.event_type(), "Event consumer gone, dropping event");
                false
            }
        }
    }

    /// Whether a terminal event has been published.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether the consumer half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Finite: ends after the first terminal event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
    finished: bool,
}

impl EventStream {
    /// Receive the next event, or `None` once the terminal event was yielded.
    pub async fn next_event(&mut self) -> Option<Event> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Collect all remaining events, terminal event included.
    pub async fn drain(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Event::error(CLOSED_WITHOUT_TERMINAL, None)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().poll_event(cx)
    }
}
