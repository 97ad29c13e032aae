// src/services/stream.rs

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};

use crate::models::event::StreamEvent;

pub const DEADLINE_MESSAGE: &str =
    "This is taking longer than expected. Your quiz keeps processing in the background; refresh to see the result.";

/// One-way, ordered event stream to the caller.
///
/// A deadline timer is armed on open. When it fires it emits a single `error`
/// event and closes the channel; the orchestration feeding the channel is not
/// cancelled. A terminal event (`complete` or `error`) also closes it, so at
/// most one terminal event is ever delivered. Dropping the channel disarms the
/// timer.
pub struct StreamChannel {
    inner: Arc<ChannelInner>,
    deadline: Option<JoinHandle<()>>,
}

struct ChannelInner {
    // `None` once a terminal event went out.
    sender: Mutex<Option<UnboundedSender<StreamEvent>>>,
}

impl ChannelInner {
    fn send(&self, event: StreamEvent) -> bool {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return false;
        };

        let terminal = event.is_terminal();
        if tx.send(event).is_err() {
            tracing::debug!("Stream receiver gone; continuing without client");
        }
        if terminal {
            *sender = None;
        }
        true
    }

    fn close(&self) {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl StreamChannel {
    /// Opens a channel and arms its deadline. Must be called inside a Tokio runtime.
    pub fn open(deadline: Duration) -> (Self, UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ChannelInner {
            sender: Mutex::new(Some(tx)),
        });

        let timer = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if inner.send(StreamEvent::error(DEADLINE_MESSAGE)) {
                    tracing::warn!(
                        "Stream deadline of {:?} reached; suppressing further events",
                        deadline
                    );
                }
            })
        };

        (
            Self {
                inner,
                deadline: Some(timer),
            },
            rx,
        )
    }

    /// Delivers `event` unless the channel is already closed.
    /// Returns whether the event was accepted.
    pub fn emit(&self, event: StreamEvent) -> bool {
        self.inner.send(event)
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
        self.inner.close();
    }
}

/// Frames the receiving end as a `text/event-stream` response, one JSON
/// object per `data:` frame.
pub fn sse_response(
    events: UnboundedReceiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(events).map(|event| {
        let frame = Event::default().json_data(&event).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize stream event: {}", e);
            Event::default().data(r#"{"type":"error","message":"Internal Server Error"}"#)
        });
        Ok(frame)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
