use core::pin::Pin;
use core::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::Instant;

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that groups items into batches bounded by size and time.
    ///
    /// A batch is emitted when:
    /// - it reaches `batch_size` items,
    /// - the timeout elapses while at least one item is buffered,
    /// - the inner stream ends with items still buffered.
    ///
    /// The timeout ticks periodically and is re-armed after every emitted batch. A tick with
    /// nothing buffered only starts the next period, so an item arriving after an idle spell
    /// waits for the next tick. Items keep their arrival order within and across batches.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<tokio::time::Sleep>,
        items: Vec<S::Item>,
        batch_size: usize,
        batch_timeout: Duration,
        reset_timer: bool,
        inner_stream_ended: bool,
    }
}

impl<S: Stream> BatchStream<S> {
    /// Creates a new [`BatchStream`]. A `batch_size` of zero is treated as one and a zero
    /// `batch_timeout` as one millisecond.
    pub fn wrap(stream: S, batch_size: usize, batch_timeout: Duration) -> Self {
        let batch_size = batch_size.max(1);
        let batch_timeout = batch_timeout.max(Duration::from_millis(1));

        BatchStream {
            stream,
            deadline: None,
            items: Vec::with_capacity(batch_size),
            batch_size,
            batch_timeout,
            reset_timer: true,
            inner_stream_ended: false,
        }
    }
}

impl<S: Stream> Stream for BatchStream<S> {
    type Item = Vec<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.inner_stream_ended {
            return Poll::Ready(None);
        }

        loop {
            if *this.reset_timer {
                this.deadline
                    .set(Some(tokio::time::sleep(*this.batch_timeout)));
                *this.reset_timer = false;
            }

            if this.items.is_empty() {
                this.items.reserve_exact(*this.batch_size);
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => break,
                Poll::Ready(Some(item)) => {
                    this.items.push(item);

                    if this.items.len() >= *this.batch_size {
                        *this.reset_timer = true;
                        return Poll::Ready(Some(std::mem::take(this.items)));
                    }
                }
                Poll::Ready(None) => {
                    let last = if this.items.is_empty() {
                        None
                    } else {
                        *this.reset_timer = true;
                        Some(std::mem::take(this.items))
                    };

                    *this.inner_stream_ended = true;

                    return Poll::Ready(last);
                }
            }
        }

        loop {
            let Some(mut deadline) = this.deadline.as_mut().as_pin_mut() else {
                return Poll::Pending;
            };

            ready!(deadline.as_mut().poll(cx));

            if !this.items.is_empty() {
                *this.reset_timer = true;
                return Poll::Ready(Some(std::mem::take(this.items)));
            }

            // Nothing buffered: the tick is skipped and the timer keeps its period.
            deadline.reset(Instant::now() + *this.batch_timeout);
        }
    }
}
