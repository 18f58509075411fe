//! Streaming iteration over every record matched by a query.
//!
//! [`Query::each`] turns the page-at-a-time search primitive into an unbounded stream. A
//! background task fetches pages strictly one after another, sorted by object id, and
//! advances with an `objectId > last seen` constraint instead of an offset, so records
//! inserted or removed outside the consumed range never shift the window. Each record is
//! sent into the caller's channel; a send that would block races against cancellation,
//! which always wins.
//!
//! A page shorter than the page size ends the iteration, so when the match count is an
//! exact multiple of the page size the last fetch returns an empty page.
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let cursor = client.query::<GameScore>().each(tx)?;
//! while let Some(score) = rx.recv().await {
//!     if score.score > 9000 {
//!         cursor.cancel();
//!     }
//! }
//! cursor.done().await?;
//! ```

use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, ready},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{
    error::{ParseError, ParseResult},
    query::Query,
    record::Record,
};

#[derive(Debug, Default)]
struct State {
    iterating: AtomicBool,
    error: Mutex<Option<ParseError>>,
}

impl State {
    /// Records `err` unless an earlier terminal error was recorded.
    fn latch(&self, err: ParseError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn error(&self) -> Option<ParseError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A cloneable handle that can stop an iteration from anywhere.
#[derive(Debug, Clone)]
pub struct Canceller {
    token: CancellationToken,
    state: Arc<State>,
}

impl Canceller {
    /// Stops the iteration. No record is sent after the request is observed; a fetch in
    /// flight completes but its records are discarded.
    ///
    /// Idempotent, and a no-op once iteration has finished.
    pub fn cancel(&self) {
        if self.state.iterating.load(Ordering::Acquire) {
            self.token.cancel();
        }
    }

    /// Stops the iteration and records `err` as its terminal error.
    pub fn cancel_with_error(&self, err: ParseError) {
        if self.state.iterating.load(Ordering::Acquire) {
            self.state.latch(err);
            self.token.cancel();
        }
    }
}

/// A running iteration started by [`Query::each`].
///
/// The iteration finishes when the query is exhausted, a page fetch fails, the caller
/// cancels, or the receiving side of the sink is dropped. The sink is closed first, then
/// the outcome is delivered once through [`done`](Self::done).
#[derive(Debug)]
pub struct Cursor {
    canceller: Canceller,
    done: oneshot::Receiver<ParseResult<()>>,
}

impl Cursor {
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn cancel_with_error(&self, err: ParseError) {
        self.canceller.cancel_with_error(err);
    }

    /// Returns a handle that can cancel the iteration after the cursor is consumed by
    /// [`done`](Self::done).
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Returns the terminal error, if iteration stopped because of one.
    pub fn error(&self) -> Option<ParseError> {
        self.canceller.state.error()
    }

    pub fn is_iterating(&self) -> bool {
        self.canceller.state.iterating.load(Ordering::Acquire)
    }

    /// Waits for iteration to finish and returns its outcome: `Ok(())` after exhaustion or
    /// a plain cancellation, the terminal error otherwise.
    pub async fn done(self) -> ParseResult<()> {
        self.done.await.unwrap_or_else(|_| {
            Err(ParseError::Transport("iteration task ended without a result".to_owned()))
        })
    }
}

impl<R: Record> Query<R> {
    /// Iterates over every matching record, sending each one into `sink`.
    ///
    /// Records arrive in ascending object id order, fetched [`batch_size`](Self::batch_size)
    /// at a time. The sink's element type can be `R` itself or anything convertible from
    /// it, such as [`Object`](crate::object::Object).
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidQuery`] if the query has a sort order, limit or skip.
    pub fn each<T>(&self, sink: mpsc::Sender<T>) -> ParseResult<Cursor>
    where
        T: From<R> + Send + 'static,
    {
        if self.has_window() {
            return Err(ParseError::InvalidQuery(
                "cannot iterate over a query with a sort, limit, or skip".to_owned(),
            ));
        }

        let page_size = self.batch_size() as usize;
        let mut query = self.clone();
        query.order_by(["objectId"]).limit(page_size);

        let canceller = Canceller {
            token: CancellationToken::new(),
            state: Arc::new(State::default()),
        };
        canceller.state.iterating.store(true, Ordering::Release);

        let (done_tx, done_rx) = oneshot::channel();
        let task = canceller.clone();
        tokio::spawn(async move {
            let mut result = iterate(query, sink, &task.token).await;
            match &result {
                Err(err) => {
                    warn!(class = R::class_name(), error = %err, "Iteration failed");
                    task.state.latch(err.clone());
                }
                Ok(()) => {
                    if let Some(err) = task.state.error() {
                        result = Err(err);
                    }
                }
            }
            task.state.iterating.store(false, Ordering::Release);
            let _ = done_tx.send(result);
        });

        Ok(Cursor { canceller, done: done_rx })
    }

    /// Iterates over every matching record as a [`Stream`].
    ///
    /// A terminal error is yielded as the last item. Dropping the stream cancels the
    /// iteration.
    ///
    /// # Errors
    ///
    /// Same as [`each`](Self::each).
    pub fn stream(&self) -> ParseResult<RecordStream<R>> {
        let (tx, rx) = mpsc::channel(self.batch_size() as usize);
        let cursor = self.each(tx)?;
        Ok(RecordStream {
            records: rx,
            canceller: cursor.canceller,
            done: Some(cursor.done),
        })
    }
}

/// Fetches pages until the query is exhausted. The sink is dropped on return.
async fn iterate<R, T>(
    mut query: Query<R>,
    sink: mpsc::Sender<T>,
    token: &CancellationToken,
) -> ParseResult<()>
where
    R: Record,
    T: From<R> + Send,
{
    let page_size = query.limit_value().unwrap_or_default();
    let mut pages = 0_usize;
    loop {
        if token.is_cancelled() {
            trace!(pages, "Iteration cancelled");
            return Ok(());
        }

        let page = query.fetch_page().await?;
        pages += 1;
        trace!(page = pages, records = page.len(), "Fetched page");

        let exhausted = page.len() < page_size;
        let last_id = page
            .last()
            .and_then(|record| record.object_id())
            .map(str::to_owned);

        for record in page {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(pages, "Iteration cancelled");
                    return Ok(());
                }
                sent = sink.send(T::from(record)) => {
                    if sent.is_err() {
                        trace!(pages, "Receiver dropped");
                        return Ok(());
                    }
                }
            }
        }

        if exhausted {
            return Ok(());
        }
        match last_id {
            Some(id) if !id.is_empty() => {
                query.greater_than("objectId", id);
            }
            _ => return Ok(()),
        }
    }
}

/// A [`Stream`] of the records matched by a query, created by [`Query::stream`].
#[derive(Debug)]
pub struct RecordStream<R> {
    records: mpsc::Receiver<R>,
    canceller: Canceller,
    done: Option<oneshot::Receiver<ParseResult<()>>>,
}

impl<R> RecordStream<R> {
    /// Stops the iteration. Records already buffered are still yielded.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }
}

impl<R> Unpin for RecordStream<R> {}

impl<R> Stream for RecordStream<R> {
    type Item = ParseResult<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(record) = ready!(this.records.poll_recv(cx)) {
            return Poll::Ready(Some(Ok(record)));
        }

        let Some(done) = this.done.as_mut() else {
            return Poll::Ready(None);
        };
        let outcome = ready!(Pin::new(done).poll(cx));
        this.done = None;
        match outcome {
            Ok(Err(err)) => Poll::Ready(Some(Err(err))),
            Ok(Ok(())) | Err(_) => Poll::Ready(None),
        }
    }
}

impl<R> Drop for RecordStream<R> {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}
