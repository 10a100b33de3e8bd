//! Pull-driven record sequences.
//!
//! An iterator's crawl runs as a producer task that pushes into a bounded
//! channel of capacity one, so at most one item is produced ahead of the
//! consumer. The consumer pulls with [`RecordStream::next`] (or through the
//! [`Stream`] impl) and signals that it wants nothing more with
//! [`RecordStream::close`] or by dropping the stream. Producers observe that
//! signal through [`Emitter::is_closed`] and failed sends.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::IterateError;
use crate::record::Record;

pub type RecordResult = Result<Record, IterateError>;

/// Consumer side of a crawl.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<RecordResult>,
    producer: Option<JoinHandle<()>>,
}

impl RecordStream {
    /// Runs `produce` on the current tokio runtime, feeding a new stream.
    pub fn spawn<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let producer = tokio::spawn(produce(Emitter { tx }));
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// A stream holding a single error.
    pub fn failed(err: IterateError) -> Self {
        Self::spawn(|out| async move {
            out.error(err).await;
        })
    }

    /// Pulls the next record or error. `None` once the crawl is finished.
    pub async fn next(&mut self) -> Option<RecordResult> {
        self.rx.recv().await
    }

    /// Stops the crawl and waits for the producer to wind down. Work already
    /// dispatched finishes; its results are discarded.
    pub async fn close(mut self) {
        self.rx.close();
        while let Some(item) = self.rx.recv().await {
            if let Ok(rec) = item {
                rec.close();
            }
        }
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                warn!(error = %e, "Record producer did not finish cleanly");
            }
        }
    }

    /// Drains the stream, separating records from errors.
    pub async fn collect_all(mut self) -> (Vec<Record>, Vec<IterateError>) {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(rec) => records.push(rec),
                Err(e) => errors.push(e),
            }
        }
        (records, errors)
    }
}

impl Stream for RecordStream {
    type Item = RecordResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Producer side of a crawl. Cheap to clone; every clone feeds the same
/// stream, which is how concurrent sub-crawls fan in.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::Sender<RecordResult>,
}

impl Emitter {
    /// Hands a record to the consumer. Returns `false` if the consumer has
    /// stopped, in which case the record is released.
    pub async fn record(&self, rec: Record) -> bool {
        match self.tx.send(Ok(rec)).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(item)) => {
                if let Ok(rec) = item {
                    rec.close();
                }
                false
            }
        }
    }

    /// Hands an error to the consumer. Returns `false` if the consumer has stopped.
    pub async fn error(&self, err: IterateError) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }

    /// Whether the consumer has closed or dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
