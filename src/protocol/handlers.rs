//! Response handlers: the consumers queued on a connection's dispatcher,
//! one per request, fed the server's replies in order.

use tokio::sync::{mpsc, oneshot};

use crate::error::BoltError;
use crate::types::{BoltDict, BoltValue};

/// Receives the reply to one request.
///
/// Exactly one of `on_success`, `on_failure` or `on_ignored` is called, after
/// any number of `on_record` calls.
pub trait ResponseHandler: Send {
    fn on_success(&mut self, metadata: BoltDict);

    fn on_failure(&mut self, error: BoltError);

    fn on_record(&mut self, _fields: Vec<BoltValue>) {}

    /// Whether a caller waits on this reply. A failure on an unobserved
    /// request is handed to the next observed one.
    fn is_observed(&self) -> bool {
        true
    }

    fn on_ignored(&mut self) {
        self.on_failure(BoltError::Protocol(
            "request ignored by the server after an earlier failure".into(),
        ));
    }
}

/// Drops the reply. Used for pipelined requests nobody waits on.
#[derive(Debug, Default)]
pub struct NoOpHandler;

impl ResponseHandler for NoOpHandler {
    fn on_success(&mut self, _metadata: BoltDict) {}

    fn on_failure(&mut self, error: BoltError) {
        tracing::debug!(error = %error, "unobserved request failed");
    }

    fn is_observed(&self) -> bool {
        false
    }
}

pub type Completion = oneshot::Receiver<Result<BoltDict, BoltError>>;

/// Resolves a oneshot with the SUCCESS metadata or the failure.
pub struct CompletionHandler {
    tx: Option<oneshot::Sender<Result<BoltDict, BoltError>>>,
}

impl CompletionHandler {
    pub fn new() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    fn complete(&mut self, result: Result<BoltDict, BoltError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl ResponseHandler for CompletionHandler {
    fn on_success(&mut self, metadata: BoltDict) {
        self.complete(Ok(metadata));
    }

    fn on_failure(&mut self, error: BoltError) {
        self.complete(Err(error));
    }
}

/// Awaits a completion, treating a dropped handler as a lost connection.
pub async fn completed(rx: Completion) -> Result<BoltDict, BoltError> {
    rx.await.unwrap_or_else(|_| {
        Err(BoltError::Connectivity(
            "connection closed before the server replied".into(),
        ))
    })
}

/// One item of a streamed result.
#[derive(Debug)]
pub enum StreamEvent {
    Record(Vec<BoltValue>),
    /// Terminal: the PULL's SUCCESS metadata or its failure.
    Done(Result<BoltDict, BoltError>),
}

/// Forwards RECORDs and the terminating reply of a PULL into a channel.
pub struct StreamHandler {
    tx: mpsc::UnboundedSender<StreamEvent>,
    done: bool,
}

impl StreamHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, done: false }, rx)
    }

    fn finish(&mut self, result: Result<BoltDict, BoltError>) {
        if !self.done {
            self.done = true;
            let _ = self.tx.send(StreamEvent::Done(result));
        }
    }
}

impl ResponseHandler for StreamHandler {
    fn on_success(&mut self, metadata: BoltDict) {
        self.finish(Ok(metadata));
    }

    fn on_failure(&mut self, error: BoltError) {
        self.finish(Err(error));
    }

    fn on_record(&mut self, fields: Vec<BoltValue>) {
        // A dropped receiver means the caller lost interest; the connection
        // is disposed on release because this request is still pending.
        let _ = self.tx.send(StreamEvent::Record(fields));
    }
}
