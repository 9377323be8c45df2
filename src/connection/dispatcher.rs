//! Per-connection FIFO of response handlers.

use std::collections::VecDeque;

use crate::error::BoltError;
use crate::message::ServerMessage;
use crate::protocol::handlers::ResponseHandler;

struct PendingResponse {
    handler: Box<dyn ResponseHandler>,
    streams_records: bool,
}

/// What the reader should report after a message has been dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// The server reported a failure; the connection is now broken.
    Failed { role_change: bool },
    /// The connection broke for a reason other than a server FAILURE.
    Broken,
}

/// Correlates replies with requests. Handlers are queued in the order their
/// requests are written and consumed strictly in that order.
#[derive(Default)]
pub struct ResponseDispatcher {
    queue: VecDeque<PendingResponse>,
    broken: Option<String>,
}

impl ResponseDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for the next request written to the wire.
    pub fn queue(&mut self, handler: Box<dyn ResponseHandler>, streams_records: bool) {
        self.queue.push_back(PendingResponse {
            handler,
            streams_records,
        });
    }

    /// Unanswered requests.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn broken_reason(&self) -> Option<&str> {
        self.broken.as_deref()
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    pub fn dispatch(&mut self, msg: ServerMessage) -> Outcome {
        if self.broken.is_some() {
            tracing::trace!(message = msg.name(), "discarding reply on broken connection");
            return Outcome::Handled;
        }

        match msg {
            ServerMessage::Record { data } => match self.queue.front_mut() {
                Some(head) if head.streams_records => {
                    head.handler.on_record(data);
                    Outcome::Handled
                }
                _ => {
                    self.fail_all(BoltError::Protocol(
                        "RECORD received for a request that does not stream records".into(),
                    ));
                    Outcome::Broken
                }
            },
            ServerMessage::Success { metadata } => match self.queue.pop_front() {
                Some(mut head) => {
                    head.handler.on_success(metadata);
                    Outcome::Handled
                }
                None => self.unexpected("SUCCESS"),
            },
            ServerMessage::Ignored => match self.queue.pop_front() {
                Some(mut head) => {
                    head.handler.on_ignored();
                    Outcome::Handled
                }
                None => self.unexpected("IGNORED"),
            },
            ServerMessage::Failure { metadata } => {
                let error = BoltError::from_failure(&metadata);
                let role_change = matches!(error, BoltError::SessionExpired(_));
                if self.queue.is_empty() {
                    return self.unexpected("FAILURE");
                }
                self.fail_all(error);
                Outcome::Failed { role_change }
            }
        }
    }

    /// Marks the connection broken. The first handler someone waits on gets
    /// `error`, so a failed pipelined request that nobody observes (a queued
    /// BEGIN) is reported on the next one that is observed. Every other
    /// pending handler gets a connectivity error naming it.
    pub fn fail_all(&mut self, error: BoltError) {
        let reason = error.to_string();
        if self.broken.is_none() {
            self.broken = Some(reason.clone());
        }
        let mut error = Some(error);
        for mut pending in self.queue.drain(..) {
            let delivered = if pending.handler.is_observed() {
                error.take()
            } else {
                None
            };
            pending.handler.on_failure(delivered.unwrap_or_else(|| {
                BoltError::Connectivity(format!("connection broken by an earlier failure: {reason}"))
            }));
        }
    }

    fn unexpected(&mut self, name: &str) -> Outcome {
        self.fail_all(BoltError::Protocol(format!(
            "{name} received with no request pending"
        )));
        Outcome::Broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handlers::{completed, CompletionHandler, NoOpHandler, StreamEvent, StreamHandler};
    use crate::types::{BoltDict, BoltValue};

    fn success(key: &str) -> ServerMessage {
        ServerMessage::Success {
            metadata: BoltDict::from([(key.to_string(), BoltValue::Boolean(true))]),
        }
    }

    fn failure(code: &str) -> ServerMessage {
        ServerMessage::Failure {
            metadata: BoltDict::from([
                ("code".to_string(), BoltValue::from(code)),
                ("message".to_string(), BoltValue::from("nope")),
            ]),
        }
    }

    #[tokio::test]
    async fn replies_are_matched_in_request_order() {
        let mut dispatcher = ResponseDispatcher::new();
        let receivers: Vec<_> = (0..5)
            .map(|_| {
                let (handler, rx) = CompletionHandler::new();
                dispatcher.queue(Box::new(handler), false);
                rx
            })
            .collect();
        assert_eq!(dispatcher.pending(), 5);

        for i in 0..5 {
            dispatcher.dispatch(success(&format!("reply{i}")));
        }
        assert_eq!(dispatcher.pending(), 0);

        for (i, rx) in receivers.into_iter().enumerate() {
            let metadata = completed(rx).await.unwrap();
            assert!(metadata.contains_key(&format!("reply{i}")));
        }
    }

    #[tokio::test]
    async fn records_do_not_pop_the_head() {
        let mut dispatcher = ResponseDispatcher::new();
        let (stream, mut rx) = StreamHandler::new();
        dispatcher.queue(Box::new(stream), true);

        dispatcher.dispatch(ServerMessage::Record { data: vec![BoltValue::Integer(1)] });
        dispatcher.dispatch(ServerMessage::Record { data: vec![BoltValue::Integer(2)] });
        assert_eq!(dispatcher.pending(), 1);
        dispatcher.dispatch(success("done"));
        assert_eq!(dispatcher.pending(), 0);

        let mut records = 0;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Record(_) => records += 1,
                StreamEvent::Done(result) => {
                    assert!(result.is_ok());
                    break;
                }
            }
        }
        assert_eq!(records, 2);
    }

    #[tokio::test]
    async fn unobserved_failure_reaches_next_waiter() {
        let mut dispatcher = ResponseDispatcher::new();
        let (run, rx_run) = CompletionHandler::new();
        let (pull, mut rx_pull) = StreamHandler::new();
        dispatcher.queue(Box::new(NoOpHandler), false);
        dispatcher.queue(Box::new(run), false);
        dispatcher.queue(Box::new(pull), true);

        let outcome = dispatcher.dispatch(failure("Neo.ClientError.Cluster.NotALeader"));
        assert_eq!(outcome, Outcome::Failed { role_change: true });

        let err = completed(rx_run).await.unwrap_err();
        assert!(matches!(err, BoltError::SessionExpired(_)));
        assert!(err.is_retryable());
        match rx_pull.recv().await {
            Some(StreamEvent::Done(Err(e))) => assert!(e.is_connectivity()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_drains_queue_and_breaks() {
        let mut dispatcher = ResponseDispatcher::new();
        let (first, rx1) = CompletionHandler::new();
        let (second, rx2) = CompletionHandler::new();
        dispatcher.queue(Box::new(first), false);
        dispatcher.queue(Box::new(second), true);

        let outcome = dispatcher.dispatch(failure("Neo.ClientError.Statement.SyntaxError"));
        assert_eq!(outcome, Outcome::Failed { role_change: false });
        assert!(dispatcher.is_broken());
        assert_eq!(dispatcher.pending(), 0);

        assert!(matches!(completed(rx1).await, Err(BoltError::Query { .. })));
        let err = completed(rx2).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(err.to_string().contains("SyntaxError"));

        // Later IGNORED replies are discarded.
        assert_eq!(dispatcher.dispatch(ServerMessage::Ignored), Outcome::Handled);
    }

    #[test]
    fn not_a_leader_is_flagged_as_role_change() {
        let mut dispatcher = ResponseDispatcher::new();
        let (handler, _rx) = CompletionHandler::new();
        dispatcher.queue(Box::new(handler), false);
        let outcome = dispatcher.dispatch(failure("Neo.ClientError.Cluster.NotALeader"));
        assert_eq!(outcome, Outcome::Failed { role_change: true });
    }

    #[tokio::test]
    async fn record_for_non_streaming_request_is_protocol_error() {
        let mut dispatcher = ResponseDispatcher::new();
        let (handler, rx) = CompletionHandler::new();
        dispatcher.queue(Box::new(handler), false);
        let outcome = dispatcher.dispatch(ServerMessage::Record { data: vec![] });
        assert_eq!(outcome, Outcome::Broken);
        assert!(matches!(completed(rx).await, Err(BoltError::Protocol(_))));
    }

    #[test]
    fn unsolicited_success_breaks_connection() {
        let mut dispatcher = ResponseDispatcher::new();
        assert_eq!(dispatcher.dispatch(success("x")), Outcome::Broken);
        assert!(dispatcher.is_broken());
    }
}
