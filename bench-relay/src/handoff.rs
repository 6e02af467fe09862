//! Test-case handoff between the orchestrator and the relay.
//!
//! The orchestrator publishes one test case per client run. A publication
//! sits in a capacity-1 queue until exactly one relay consumer (a TCP
//! connection handler, or the UDP engine) takes it. Taking a publication
//! acknowledges it, which is what `publish` waits for, so the next
//! publication is never queued before the previous one was consumed.
//!
//! Every consumed publication also replaces the process-wide "current test
//! case" slot, a `watch` channel, so readers always see a whole value.

use std::sync::Arc;

use netbench_types::{PublicationId, TestCase};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::error::{RelayError, Result};

/// A test case in flight from the orchestrator to the relay.
#[derive(Debug)]
pub struct Publication {
    id: PublicationId,
    case: Arc<TestCase>,
    ack: oneshot::Sender<()>,
}

/// A publication after it was taken by a relay consumer.
#[derive(Debug, Clone)]
pub struct Consumed {
    /// Correlation id of the publication.
    pub id: PublicationId,
    /// The published test case.
    pub case: Arc<TestCase>,
}

/// Orchestrator side of the handoff.
#[derive(Debug)]
pub struct Publisher {
    queue: mpsc::Sender<Publication>,
    current: watch::Receiver<Option<Consumed>>,
}

/// Relay side of the handoff. Cheap to clone; clones share one queue.
#[derive(Debug, Clone)]
pub struct Subscriber {
    queue: Arc<Mutex<mpsc::Receiver<Publication>>>,
    current: Arc<watch::Sender<Option<Consumed>>>,
}

/// Create a connected publisher/subscriber pair.
pub fn handoff() -> (Publisher, Subscriber) {
    let (queue_tx, queue_rx) = mpsc::channel(1);
    let (current_tx, current_rx) = watch::channel(None);
    (
        Publisher {
            queue: queue_tx,
            current: current_rx,
        },
        Subscriber {
            queue: Arc::new(Mutex::new(queue_rx)),
            current: Arc::new(current_tx),
        },
    )
}

impl Publisher {
    /// Publish a test case and wait until a relay consumer took it.
    ///
    /// If the caller stops waiting (e.g. a timeout drops this future), the
    /// publication is marked abandoned and consumers skip it.
    pub async fn publish(&self, case: Arc<TestCase>) -> Result<PublicationId> {
        let id = PublicationId::new();
        let (ack_tx, ack_rx) = oneshot::channel();

        self.queue
            .send(Publication {
                id,
                case,
                ack: ack_tx,
            })
            .await
            .map_err(|_| RelayError::HandoffClosed)?;

        ack_rx.await.map_err(|_| RelayError::HandoffClosed)?;
        Ok(id)
    }

    /// The most recently consumed publication, if any.
    pub fn current(&self) -> Option<Consumed> {
        self.current.borrow().clone()
    }
}

impl Subscriber {
    /// Take the next publication, waiting until one is published.
    ///
    /// Returns [`RelayError::HandoffClosed`] once the publisher is gone.
    pub async fn take(&self) -> Result<Consumed> {
        let mut queue = self.queue.lock().await;
        loop {
            let publication = queue.recv().await.ok_or(RelayError::HandoffClosed)?;

            if publication.ack.is_closed() {
                tracing::debug!(
                    "Skipping abandoned publication {:?}",
                    publication.id
                );
                continue;
            }

            let consumed = Consumed {
                id: publication.id,
                case: publication.case,
            };
            self.current.send_replace(Some(consumed.clone()));

            if publication.ack.send(()).is_err() {
                tracing::debug!("Publisher stopped waiting for {:?}", consumed.id);
            }
            return Ok(consumed);
        }
    }

    /// The most recently consumed publication, if any.
    pub fn current(&self) -> Option<Consumed> {
        self.current.borrow().clone()
    }

    /// The test case of the most recently consumed publication, if any.
    pub fn current_case(&self) -> Option<Arc<TestCase>> {
        self.current.borrow().as_ref().map(|c| c.case.clone())
    }
}
