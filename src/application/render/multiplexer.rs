use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use dashmap::DashMap;
use metrics::gauge;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    application::{error::EngineError, lock::mutex_lock},
    domain::view::{RequestId, ViewRequest, ViewResponse},
};

use super::id_pool::IdPool;

const TARGET: &str = "application::render::multiplexer";

type Settlement = Result<String, EngineError>;

enum PendingSlot {
    Waiting {
        ticket: u64,
        sender: oneshot::Sender<Settlement>,
    },
    /// The caller stopped waiting. The ID stays reserved until the worker
    /// answers so the late response cannot reach a new request.
    Abandoned,
}

/// Inbound side of the multiplexer: pending requests keyed by correlation ID.
///
/// Shared between callers (which register) and the dispatcher task (which
/// delivers worker responses).
#[derive(Clone, Default)]
pub struct ResponseMailbox {
    inner: Arc<MailboxState>,
}

#[derive(Default)]
struct MailboxState {
    pending: DashMap<RequestId, PendingSlot>,
    ids: Mutex<IdPool>,
    tickets: AtomicU64,
    closed: AtomicBool,
}

impl ResponseMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> Result<Registration, EngineError> {
        if self.is_closed() {
            return Err(EngineError::WorkerTerminated);
        }
        let id = mutex_lock(&self.inner.ids, TARGET, "mailbox::register").acquire();
        let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let previous = self
            .inner
            .pending
            .insert(id, PendingSlot::Waiting { ticket, sender });
        debug_assert!(previous.is_none(), "id {id} registered while live");
        gauge!("vista_pending_requests").increment(1.0);

        let registration = Registration {
            id,
            ticket,
            receiver,
            mailbox: self.clone(),
            settled: false,
        };
        // `close` may have drained the map between the check above and the
        // insert; nobody would settle this slot then.
        if self.is_closed() {
            registration.withdraw();
            return Err(EngineError::WorkerTerminated);
        }
        Ok(registration)
    }

    /// Route a worker response to the request carrying the same ID.
    ///
    /// Responses with no matching pending request are discarded; returns
    /// whether a waiting caller was settled.
    pub fn dispatch(&self, response: ViewResponse) -> bool {
        let id = response.id;
        let Some((_, slot)) = self.inner.pending.remove(&id) else {
            debug!(
                target = TARGET,
                op = "mailbox::dispatch",
                result = "discarded",
                request_id = id,
                "Dropped response with no pending request"
            );
            return false;
        };
        self.release(id);

        match slot {
            PendingSlot::Waiting { sender, .. } => {
                let _ = sender.send(settle(response));
                true
            }
            PendingSlot::Abandoned => {
                debug!(
                    target = TARGET,
                    op = "mailbox::dispatch",
                    result = "abandoned",
                    request_id = id,
                    "Late response for an abandoned request"
                );
                false
            }
        }
    }

    /// Reject every pending request with `reason` and free all IDs.
    pub fn cancel_all(&self, reason: &EngineError) -> usize {
        let ids: Vec<RequestId> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        let mut rejected = 0;
        for id in ids {
            if let Some((_, slot)) = self.inner.pending.remove(&id) {
                self.release(id);
                if let PendingSlot::Waiting { sender, .. } = slot {
                    let _ = sender.send(Err(reason.clone()));
                    rejected += 1;
                }
            }
        }
        rejected
    }

    /// Refuse new registrations, then reject everything still pending.
    /// Called once the worker can no longer answer.
    pub fn close(&self, reason: &EngineError) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_all(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    fn abandon(&self, id: RequestId, ticket: u64) {
        if let Some(mut slot) = self.inner.pending.get_mut(&id) {
            let owned = matches!(&*slot, PendingSlot::Waiting { ticket: current, .. } if *current == ticket);
            if owned {
                *slot = PendingSlot::Abandoned;
            }
        }
    }

    fn withdraw(&self, id: RequestId, ticket: u64) {
        let removed = self.inner.pending.remove_if(&id, |_, slot| {
            matches!(slot, PendingSlot::Waiting { ticket: current, .. } if *current == ticket)
        });
        if removed.is_some() {
            self.release(id);
        }
    }

    fn release(&self, id: RequestId) {
        mutex_lock(&self.inner.ids, TARGET, "mailbox::release").release(id);
        gauge!("vista_pending_requests").decrement(1.0);
    }
}

fn settle(response: ViewResponse) -> Settlement {
    let id = response.id;
    match response.into_outcome() {
        Some(Ok(html)) => Ok(html),
        Some(Err(message)) => Err(EngineError::from_worker_message(message)),
        None => Err(EngineError::MalformedResponse { id }),
    }
}

/// A caller's claim on one correlation ID.
struct Registration {
    id: RequestId,
    ticket: u64,
    receiver: oneshot::Receiver<Settlement>,
    mailbox: ResponseMailbox,
    settled: bool,
}

impl Registration {
    async fn wait(mut self) -> Settlement {
        let outcome = (&mut self.receiver).await;
        self.settled = true;
        outcome.unwrap_or(Err(EngineError::WorkerTerminated))
    }

    fn withdraw(mut self) {
        self.mailbox.withdraw(self.id, self.ticket);
        self.settled = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.settled {
            self.mailbox.abandon(self.id, self.ticket);
        }
    }
}

/// Correlates render requests with worker responses over one channel pair.
pub struct RequestMultiplexer {
    outbound: mpsc::UnboundedSender<ViewRequest>,
    mailbox: ResponseMailbox,
}

impl RequestMultiplexer {
    pub fn new(outbound: mpsc::UnboundedSender<ViewRequest>) -> Self {
        Self {
            outbound,
            mailbox: ResponseMailbox::new(),
        }
    }

    /// Mailbox handle for the task draining the worker's inbound channel.
    pub fn mailbox(&self) -> ResponseMailbox {
        self.mailbox.clone()
    }

    /// Send one render request and wait for the matching response.
    pub async fn submit(
        &self,
        view_name: &str,
        context: serde_json::Value,
    ) -> Result<String, EngineError> {
        if view_name.is_empty() {
            return Err(EngineError::EmptyViewName);
        }

        // Registered before the send so a fast worker cannot answer an ID
        // nobody is waiting on.
        let registration = self.mailbox.register()?;
        let request = ViewRequest::new(registration.id, view_name, context);
        debug!(
            target = TARGET,
            op = "multiplexer::submit",
            request_id = request.id,
            view = view_name,
            "Dispatching render request"
        );

        if self.outbound.send(request).is_err() {
            registration.withdraw();
            return Err(EngineError::WorkerTerminated);
        }

        registration.wait().await
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.mailbox.pending_len()
    }

    /// False once the worker stopped reading requests or its responses
    /// stopped arriving.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !self.mailbox.is_closed()
    }
}
