use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use tokio::sync::oneshot;

use crate::error::HubInvokeError;

/// What a pending invocation ultimately resolves to.
#[derive(Debug)]
enum InvokeOutcome {
    Result(Box<RawValue>),
    Error(String),
}

/// Tracks outstanding invocations keyed by a wrapping 16-bit id.
///
/// The id counter and the backlog map are guarded by two distinct mutexes:
/// `begin` takes the counter mutex, drops it, and only then takes the
/// backlog mutex — the two are never held together.
pub struct InvocationRegistry {
    next_id: StdMutex<u16>,
    backlog: StdMutex<HashMap<u16, oneshot::Sender<InvokeOutcome>>>,
}

impl InvocationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: StdMutex::new(0),
            backlog: StdMutex::new(HashMap::new()),
        })
    }

    /// Allocate a new invocation id and register its ticket.
    ///
    /// `timeout` of `None` means wait forever; this is how `-1` ("infinite")
    /// from the public API is represented once parsed.
    pub fn begin(self: &Arc<Self>, timeout: Option<Duration>) -> (u16, InvokeHandle) {
        let id = {
            let mut next_id = self.next_id.lock().expect("invocation id mutex poisoned");
            let id = *next_id;
            *next_id = next_id.wrapping_add(1);
            id
        };
        let (tx, rx) = oneshot::channel();
        self.backlog
            .lock()
            .expect("invocation backlog mutex poisoned")
            .insert(id, tx);
        (
            id,
            InvokeHandle {
                id,
                rx,
                timeout,
                registry: Arc::clone(self),
            },
        )
    }

    /// Complete a pending ticket with a successful result.
    pub fn complete(&self, invocation_id: &str, result: Box<RawValue>) {
        if let Some(id) = parse_id(invocation_id) {
            self.settle(id, InvokeOutcome::Result(result));
        }
    }

    /// Fail a pending ticket with a server-reported error string.
    pub fn fail(&self, invocation_id: &str, error: String) {
        if let Some(id) = parse_id(invocation_id) {
            self.settle(id, InvokeOutcome::Error(error));
        }
    }

    /// Fail a ticket by its numeric id directly (used by `InvokeHandle` on
    /// its own timeout, and internally by `close_all`).
    fn fail_by_id(&self, id: u16, error: String) {
        self.settle(id, InvokeOutcome::Error(error));
    }

    fn settle(&self, id: u16, outcome: InvokeOutcome) {
        let sender = self
            .backlog
            .lock()
            .expect("invocation backlog mutex poisoned")
            .remove(&id);
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }

    /// Fail every outstanding ticket, e.g. on hard close.
    pub fn close_all(&self, reason: &str) {
        let ids: Vec<u16> = self
            .backlog
            .lock()
            .expect("invocation backlog mutex poisoned")
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.fail_by_id(id, reason.to_owned());
        }
    }

    /// Number of tickets currently outstanding (test/diagnostic use).
    pub fn pending_count(&self) -> usize {
        self.backlog
            .lock()
            .expect("invocation backlog mutex poisoned")
            .len()
    }
}

fn parse_id(invocation_id: &str) -> Option<u16> {
    invocation_id.parse().ok()
}

/// A handle to a single outstanding invocation.
///
/// `value` awaits the server's completion (or the configured timeout),
/// deserializing the `result` into the caller's requested type.
pub struct InvokeHandle {
    id: u16,
    rx: oneshot::Receiver<InvokeOutcome>,
    timeout: Option<Duration>,
    registry: Arc<InvocationRegistry>,
}

impl InvokeHandle {
    /// The invocation id this ticket was registered under, as sent on the
    /// wire (decimal string).
    pub fn invocation_id(&self) -> String {
        self.id.to_string()
    }

    /// Await the server's completion and deserialize its result.
    pub async fn value<T: DeserializeOwned>(mut self) -> Result<T, HubInvokeError> {
        let outcome = match self.timeout {
            Some(duration) => match tokio::time::timeout(duration, &mut self.rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => return Err(HubInvokeError::ConnectionClosed),
                Err(_) => {
                    self.registry
                        .fail_by_id(self.id, "invocation timed out".to_owned());
                    return Err(HubInvokeError::Timeout);
                }
            },
            None => match (&mut self.rx).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(HubInvokeError::ConnectionClosed),
            },
        };
        match outcome {
            InvokeOutcome::Error(message) => Err(HubInvokeError::Server(message)),
            InvokeOutcome::Result(raw) => {
                serde_json::from_str(raw.get()).map_err(HubInvokeError::Deserialize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_assigns_sequential_ids_starting_at_zero() {
        let registry = InvocationRegistry::new();
        let (id0, _h0) = registry.begin(None);
        let (id1, _h1) = registry.begin(None);
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
    }

    #[tokio::test]
    async fn complete_delivers_typed_result_and_clears_backlog() {
        let registry = InvocationRegistry::new();
        let (id, handle) = registry.begin(None);
        assert_eq!(registry.pending_count(), 1);
        registry.complete(&id.to_string(), RawValue::from_string("5".to_owned()).unwrap());
        let value: i64 = handle.value().await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_delivers_server_error() {
        let registry = InvocationRegistry::new();
        let (id, handle) = registry.begin(None);
        registry.fail(&id.to_string(), "boom".to_owned());
        let err = handle.value::<i64>().await.unwrap_err();
        assert!(matches!(err, HubInvokeError::Server(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn timeout_elapses_and_unregisters_ticket() {
        let registry = InvocationRegistry::new();
        let (_id, mut handle) = registry.begin(Some(Duration::from_millis(10)));
        handle.timeout = Some(Duration::from_millis(10));
        let err = handle.value::<i64>().await.unwrap_err();
        assert!(matches!(err, HubInvokeError::Timeout));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_all_fails_every_outstanding_ticket() {
        let registry = InvocationRegistry::new();
        let (_id0, h0) = registry.begin(None);
        let (_id1, h1) = registry.begin(None);
        registry.close_all("HubConnection was closed");
        assert!(matches!(
            h0.value::<i64>().await.unwrap_err(),
            HubInvokeError::Server(msg) if msg == "HubConnection was closed"
        ));
        assert!(matches!(
            h1.value::<i64>().await.unwrap_err(),
            HubInvokeError::Server(msg) if msg == "HubConnection was closed"
        ));
    }

    #[tokio::test]
    async fn invocation_id_wraps_silently_at_u16_max() {
        let registry = InvocationRegistry::new();
        *registry.next_id.lock().unwrap() = u16::MAX;
        let (id0, _h0) = registry.begin(None);
        let (id1, _h1) = registry.begin(None);
        assert_eq!(id0, u16::MAX);
        assert_eq!(id1, 0);
    }
}
