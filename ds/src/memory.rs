//! In-process `DeliveryService` used by tests and the demo binary.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::transport::{DeliveryService, ErrorCode, OutboundRequest, RequestId, TransportEvent};
use crate::DeliveryServiceError;

/// Produces the event answering a request, if any.
pub type AutoResponder = Arc<dyn Fn(&OutboundRequest) -> Option<TransportEvent> + Send + Sync>;

type SubscriberList = Arc<Mutex<Vec<UnboundedSender<TransportEvent>>>>;

#[derive(Default)]
struct State {
    online: bool,
    sent: Vec<OutboundRequest>,
}

/// Memory-backed delivery service.
///
/// Sent requests are recorded and can be answered by hand with
/// [`respond`](MemoryDeliveryService::respond) and
/// [`fail`](MemoryDeliveryService::fail), or automatically through an
/// [`AutoResponder`]. Clones share the same state.
#[derive(Clone)]
pub struct MemoryDeliveryService {
    state: Arc<Mutex<State>>,
    subscribers: SubscriberList,
    responder: Option<AutoResponder>,
    refuse_offline: bool,
}

impl Default for MemoryDeliveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDeliveryService {
    /// Create an online service that accepts every request.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                online: true,
                sent: Vec::new(),
            })),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            responder: None,
            refuse_offline: false,
        }
    }

    /// Answer every sent request through `responder`.
    pub fn with_responder(mut self, responder: AutoResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Make `send` fail with [`DeliveryServiceError::Offline`] while offline.
    pub fn refuse_when_offline(mut self) -> Self {
        self.refuse_offline = true;
        self
    }

    /// Requests sent so far, in send order.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.state.lock().sent.clone()
    }

    /// Request ids sent so far for `operation`.
    pub fn sent_ids(&self, operation: &str) -> Vec<RequestId> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|r| r.operation == operation)
            .map(|r| r.request_id)
            .collect()
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Deliver a success response for `request_id`.
    pub fn respond(&self, request_id: RequestId, payload: Vec<u8>) {
        self.publish(TransportEvent::Response {
            request_id,
            payload,
        });
    }

    /// Deliver an error response for `request_id`.
    pub fn fail(&self, request_id: RequestId, code: ErrorCode) {
        self.publish(TransportEvent::Error {
            request_id,
            code,
            parameter: None,
        });
    }

    pub fn go_online(&self) {
        self.state.lock().online = true;
        self.publish(TransportEvent::Online);
    }

    pub fn go_offline(&self) {
        self.state.lock().online = false;
        self.publish(TransportEvent::Offline);
    }

    pub fn ready(&self) {
        self.publish(TransportEvent::Ready);
    }

    /// Push an event to every live subscriber, pruning closed ones.
    pub fn publish(&self, event: TransportEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl DeliveryService for MemoryDeliveryService {
    fn send(&self, request: OutboundRequest) -> Result<(), DeliveryServiceError> {
        {
            let mut state = self.state.lock();
            if self.refuse_offline && !state.online {
                return Err(DeliveryServiceError::Offline(request.request_id));
            }
            if state
                .sent
                .iter()
                .any(|r| r.request_id == request.request_id)
            {
                return Err(DeliveryServiceError::DuplicateRequest(request.request_id));
            }
            debug!(
                "[MemoryDeliveryService::send]: {} request_id={}",
                request.operation, request.request_id
            );
            state.sent.push(request.clone());
        }

        if let Some(responder) = &self.responder {
            if let Some(event) = responder(&request) {
                self.publish(event);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> UnboundedReceiver<TransportEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}
