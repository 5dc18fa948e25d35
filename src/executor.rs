//! Executor runtime.
//!
//! [`Executor<B>`] is the stateful coordinator: it owns the lifecycle
//! state, the `stopped` guard and the queued continuations, while the
//! per-kind logic lives in an [`ExecutorBehavior`]. The runtime drives the
//! behavior through `on_operation` whenever it is ready to issue its next
//! request, routes responses and errors back to it, parks it while the
//! channel is offline and completes it exactly once.
//!
//! The executor lock is held while the behavior runs. It may nest the
//! correlator lock (allocating request ids) and nothing else: requests are
//! sent, the context is updated and continuations run only after it has
//! been released.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use ds::{DeliveryServiceError, ErrorCode, OutboundRequest, RequestId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::action::{
    ActionId, ConnectivityAware, Correlatable, ExecutorState, ManagedAction, OperationId,
    Payload, Timeoutable,
};
use crate::context::Context;
use crate::correlator::Correlator;
use crate::error::ActionError;

/// Final result delivered to every continuation.
pub type Outcome<T> = Result<T, ActionError>;

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;
type StopHook = Box<dyn FnOnce() + Send>;

/// What `on_operation` decided.
#[derive(Debug)]
pub enum Step<T> {
    /// Requests are in flight (or the behavior waits for a callback).
    Wait,
    Done(T),
    Fail(ActionError),
}

/// Handle given to `on_operation` for issuing correlated requests.
///
/// Requests are queued here and sent once the executor lock is released.
pub struct Operations<'a> {
    owner: ActionId,
    correlator: &'a Correlator,
    outbound: Vec<(OperationId, OutboundRequest)>,
    restarted: bool,
}

impl<'a> Operations<'a> {
    fn new(owner: ActionId, correlator: &'a Correlator, restarted: bool) -> Self {
        Self {
            owner,
            correlator,
            outbound: Vec::new(),
            restarted,
        }
    }

    /// Allocate a correlated request id for step `operation_id` without
    /// sending anything. The caller hands the id to its own collaborator.
    pub fn new_operation(&mut self, operation_id: OperationId) -> RequestId {
        self.correlator.new_operation(self.owner, operation_id)
    }

    /// Allocate a request id for `operation_id` and queue the request.
    pub fn send(
        &mut self,
        operation_id: OperationId,
        operation: &str,
        payload: Vec<u8>,
    ) -> RequestId {
        let request_id = self.new_operation(operation_id);
        self.outbound.push((
            operation_id,
            OutboundRequest::new(request_id, operation, payload),
        ));
        request_id
    }

    /// Whether the executor resumed after a reconnect.
    pub fn is_restarted(&self) -> bool {
        self.restarted
    }
}

/// The per-kind part of an executor.
pub trait ExecutorBehavior: Send + 'static {
    type Output: Clone + Send + 'static;

    fn name(&self) -> &str;

    /// Whether the executor must wait for the channel to be online before
    /// its first `on_operation`. Local-only executors wait for "ready".
    fn needs_online(&self) -> bool {
        true
    }

    /// Issue the next request(s), or finish.
    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<Self::Output>;

    /// Response for step `operation_id`. `Ok` runs `on_operation` again.
    fn on_response(
        &mut self,
        operation_id: OperationId,
        payload: Payload,
    ) -> Result<(), ActionError>;

    /// Error for step `operation_id`. `Ok` means the error was absorbed and
    /// `on_operation` runs again.
    fn on_error(
        &mut self,
        operation_id: OperationId,
        code: ErrorCode,
        parameter: Option<&str>,
    ) -> Result<(), ActionError> {
        let _ = operation_id;
        Err(ActionError::TransportError {
            code,
            parameter: parameter.map(str::to_string),
        })
    }

    /// Whether step `operation_id` may be sent again after a reconnect.
    fn is_idempotent(&self, operation_id: OperationId) -> bool {
        let _ = operation_id;
        false
    }

    /// Step `operation_id` will not be answered and must be issued again by
    /// the next `on_operation`.
    fn on_reissue(&mut self, operation_id: OperationId) {
        let _ = operation_id;
    }

    /// Runs once, on every terminal path.
    fn on_finish(&mut self, outcome: &Outcome<Self::Output>) {
        let _ = outcome;
    }
}

/// Side effects computed under the executor lock and applied after it.
struct Effects<T> {
    outbound: Vec<(OperationId, OutboundRequest)>,
    finish: Option<Outcome<T>>,
    /// The channel reported itself offline to this executor.
    channel_offline: bool,
}

impl<T> Effects<T> {
    fn none() -> Self {
        Self {
            outbound: Vec::new(),
            finish: None,
            channel_offline: false,
        }
    }

    fn finish(outcome: Outcome<T>) -> Self {
        Self {
            finish: Some(outcome),
            ..Self::none()
        }
    }
}

struct Inner<B: ExecutorBehavior> {
    behavior: B,
    state: ExecutorState,
    restarted: bool,
    stopped: bool,
    waiting_online: bool,
    outcome: Option<Outcome<B::Output>>,
    continuations: Vec<Continuation<B::Output>>,
    on_stop: Vec<StopHook>,
}

pub struct Executor<B: ExecutorBehavior> {
    id: ActionId,
    name: String,
    context: Arc<Context>,
    deadline: Option<Instant>,
    inner: Mutex<Inner<B>>,
}

impl<B: ExecutorBehavior> Executor<B> {
    /// Create an executor bounded by the context's default timeout.
    pub fn new(context: &Arc<Context>, behavior: B) -> Arc<Self> {
        let timeout = context.config().default_timeout;
        Self::with_timeout(context, behavior, Some(timeout))
    }

    /// Create an executor with its own timeout; `None` never times out.
    pub fn with_timeout(
        context: &Arc<Context>,
        behavior: B,
        timeout: Option<Duration>,
    ) -> Arc<Self> {
        let deadline = timeout.map(|t| context.now() + t);
        Arc::new(Self {
            id: context.allocate_action_id(),
            name: behavior.name().to_string(),
            context: context.clone(),
            deadline,
            inner: Mutex::new(Inner {
                behavior,
                state: ExecutorState::Created,
                restarted: false,
                stopped: false,
                waiting_online: false,
                outcome: None,
                continuations: Vec::new(),
                on_stop: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn state(&self) -> ExecutorState {
        self.inner.lock().state
    }

    pub fn is_restarted(&self) -> bool {
        self.inner.lock().restarted
    }

    /// The final result, once stopped.
    pub fn outcome(&self) -> Option<Outcome<B::Output>> {
        self.inner.lock().outcome.clone()
    }

    /// Register with the context and issue the first operation, or park
    /// until the channel allows it. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ExecutorState::Created || inner.stopped {
                debug!("[start]: {} ({}) already {}", self.name, self.id, inner.state);
                return;
            }
            inner.state = ExecutorState::Started;
        }

        let action: Arc<dyn ManagedAction> = self.clone();
        if !self.context.start_action(action) {
            return;
        }
        info!("[start]: {} ({}) started", self.name, self.id);

        let effects = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            let blocked = if inner.behavior.needs_online() {
                !self.context.is_online()
            } else {
                !self.context.is_ready()
            };
            if blocked {
                debug!("[start]: {} ({}) waiting for connectivity", self.name, self.id);
                inner.waiting_online = true;
            }
            self.run_operation(&mut inner, false)
        };
        self.apply(effects);
    }

    /// Queue `continuation`, or run it now if the executor already stopped.
    pub fn execute<F>(&self, continuation: F)
    where
        F: FnOnce(Outcome<B::Output>) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.inner.lock();
            match &inner.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    inner.continuations.push(Box::new(continuation));
                    return;
                }
            }
        };
        continuation(outcome);
    }

    /// Await the outcome.
    pub fn attach(&self) -> Completion<B::Output> {
        let (tx, completion) = Completion::channel();
        self.execute(move |outcome| {
            let _ = tx.send(outcome);
        });
        completion
    }

    /// Run `hook` once the executor stops, before its continuations.
    pub(crate) fn on_stop<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            if !inner.stopped {
                inner.on_stop.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Report a failure for step `operation_id` whose request id is already
    /// resolved (or was never sent).
    pub fn on_error_with_operation_id(
        &self,
        operation_id: OperationId,
        code: ErrorCode,
        parameter: Option<String>,
    ) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            if code == ErrorCode::TwinlifeOffline {
                info!(
                    "[on_error_with_operation_id]: {} ({}) step {operation_id} offline, parked",
                    self.name, self.id
                );
                inner.behavior.on_reissue(operation_id);
                inner.restarted = true;
                inner.waiting_online = true;
                inner.state = ExecutorState::AwaitingResponse;
                Effects {
                    channel_offline: true,
                    ..Effects::none()
                }
            } else {
                match inner
                    .behavior
                    .on_error(operation_id, code, parameter.as_deref())
                {
                    Ok(()) => self.run_operation(&mut inner, true),
                    Err(e) => Effects::finish(Err(e)),
                }
            }
        };
        self.apply(effects);
    }

    /// Terminal failure from an explicit error code.
    pub fn fire_error_with_code(&self, code: ErrorCode) {
        self.stop(Err(ActionError::transport(code)));
    }

    /// Let the behavior issue its next operation or finish.
    ///
    /// A parked executor only runs `on_operation` when `progress` is set (an
    /// answer arrived while offline). It may then finish, but the requests it
    /// issues are held back until the channel is online again.
    fn run_operation(&self, inner: &mut Inner<B>, progress: bool) -> Effects<B::Output> {
        if inner.stopped {
            return Effects::none();
        }
        if inner.waiting_online && !progress {
            inner.state = ExecutorState::AwaitingResponse;
            return Effects::none();
        }
        inner.state = ExecutorState::IssuingNextOperation;
        let correlator = self.context.correlator();
        let mut ops = Operations::new(self.id, correlator, inner.restarted);
        let step = inner.behavior.on_operation(&mut ops);
        let mut outbound = ops.outbound;
        if inner.waiting_online {
            for (operation_id, request) in outbound.drain(..) {
                correlator.take_for(self.id, request.request_id);
                inner.behavior.on_reissue(operation_id);
            }
        }
        let finish = match step {
            Step::Wait => {
                inner.state = ExecutorState::AwaitingResponse;
                None
            }
            Step::Done(value) => Some(Ok(value)),
            Step::Fail(error) => Some(Err(error)),
        };
        Effects {
            outbound,
            finish,
            channel_offline: false,
        }
    }

    fn apply(&self, effects: Effects<B::Output>) {
        for (operation_id, request) in effects.outbound {
            if self.is_stopped() {
                break;
            }
            if self.inner.lock().waiting_online {
                self.hold_back(operation_id, request.request_id);
            } else {
                self.send(operation_id, request);
            }
        }
        if effects.channel_offline {
            self.context.on_twinlife_offline();
        }
        if let Some(outcome) = effects.finish {
            self.stop(outcome);
        }
    }

    /// Undo a request that was not sent because the executor parked.
    fn hold_back(&self, operation_id: OperationId, request_id: RequestId) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        if self
            .context
            .correlator()
            .take_for(self.id, request_id)
            .is_some()
        {
            inner.behavior.on_reissue(operation_id);
        }
    }

    fn send(&self, operation_id: OperationId, request: OutboundRequest) {
        let request_id = request.request_id;
        debug!(
            "[send]: {} ({}) step {operation_id} -> {} #{request_id}",
            self.name, self.id, request.operation
        );
        if let Err(e) = self.context.delivery().send(request) {
            warn!("[send]: {} ({}) request {request_id} not sent: {e}", self.name, self.id);
            if self
                .context
                .correlator()
                .take_for(self.id, request_id)
                .is_some()
            {
                let code = match e {
                    DeliveryServiceError::Offline(_) => ErrorCode::TwinlifeOffline,
                    _ => ErrorCode::CanNotConnect,
                };
                self.on_error_with_operation_id(operation_id, code, Some(e.to_string()));
            }
        }
    }

    /// Move to the terminal state for `outcome`. Only the first call has an
    /// effect.
    fn stop(&self, outcome: Outcome<B::Output>) {
        let (continuations, hooks, state) = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.waiting_online = false;
            inner.state = match &outcome {
                Ok(_) => ExecutorState::Succeeded,
                Err(ActionError::Timeout) => ExecutorState::TimedOut,
                Err(ActionError::Canceled) => ExecutorState::Canceled,
                Err(_) => ExecutorState::Failed,
            };
            inner.behavior.on_finish(&outcome);
            inner.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut inner.continuations),
                std::mem::take(&mut inner.on_stop),
                inner.state,
            )
        };

        let dropped = self.context.correlator().cancel_owner(self.id);
        if !dropped.is_empty() {
            debug!(
                "[stop]: {} ({}) dropped {} outstanding request(s)",
                self.name,
                self.id,
                dropped.len()
            );
        }
        self.context.finish_action(self.id);
        for hook in hooks {
            hook();
        }

        match &outcome {
            Ok(_) => info!("[stop]: {} ({}) {state}", self.name, self.id),
            Err(e) => info!("[stop]: {} ({}) {state}: {e}", self.name, self.id),
        }
        for continuation in continuations {
            continuation(outcome.clone());
        }
    }
}

impl<B: ExecutorBehavior> Timeoutable for Executor<B> {
    fn action_id(&self) -> ActionId {
        self.id
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn fire_timeout(&self) {
        self.stop(Err(ActionError::Timeout));
    }
}

impl<B: ExecutorBehavior> Correlatable for Executor<B> {
    fn on_response(&self, request_id: RequestId, operation_id: OperationId, payload: Payload) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                debug!("[on_response]: {} ({}) late response {request_id}", self.name, self.id);
                return;
            }
            match inner.behavior.on_response(operation_id, payload) {
                Ok(()) => self.run_operation(&mut inner, true),
                Err(e) => Effects::finish(Err(e)),
            }
        };
        self.apply(effects);
    }

    fn on_error_with_request_id(
        &self,
        request_id: RequestId,
        operation_id: OperationId,
        code: ErrorCode,
        parameter: Option<String>,
    ) {
        debug!(
            "[on_error_with_request_id]: {} ({}) request {request_id} failed: {code}",
            self.name, self.id
        );
        self.on_error_with_operation_id(operation_id, code, parameter);
    }
}

impl<B: ExecutorBehavior> ConnectivityAware for Executor<B> {
    fn on_twinlife_ready(&self) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.stopped || !inner.waiting_online || inner.behavior.needs_online() {
                return;
            }
            inner.waiting_online = false;
            self.run_operation(&mut inner, false)
        };
        self.apply(effects);
    }

    fn on_twinlife_online(&self) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.stopped || !inner.waiting_online {
                return;
            }
            inner.waiting_online = false;
            if inner.restarted {
                let correlator = self.context.correlator();
                for pending in correlator.outstanding_for(self.id) {
                    if !inner.behavior.is_idempotent(pending.operation_id) {
                        continue;
                    }
                    if let Some(operation_id) = correlator.take_for(self.id, pending.request_id) {
                        inner.behavior.on_reissue(operation_id);
                    }
                }
                info!("[on_twinlife_online]: {} ({}) resumed", self.name, self.id);
            }
            self.run_operation(&mut inner, false)
        };
        self.apply(effects);
    }

    fn on_twinlife_offline(&self) {
        let mut inner = self.inner.lock();
        if inner.stopped || inner.state == ExecutorState::Created {
            return;
        }
        if !inner.behavior.needs_online() {
            return;
        }
        inner.restarted = true;
        inner.waiting_online = true;
        inner.state = ExecutorState::AwaitingResponse;
        debug!("[on_twinlife_offline]: {} ({}) parked", self.name, self.id);
    }
}

impl<B: ExecutorBehavior> ManagedAction for Executor<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    fn cancel(&self) {
        self.stop(Err(ActionError::Canceled));
    }
}

/// Future resolving to an executor's outcome.
///
/// Resolves to `Err(Canceled)` if the executor is dropped without ever
/// completing.
pub struct Completion<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (oneshot::Sender<Outcome<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl<T> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ActionError::Canceled)))
    }
}
