use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use twinme_core::{
    ActionError, Context, ContextConfig, Dispatch, ErrorCode, Executor, ExecutorBehavior,
    ExecutorState, ManagedAction, ManualClock, MemoryDeliveryService, OperationId, Operations,
    Outcome, Payload, Step, Timeoutable,
};

/// One request, completes with the response payload.
struct Echo {
    sent: bool,
    reply: Option<Payload>,
    finished: Arc<AtomicUsize>,
}

impl Echo {
    fn new(finished: &Arc<AtomicUsize>) -> Self {
        Self {
            sent: false,
            reply: None,
            finished: finished.clone(),
        }
    }
}

impl ExecutorBehavior for Echo {
    type Output = Payload;

    fn name(&self) -> &str {
        "echo"
    }

    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<Payload> {
        if let Some(reply) = self.reply.take() {
            return Step::Done(reply);
        }
        if !self.sent {
            self.sent = true;
            ops.send(1, "echo", Vec::new());
        }
        Step::Wait
    }

    fn on_response(
        &mut self,
        _operation_id: OperationId,
        payload: Payload,
    ) -> Result<(), ActionError> {
        self.reply = Some(payload);
        Ok(())
    }

    fn on_finish(&mut self, _outcome: &Outcome<Payload>) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Two requests issued one after the other.
struct TwoSteps {
    step: OperationId,
    waiting: bool,
}

impl ExecutorBehavior for TwoSteps {
    type Output = OperationId;

    fn name(&self) -> &str {
        "two-steps"
    }

    fn on_operation(&mut self, ops: &mut Operations<'_>) -> Step<OperationId> {
        if self.step > 2 {
            return Step::Done(self.step - 1);
        }
        if !self.waiting {
            self.waiting = true;
            ops.send(self.step, "step", Vec::new());
        }
        Step::Wait
    }

    fn on_response(
        &mut self,
        operation_id: OperationId,
        _payload: Payload,
    ) -> Result<(), ActionError> {
        assert_eq!(operation_id, self.step);
        self.step += 1;
        self.waiting = false;
        Ok(())
    }
}

fn online_context() -> (MemoryDeliveryService, Arc<Context>) {
    let delivery = MemoryDeliveryService::new();
    let config = ContextConfig {
        start_online: true,
        ..Default::default()
    };
    let context = Context::new(config, Arc::new(delivery.clone()));
    (delivery, context)
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_once_at_deadline() {
    let (delivery, context) = online_context();
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(context.clone().run_scheduler(cancel.clone()));

    let finished = Arc::new(AtomicUsize::new(0));
    let executor =
        Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(5)));
    let completion = executor.attach();
    executor.start();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(executor.state(), ExecutorState::AwaitingResponse);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(completion.await, Err(ActionError::Timeout));
    assert_eq!(executor.state(), ExecutorState::TimedOut);
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    // Nothing left behind, and the late answer is dropped.
    assert_eq!(context.outstanding_requests(), 0);
    assert_eq!(context.pending_actions(), 0);
    assert!(context.deadlines().is_empty());
    let request_id = delivery.sent_ids("echo")[0];
    assert_eq!(
        context.on_response(request_id, b"late".to_vec()),
        Dispatch::UnknownCorrelation(request_id)
    );
    executor.fire_timeout();
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    cancel.cancel();
    scheduler.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_response_before_deadline_disarms_timeout() {
    let (delivery, context) = online_context();
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(context.clone().run_scheduler(cancel.clone()));

    let finished = Arc::new(AtomicUsize::new(0));
    let executor =
        Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(5)));
    executor.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let request_id = delivery.sent_ids("echo")[0];
    assert_eq!(context.on_response(request_id, b"pong".to_vec()), Dispatch::Delivered);
    assert_eq!(executor.outcome(), Some(Ok(b"pong".to_vec())));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(executor.state(), ExecutorState::Succeeded);
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    cancel.cancel();
    scheduler.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_earlier_deadline_rearms_scheduler() {
    let (_delivery, context) = online_context();
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(context.clone().run_scheduler(cancel.clone()));

    let finished = Arc::new(AtomicUsize::new(0));
    let slow =
        Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(60)));
    slow.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast = Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(2)));
    fast.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(fast.state(), ExecutorState::TimedOut);
    assert_eq!(slow.state(), ExecutorState::AwaitingResponse);

    cancel.cancel();
    scheduler.await.unwrap();
}

#[test]
fn test_expire_due_with_manual_clock() {
    let delivery = MemoryDeliveryService::new();
    let clock = Arc::new(ManualClock::new());
    let config = ContextConfig {
        start_online: true,
        ..Default::default()
    };
    let context = Context::with_clock(config, Arc::new(delivery), clock.clone());

    let finished = Arc::new(AtomicUsize::new(0));
    let short =
        Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(5)));
    let long =
        Executor::with_timeout(&context, Echo::new(&finished), Some(Duration::from_secs(30)));
    let forever = Executor::with_timeout(&context, Echo::new(&finished), None);
    short.start();
    long.start();
    forever.start();
    assert_eq!(context.deadlines().len(), 2);

    clock.advance(Duration::from_secs(4));
    assert_eq!(context.expire_due(), 0);
    clock.advance(Duration::from_secs(1));
    assert_eq!(context.expire_due(), 1);
    assert_eq!(short.outcome(), Some(Err(ActionError::Timeout)));
    assert_eq!(context.expire_due(), 0);

    clock.advance(Duration::from_secs(3600));
    assert_eq!(context.expire_due(), 1);
    assert!(!forever.is_stopped());
    assert_eq!(context.pending_actions(), 1);
}

#[tokio::test]
async fn test_cancel_drops_correlation_and_deadline() {
    let (delivery, context) = online_context();
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new(&context, Echo::new(&finished));
    let completion = executor.attach();
    executor.start();
    assert_eq!(context.outstanding_requests(), 1);
    assert!(context.deadlines().contains(executor.id()));

    executor.cancel();
    executor.cancel();
    assert_eq!(completion.await, Err(ActionError::Canceled));
    assert_eq!(executor.state(), ExecutorState::Canceled);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(context.outstanding_requests(), 0);
    assert!(context.deadlines().is_empty());

    let request_id = delivery.sent_ids("echo")[0];
    assert_eq!(
        context.on_response(request_id, Vec::new()),
        Dispatch::UnknownCorrelation(request_id)
    );
}

#[tokio::test]
async fn test_error_response_fails_executor() {
    let (delivery, context) = online_context();
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new(&context, Echo::new(&finished));
    let completion = executor.attach();
    executor.start();

    let request_id = delivery.sent_ids("echo")[0];
    assert_eq!(
        context.on_error(request_id, ErrorCode::NoPermission, Some("echo".to_string())),
        Dispatch::Delivered
    );
    assert_eq!(
        completion.await,
        Err(ActionError::TransportError {
            code: ErrorCode::NoPermission,
            parameter: Some("echo".to_string()),
        })
    );
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(context.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_first_terminal_transition_wins() {
    let (_delivery, context) = online_context();
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new(&context, Echo::new(&finished));
    let delivered = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let delivered = delivered.clone();
        executor.execute(move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }
    executor.start();

    executor.fire_error_with_code(ErrorCode::ItemNotFound);
    executor.fire_timeout();
    executor.cancel();

    assert_eq!(
        executor.outcome(),
        Some(Err(ActionError::transport(ErrorCode::ItemNotFound)))
    );
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_after_stop_runs_immediately() {
    let (delivery, context) = online_context();
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new(&context, Echo::new(&finished));
    executor.start();
    let request_id = delivery.sent_ids("echo")[0];
    context.on_response(request_id, b"done".to_vec());

    let seen: Arc<Mutex<Option<Outcome<Payload>>>> = Arc::new(Mutex::new(None));
    let slot = seen.clone();
    executor.execute(move |outcome| {
        *slot.lock().unwrap() = Some(outcome);
    });
    assert_eq!(*seen.lock().unwrap(), Some(Ok(b"done".to_vec())));
    assert_eq!(executor.attach().await, Ok(b"done".to_vec()));
}

#[tokio::test]
async fn test_multi_step_executor_issues_in_order() {
    let (delivery, context) = online_context();
    let executor = Executor::new(
        &context,
        TwoSteps {
            step: 1,
            waiting: false,
        },
    );
    let completion = executor.attach();
    executor.start();

    let first = delivery.sent_ids("step");
    assert_eq!(first.len(), 1);
    context.on_response(first[0], Vec::new());
    assert_eq!(executor.state(), ExecutorState::AwaitingResponse);

    let both = delivery.sent_ids("step");
    assert_eq!(both.len(), 2);
    assert_ne!(both[0], both[1]);
    context.on_response(both[1], Vec::new());

    assert_eq!(completion.await, Ok(2));
    assert_eq!(context.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let (delivery, context) = online_context();
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new(&context, Echo::new(&finished));
    executor.start();
    executor.start();
    assert_eq!(delivery.sent_ids("echo").len(), 1);
    assert_eq!(context.pending_actions(), 1);
}
