//! Worker boundary between the pipeline and an interpreter.
//!
//! An interpreter is single threaded and owns all of its objects, so it lives
//! on a dedicated thread. The pipeline side talks to it through a
//! request/response protocol: each call gets a request id and a one-shot reply
//! slot, the request goes over a channel, and a dispatcher task routes replies
//! back by id. Payloads cross the boundary as JSON, so nothing is shared.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::{
    BindValue, Bitmap, CallCapture, Capture, Condition, EvalRequest, GraphicsSize, NativeValue, ObjectRef,
    Runtime, RuntimeKind,
};
use crate::errors::RuntimeError;

/// Tree-walking interpreters recurse deeply on nested user code.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Synchronous interpreter hosted on a worker thread.
pub trait Interpreter {
    fn kind(&self) -> RuntimeKind;
    fn global_scope(&self) -> ObjectRef;
    fn create_scope(&mut self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError>;
    fn release(&mut self, handles: &[ObjectRef]) -> Result<(), RuntimeError>;
    fn retain(&mut self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError>;
    fn bind(&mut self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError>;
    fn lookup(&mut self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError>;
    fn convert_from_host(&mut self, value: &BindValue) -> Result<ObjectRef, RuntimeError>;
    fn describe(&mut self, handle: ObjectRef) -> Result<NativeValue, RuntimeError>;
    fn evaluate(
        &mut self,
        scope: ObjectRef,
        code: &str,
        request: &EvalRequest,
    ) -> Result<Capture, RuntimeError>;
    fn parse(&mut self, code: &str) -> Result<(), RuntimeError>;
    fn replay_plot(&mut self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError>;
    fn call(
        &mut self,
        function: ObjectRef,
        args: &[ObjectRef],
        graphics: Option<GraphicsSize>,
    ) -> Result<CallCapture, RuntimeError>;
}

#[derive(Debug)]
enum Op {
    CreateScope { parent: ObjectRef },
    Release { handles: Vec<ObjectRef> },
    Retain { handle: ObjectRef },
    Bind { scope: ObjectRef, key: String, value: ObjectRef },
    Lookup { scope: ObjectRef, key: String },
    ConvertFromHost { value: BindValue },
    Describe { handle: ObjectRef },
    Evaluate { scope: ObjectRef, code: String, request: EvalRequest },
    Parse { code: String },
    ReplayPlot { plot: ObjectRef, size: GraphicsSize },
    Call { function: ObjectRef, args: Vec<ObjectRef>, graphics: Option<GraphicsSize> },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::CreateScope { .. } => "create_scope",
            Op::Release { .. } => "release",
            Op::Retain { .. } => "retain",
            Op::Bind { .. } => "bind",
            Op::Lookup { .. } => "lookup",
            Op::ConvertFromHost { .. } => "convert_from_host",
            Op::Describe { .. } => "describe",
            Op::Evaluate { .. } => "evaluate",
            Op::Parse { .. } => "parse",
            Op::ReplayPlot { .. } => "replay_plot",
            Op::Call { .. } => "call",
        }
    }
}

struct Request {
    id: u64,
    op: Op,
}

struct Response {
    id: u64,
    payload: Result<serde_json::Value, RuntimeError>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, RuntimeError>>>>>;

pub struct WorkerRuntime {
    kind: RuntimeKind,
    global: ObjectRef,
    next_id: AtomicU64,
    requests: mpsc::UnboundedSender<Request>,
    pending: Pending,
}

impl WorkerRuntime {
    /// Starts a worker thread and builds the interpreter on it. Must be called
    /// from within a tokio runtime, which hosts the reply dispatcher.
    pub async fn spawn<I, F>(factory: F) -> Result<Arc<Self>, RuntimeError>
    where
        I: Interpreter + 'static,
        F: FnOnce() -> I + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();
        let (ready_tx, ready_rx) = oneshot::channel::<(RuntimeKind, ObjectRef)>();

        std::thread::Builder::new()
            .name("live-interpreter".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let interpreter = factory();
                if ready_tx
                    .send((interpreter.kind(), interpreter.global_scope()))
                    .is_err()
                {
                    return;
                }
                serve(interpreter, request_rx, response_tx);
            })
            .map_err(|e| RuntimeError::Protocol(format!("failed to start worker: {}", e)))?;

        let (kind, global) = ready_rx.await.map_err(|_| RuntimeError::Disconnected)?;
        log::debug!("Started {} interpreter worker", kind);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = pending.clone();
        tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                let slot = dispatch
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&response.id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(response.payload);
                    }
                    None => log::warn!("Dropping reply for unknown request {}", response.id),
                }
            }
            // Worker is gone: fail every outstanding request.
            dispatch.lock().unwrap_or_else(|e| e.into_inner()).clear();
        });

        Ok(Arc::new(Self {
            kind,
            global,
            next_id: AtomicU64::new(1),
            requests: request_tx,
            pending,
        }))
    }

    async fn request(&self, op: Op) -> Result<serde_json::Value, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        log::trace!("request {} -> {}", id, op.name());
        if self.requests.send(Request { id, op }).is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(RuntimeError::Disconnected);
        }

        rx.await.map_err(|_| RuntimeError::Disconnected)?
    }

    async fn request_as<T: DeserializeOwned>(&self, op: Op) -> Result<T, RuntimeError> {
        let payload = self.request(op).await?;
        serde_json::from_value(payload).map_err(|e| RuntimeError::Protocol(e.to_string()))
    }
}

fn encode<T: Serialize>(result: Result<T, RuntimeError>) -> Result<serde_json::Value, RuntimeError> {
    result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| RuntimeError::Protocol(e.to_string()))
    })
}

fn dispatch<I: Interpreter>(interpreter: &mut I, op: Op) -> Result<serde_json::Value, RuntimeError> {
    match op {
        Op::CreateScope { parent } => encode(interpreter.create_scope(parent)),
        Op::Release { handles } => encode(interpreter.release(&handles)),
        Op::Retain { handle } => encode(interpreter.retain(handle)),
        Op::Bind { scope, key, value } => encode(interpreter.bind(scope, &key, value)),
        Op::Lookup { scope, key } => encode(interpreter.lookup(scope, &key)),
        Op::ConvertFromHost { value } => encode(interpreter.convert_from_host(&value)),
        Op::Describe { handle } => encode(interpreter.describe(handle)),
        Op::Evaluate { scope, code, request } => encode(interpreter.evaluate(scope, &code, &request)),
        Op::Parse { code } => encode(interpreter.parse(&code)),
        Op::ReplayPlot { plot, size } => encode(interpreter.replay_plot(plot, size)),
        Op::Call { function, args, graphics } => encode(interpreter.call(function, &args, graphics)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string())
}

fn serve<I: Interpreter>(
    mut interpreter: I,
    mut requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
) {
    while let Some(Request { id, op }) = requests.blocking_recv() {
        let name = op.name();
        // A panic fails this request only; the worker keeps serving.
        let payload = match panic::catch_unwind(AssertUnwindSafe(|| dispatch(&mut interpreter, op))) {
            Ok(payload) => payload,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Interpreter panicked during {}: {}", name, message);
                Err(RuntimeError::User(Condition::error(
                    format!("internal interpreter error: {}", message),
                    None,
                )))
            }
        };
        if responses.send(Response { id, payload }).is_err() {
            break;
        }
    }
    log::debug!("Interpreter worker shutting down");
}

#[async_trait]
impl Runtime for WorkerRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind
    }

    fn global_scope(&self) -> ObjectRef {
        self.global
    }

    async fn create_scope(&self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        self.request_as(Op::CreateScope { parent }).await
    }

    async fn release(&self, handles: &[ObjectRef]) -> Result<(), RuntimeError> {
        if handles.is_empty() {
            return Ok(());
        }
        self.request_as(Op::Release { handles: handles.to_vec() }).await
    }

    async fn retain(&self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        self.request_as(Op::Retain { handle }).await
    }

    async fn bind(&self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError> {
        self.request_as(Op::Bind { scope, key: key.to_string(), value }).await
    }

    async fn lookup(&self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError> {
        self.request_as(Op::Lookup { scope, key: key.to_string() }).await
    }

    async fn convert_from_host(&self, value: &BindValue) -> Result<ObjectRef, RuntimeError> {
        self.request_as(Op::ConvertFromHost { value: value.clone() }).await
    }

    async fn describe(&self, handle: ObjectRef) -> Result<NativeValue, RuntimeError> {
        self.request_as(Op::Describe { handle }).await
    }

    async fn evaluate(
        &self,
        scope: ObjectRef,
        code: &str,
        request: &EvalRequest,
    ) -> Result<Capture, RuntimeError> {
        let payload = self
            .request(Op::Evaluate {
                scope,
                code: code.to_string(),
                request: request.clone(),
            })
            .await?;
        Capture::decode(payload)
    }

    async fn parse(&self, code: &str) -> Result<(), RuntimeError> {
        self.request_as(Op::Parse { code: code.to_string() }).await
    }

    async fn replay_plot(&self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError> {
        self.request_as(Op::ReplayPlot { plot, size }).await
    }

    async fn call(
        &self,
        function: ObjectRef,
        args: &[ObjectRef],
        graphics: Option<GraphicsSize>,
    ) -> Result<CallCapture, RuntimeError> {
        self.request_as(Op::Call {
            function,
            args: args.to_vec(),
            graphics,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;

    #[tokio::test]
    async fn concurrent_requests_resolve_by_id() {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let global = runtime.global_scope();

        let values: Vec<_> = (0..8)
            .map(|i| BindValue::Json(serde_json::json!(i)))
            .collect();
        let handles = futures_util::future::join_all(
            values.iter().map(|v| runtime.convert_from_host(v)),
        )
        .await;

        for (i, handle) in handles.into_iter().enumerate() {
            let handle = handle.unwrap();
            runtime.bind(global, &format!("v{}", i), handle).await.unwrap();
            let described = runtime.describe(handle).await.unwrap();
            assert_eq!(described, NativeValue::Double { values: vec![Some(i as f64)] });
        }
    }

    #[tokio::test]
    async fn errors_cross_the_boundary_intact() {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let err = runtime.release(&[ObjectRef(999_999)]).await.unwrap_err();
        assert_eq!(err, RuntimeError::AlreadyReleased(ObjectRef(999_999)));
    }

    /// Panics on one magic snippet, otherwise behaves like minir.
    struct Brittle(MinirInterpreter);

    impl Interpreter for Brittle {
        fn kind(&self) -> RuntimeKind {
            self.0.kind()
        }
        fn global_scope(&self) -> ObjectRef {
            self.0.global_scope()
        }
        fn create_scope(&mut self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError> {
            self.0.create_scope(parent)
        }
        fn release(&mut self, handles: &[ObjectRef]) -> Result<(), RuntimeError> {
            self.0.release(handles)
        }
        fn retain(&mut self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError> {
            self.0.retain(handle)
        }
        fn bind(&mut self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError> {
            self.0.bind(scope, key, value)
        }
        fn lookup(&mut self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError> {
            self.0.lookup(scope, key)
        }
        fn convert_from_host(&mut self, value: &BindValue) -> Result<ObjectRef, RuntimeError> {
            self.0.convert_from_host(value)
        }
        fn describe(&mut self, handle: ObjectRef) -> Result<NativeValue, RuntimeError> {
            self.0.describe(handle)
        }
        fn evaluate(&mut self, scope: ObjectRef, code: &str, request: &EvalRequest) -> Result<Capture, RuntimeError> {
            self.0.evaluate(scope, code, request)
        }
        fn parse(&mut self, code: &str) -> Result<(), RuntimeError> {
            if code == "boom" {
                panic!("parser exploded");
            }
            self.0.parse(code)
        }
        fn replay_plot(&mut self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError> {
            self.0.replay_plot(plot, size)
        }
        fn call(
            &mut self,
            function: ObjectRef,
            args: &[ObjectRef],
            graphics: Option<GraphicsSize>,
        ) -> Result<CallCapture, RuntimeError> {
            self.0.call(function, args, graphics)
        }
    }

    #[tokio::test]
    async fn a_panicking_request_leaves_the_worker_running() {
        let runtime = WorkerRuntime::spawn(|| Brittle(MinirInterpreter::new())).await.unwrap();

        match runtime.parse("boom").await {
            Err(RuntimeError::User(condition)) => {
                assert!(condition.message.contains("parser exploded"));
            }
            other => panic!("unexpected {:?}", other),
        }

        runtime.parse("1 + 1").await.unwrap();
        let capture = runtime
            .evaluate(runtime.global_scope(), "1 + 1", &EvalRequest::default())
            .await
            .unwrap();
        assert!(!capture.items.is_empty());
    }
}
