#![allow(dead_code)]

use async_trait::async_trait;
use live_core::runtime::{
    BindValue, Bitmap, CallCapture, Capture, EvalRequest, GraphicsSize, NativeValue, ObjectRef,
};
use live_core::{
    EnvironmentInstance, LiveSession, MinirInterpreter, Runtime, RuntimeError, RuntimeKind,
    WorkerRuntime,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Forwards to a real interpreter and counts the calls that run code.
pub struct CountingRuntime {
    inner: Arc<dyn Runtime>,
    evaluations: AtomicUsize,
    parses: AtomicUsize,
}

impl CountingRuntime {
    pub async fn spawn() -> Arc<Self> {
        let inner: Arc<dyn Runtime> = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        Arc::new(Self {
            inner,
            evaluations: AtomicUsize::new(0),
            parses: AtomicUsize::new(0),
        })
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runtime for CountingRuntime {
    fn kind(&self) -> RuntimeKind {
        self.inner.kind()
    }

    fn global_scope(&self) -> ObjectRef {
        self.inner.global_scope()
    }

    async fn create_scope(&self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        self.inner.create_scope(parent).await
    }

    async fn release(&self, handles: &[ObjectRef]) -> Result<(), RuntimeError> {
        self.inner.release(handles).await
    }

    async fn retain(&self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        self.inner.retain(handle).await
    }

    async fn bind(&self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError> {
        self.inner.bind(scope, key, value).await
    }

    async fn lookup(&self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError> {
        self.inner.lookup(scope, key).await
    }

    async fn convert_from_host(&self, value: &BindValue) -> Result<ObjectRef, RuntimeError> {
        self.inner.convert_from_host(value).await
    }

    async fn describe(&self, handle: ObjectRef) -> Result<NativeValue, RuntimeError> {
        self.inner.describe(handle).await
    }

    async fn evaluate(
        &self,
        scope: ObjectRef,
        code: &str,
        request: &EvalRequest,
    ) -> Result<Capture, RuntimeError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.inner.evaluate(scope, code, request).await
    }

    async fn parse(&self, code: &str) -> Result<(), RuntimeError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        self.inner.parse(code).await
    }

    async fn replay_plot(&self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError> {
        self.inner.replay_plot(plot, size).await
    }

    async fn call(
        &self,
        function: ObjectRef,
        args: &[ObjectRef],
        graphics: Option<GraphicsSize>,
    ) -> Result<CallCapture, RuntimeError> {
        self.inner.call(function, args, graphics).await
    }
}

pub async fn instance() -> Arc<EnvironmentInstance> {
    let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
    Arc::new(EnvironmentInstance::new(runtime))
}

pub async fn session() -> LiveSession {
    LiveSession::start(Default::default()).await.unwrap()
}
