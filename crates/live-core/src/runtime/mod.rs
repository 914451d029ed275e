//! Interpreter adapter contract.
//!
//! The pipeline never talks to an interpreter directly. It holds an
//! `Arc<dyn Runtime>` and addresses interpreter-side objects through opaque
//! `ObjectRef` handles. Every operation is a round-trip that may cross a
//! worker boundary, so every operation is async.

pub mod capture;
pub mod value;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RuntimeError;

pub use capture::{Capture, CaptureItem, Condition};
pub use value::{BindValue, Bitmap, CallCapture, Column, HtmlDependency, NativeValue};
pub use worker::{Interpreter, WorkerRuntime};

/// Handle to an object living inside an interpreter connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(pub u64);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    R,
    Python,
}

impl RuntimeKind {
    /// Tag handed to checking routines as `engine`.
    pub fn engine(&self) -> &'static str {
        match self {
            RuntimeKind::R => "r",
            RuntimeKind::Python => "python",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RuntimeKind::R => "R",
            RuntimeKind::Python => "Python",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine())
    }
}

/// Per-evaluation knobs handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRequest {
    /// Elapsed-time budget in seconds, enforced by the interpreter itself.
    pub timelimit: f64,
    pub keep_warning: bool,
    pub keep_message: bool,
    /// When false, the first error aborts evaluation and is returned as
    /// `RuntimeError::User` instead of being recorded as a capture item.
    pub capture_errors: bool,
}

impl Default for EvalRequest {
    fn default() -> Self {
        Self {
            timelimit: 30.0,
            keep_warning: true,
            keep_message: true,
            capture_errors: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsSize {
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// The top-level namespace. Never released.
    fn global_scope(&self) -> ObjectRef;

    async fn create_scope(&self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError>;

    /// Releases handles. Fails with `AlreadyReleased` on the first handle the
    /// interpreter no longer knows about; the remaining handles are still
    /// released.
    async fn release(&self, handles: &[ObjectRef]) -> Result<(), RuntimeError>;

    async fn retain(&self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError>;

    async fn bind(&self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError>;

    async fn lookup(&self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError>;

    async fn convert_from_host(&self, value: &BindValue) -> Result<ObjectRef, RuntimeError>;

    async fn describe(&self, handle: ObjectRef) -> Result<NativeValue, RuntimeError>;

    async fn evaluate(
        &self,
        scope: ObjectRef,
        code: &str,
        request: &EvalRequest,
    ) -> Result<Capture, RuntimeError>;

    async fn parse(&self, code: &str) -> Result<(), RuntimeError>;

    async fn replay_plot(&self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError>;

    async fn call(
        &self,
        function: ObjectRef,
        args: &[ObjectRef],
        graphics: Option<GraphicsSize>,
    ) -> Result<CallCapture, RuntimeError>;
}
