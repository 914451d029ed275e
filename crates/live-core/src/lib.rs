//! Evaluation, environment and grading pipeline for live code exercises.
//!
//! A page hands code snippets to this crate and gets back rendered output,
//! exported values and, for exercises, a grading verdict. The interpreter
//! itself sits behind the `Runtime` contract and may live on another thread.
//!
//! # Architecture Overview
//!
//! - **Indicator**: busy/idle aggregation across every evaluation on a page
//! - **Environments**: named, inheritable scopes inside one interpreter
//!   connection, addressed by role through an `EnvironmentManager`
//! - **Evaluator**: binds inputs, runs setup and user code, renders the
//!   capture and exports named values
//! - **Grader**: pre-flight checks, checking routine invocation and feedback
//! - **Runtime**: the interpreter adapter contract and its worker boundary,
//!   plus a bundled reference interpreter for a small R dialect

pub mod config;
pub mod convert;
pub mod environment;
pub mod errors;
pub mod evaluator;
pub mod grader;
pub mod indicator;
pub mod interp;
pub mod page;
pub mod render;
pub mod runtime;
pub mod session;
pub mod shelter;

pub use config::*;
pub use convert::{HostCallable, HostValue};
pub use environment::{DiscardPolicy, EnvRole, EnvironmentInstance, EnvironmentManager};
pub use errors::{LiveError, RuntimeError};
pub use evaluator::{EvaluateContext, EvaluateOptions, Evaluation, EvaluationState, Evaluator, OutputMode};
pub use grader::{Feedback, Grader, GradeOutcome};
pub use indicator::{Indicator, IndicatorRegistry};
pub use interp::MinirInterpreter;
pub use page::{PageDocument, PageServices, StaticDocument, ValueRegistry, ValueStore};
pub use render::DisplayNode;
pub use runtime::{Runtime, RuntimeKind, WorkerRuntime};
pub use session::{CellReport, LiveSession};
pub use shelter::Shelter;
