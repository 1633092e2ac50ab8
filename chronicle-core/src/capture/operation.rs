//! Interception boundary: what gets called and how

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;

use crate::record::CallError;

/// One intercepted call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub function_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl Invocation {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Set a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }
}

/// A callable whose calls can be captured and replayed
#[async_trait]
pub trait Operation: Send + Sync {
    async fn invoke(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> std::result::Result<Value, CallError>;
}

#[async_trait]
impl<F> Operation for F
where
    F: Fn(&[Value], &Map<String, Value>) -> std::result::Result<Value, CallError> + Send + Sync,
{
    async fn invoke(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> std::result::Result<Value, CallError> {
        (self)(args, kwargs)
    }
}

/// Adapter turning an async closure over owned arguments into an [`Operation`]
pub struct AsyncOperation<F> {
    f: F,
}

impl<F, Fut> AsyncOperation<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, CallError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Operation for AsyncOperation<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, CallError>> + Send,
{
    async fn invoke(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> std::result::Result<Value, CallError> {
        (self.f)(args.to_vec(), kwargs.clone()).await
    }
}

/// Shorthand for [`AsyncOperation::new`]
pub fn async_operation<F, Fut>(f: F) -> AsyncOperation<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, CallError>> + Send,
{
    AsyncOperation::new(f)
}
