use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use itertools::Itertools;
use serde_json::{Map, Value as Json};
use smr_code::{CodeDescriptor, DescriptorSource, Record};
use smr_stackvm::{Value, Vm, VmError, DEFAULT_MAX_DEPTH};
use tracing::{debug, trace};

use crate::engine::ReconstructionEngine;
use crate::error::RunnerError;
use crate::inspect::inspect_fault;
use crate::overlay::EnvironmentOverlay;
use crate::response::Response;

/// Positional and keyword arguments of one call, still in JSON form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub args: Vec<Json>,
    pub kwargs: Map<String, Json>,
}

impl Arguments {
    pub fn new(args: Vec<Json>, kwargs: Map<String, Json>) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Vec<Json>) -> Self {
        Self::new(args, Map::new())
    }

    /// Splits a request `params` value. Arrays are positional, objects are
    /// keywords, and `{"args": [...], "kwargs": {...}}` carries both.
    pub fn from_params(function: &str, params: Json) -> Result<Self, RunnerError> {
        match params {
            Json::Null => Ok(Self::default()),
            Json::Array(args) => Ok(Self::positional(args)),
            Json::Object(mut record) if is_split_form(&record) => {
                let args = match record.remove("args") {
                    None => Vec::new(),
                    Some(Json::Array(args)) => args,
                    Some(other) => return Err(invalid(function, split_back(other, record))),
                };
                match record.remove("kwargs") {
                    None => Ok(Self::positional(args)),
                    Some(Json::Object(kwargs)) => Ok(Self::new(args, kwargs)),
                    Some(other) => {
                        let mut attempted = Map::new();
                        attempted.insert("args".to_string(), Json::Array(args));
                        attempted.insert("kwargs".to_string(), other);
                        Err(invalid(function, Json::Object(attempted)))
                    }
                }
            }
            Json::Object(kwargs) => Ok(Self::new(Vec::new(), kwargs)),
            other => Err(invalid(function, other)),
        }
    }
}

fn is_split_form(record: &Map<String, Json>) -> bool {
    !record.is_empty() && record.keys().all(|key| key == "args" || key == "kwargs")
}

fn split_back(args: Json, mut rest: Map<String, Json>) -> Json {
    rest.insert("args".to_string(), args);
    Json::Object(rest)
}

fn invalid(function: &str, attempted: Json) -> RunnerError {
    RunnerError::InvalidArguments {
        function: function.to_string(),
        attempted,
    }
}

/// Runs descriptors one call at a time: reconstruct, bind arguments, call,
/// and turn whatever comes out into a value or a `RunnerError`.
#[derive(Debug, Clone)]
pub struct InvocationExecutor {
    engine: ReconstructionEngine,
    overlay: EnvironmentOverlay,
    max_depth: usize,
}

impl Default for InvocationExecutor {
    fn default() -> Self {
        Self::new(ReconstructionEngine::default())
    }
}

impl InvocationExecutor {
    pub fn new(engine: ReconstructionEngine) -> Self {
        Self {
            engine,
            overlay: EnvironmentOverlay::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_overlay(mut self, overlay: EnvironmentOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn engine(&self) -> &ReconstructionEngine {
        &self.engine
    }

    pub fn overlay(&self) -> &EnvironmentOverlay {
        &self.overlay
    }

    /// Calls the function described by `descriptor`. Argument binding is
    /// left to the interpreter, so arity mismatches surface as runtime
    /// faults just like faults raised by the body. Integers outside the
    /// 64-bit range are refused as invalid arguments.
    pub fn invoke(
        &self,
        descriptor: &CodeDescriptor,
        args: &[Json],
        kwargs: &Map<String, Json>,
    ) -> Result<Json, RunnerError> {
        let function = self.engine.build(descriptor, &self.overlay)?;
        let name = function.name.clone();
        if !args.iter().chain(kwargs.values()).all(integers_fit) {
            let mut attempted = Map::new();
            attempted.insert("args".to_string(), Json::Array(args.to_vec()));
            attempted.insert("kwargs".to_string(), Json::Object(kwargs.clone()));
            return Err(invalid(&name, Json::Object(attempted)));
        }
        debug!(function = %name, args = args.len(), kwargs = kwargs.len(), "invoking");
        trace!(args = %args.iter().join(", "), "positional arguments");

        let positional: Vec<Value> = args.iter().map(Value::from_json).collect();
        let keywords: Vec<(String, Value)> = kwargs
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_json(value)))
            .collect();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            Vm::with_max_depth(self.max_depth)
                .call_function(&function, positional, keywords)
                .map(|value| value.to_json())
        }));

        match outcome {
            Ok(Ok(value)) => {
                debug!(function = %name, "returned");
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(function = %name, fault = %err, "raised");
                Err(runtime_fault(&name, args, kwargs, &err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                debug!(function = %name, %message, "interpreter panicked");
                Err(RunnerError::Internal(message))
            }
        }
    }

    pub fn respond(
        &self,
        descriptor: &CodeDescriptor,
        args: &[Json],
        kwargs: &Map<String, Json>,
        id: Option<Json>,
    ) -> Response {
        match self.invoke(descriptor, args, kwargs) {
            Ok(value) => Response::as_result(value, id),
            Err(err) => Response::as_failure(&err, id),
        }
    }

    /// Full pipeline from a raw transport record.
    pub fn run_record(
        &self,
        record: &Record,
        args: &[Json],
        kwargs: &Map<String, Json>,
        id: Option<Json>,
    ) -> Response {
        match CodeDescriptor::from_record(record) {
            Ok(descriptor) => self.respond(&descriptor, args, kwargs, id),
            Err(err) => {
                debug!(error = %err, "descriptor rejected");
                Response::as_failure(&RunnerError::from(err), id)
            }
        }
    }

    pub fn run_json(
        &self,
        text: &str,
        args: &[Json],
        kwargs: &Map<String, Json>,
        id: Option<Json>,
    ) -> Response {
        match CodeDescriptor::from_json(text) {
            Ok(descriptor) => self.respond(&descriptor, args, kwargs, id),
            Err(err) => Response::as_failure(&RunnerError::from(err), id),
        }
    }

    pub fn run_located(
        &self,
        source: &dyn DescriptorSource,
        locator: &str,
        args: &[Json],
        kwargs: &Map<String, Json>,
        id: Option<Json>,
    ) -> Response {
        match CodeDescriptor::from_external_source(source, locator) {
            Ok(descriptor) => self.respond(&descriptor, args, kwargs, id),
            Err(err) => {
                debug!(locator, error = %err, "descriptor unavailable");
                Response::as_failure(&RunnerError::from(err), id)
            }
        }
    }
}

/// Interpreter integers are 64-bit; larger JSON integers are refused rather
/// than silently turned into floats.
fn integers_fit(value: &Json) -> bool {
    match value {
        Json::Number(number) => !number.is_u64() || number.is_i64(),
        Json::Array(items) => items.iter().all(integers_fit),
        Json::Object(map) => map.values().all(integers_fit),
        _ => true,
    }
}

fn runtime_fault(
    function: &str,
    args: &[Json],
    kwargs: &Map<String, Json>,
    err: &VmError,
) -> RunnerError {
    RunnerError::RuntimeFault {
        function: function.to_string(),
        summary: err.to_string(),
        args: args.to_vec(),
        kwargs: kwargs.clone(),
        inspection: inspect_fault(&err.fault),
        traceback: err.fault.traceback(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "interpreter panicked".to_string()
    }
}
