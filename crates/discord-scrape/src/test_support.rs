//! In-memory [`DevtoolsChannel`] for unit tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ScrapeError;
use crate::protocol::DevtoolsChannel;

type Responder = Box<dyn FnMut(&str, &Value) -> Result<Value, ScrapeError> + Send>;

/// Answers every command from a closure and records what was sent.
pub(crate) struct ScriptedChannel {
    responder: Responder,
    calls: Vec<(String, Value)>,
}

impl ScriptedChannel {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str, &Value) -> Result<Value, ScrapeError> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Vec::new(),
        }
    }

    pub(crate) fn calls(&self) -> &[(String, Value)] {
        &self.calls
    }

    /// Expressions passed to `Runtime.evaluate`, in order.
    pub(crate) fn evaluated(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(method, _)| method == "Runtime.evaluate")
            .filter_map(|(_, params)| params["expression"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DevtoolsChannel for ScriptedChannel {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, ScrapeError> {
        self.calls.push((method.to_string(), params.clone()));
        (self.responder)(method, &params)
    }
}

/// Wrap a primitive the way `Runtime.evaluate` returns it.
pub(crate) fn remote_value(value: Value) -> Value {
    serde_json::json!({ "result": { "type": "string", "value": value } })
}
