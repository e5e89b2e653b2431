//! Typed wrappers for the handful of `DOM.*` and `Runtime.*` commands the
//! scraper uses.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::error::ScrapeError;
use crate::protocol::DevtoolsChannel;

/// A DevTools DOM node id. Zero never refers to a node.
pub type NodeId = i64;

pub async fn document_root<C>(channel: &mut C) -> Result<NodeId, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let result = channel.call("DOM.getDocument", json!({})).await?;
    result
        .get("root")
        .and_then(|root| root.get("nodeId"))
        .and_then(Value::as_i64)
        .ok_or_else(|| ScrapeError::MalformedResponse("DOM.getDocument without root.nodeId".into()))
}

/// First descendant of `node` matching `selector`, if any.
pub async fn query_selector<C>(
    channel: &mut C,
    node: NodeId,
    selector: &str,
) -> Result<Option<NodeId>, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let result = channel
        .call("DOM.querySelector", json!({ "nodeId": node, "selector": selector }))
        .await?;
    let id = result
        .get("nodeId")
        .and_then(Value::as_i64)
        .ok_or_else(|| ScrapeError::MalformedResponse("DOM.querySelector without nodeId".into()))?;
    Ok((id != 0).then_some(id))
}

pub async fn query_selector_all<C>(
    channel: &mut C,
    node: NodeId,
    selector: &str,
) -> Result<Vec<NodeId>, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let result = channel
        .call("DOM.querySelectorAll", json!({ "nodeId": node, "selector": selector }))
        .await?;
    let ids = result
        .get("nodeIds")
        .and_then(Value::as_array)
        .ok_or_else(|| ScrapeError::MalformedResponse("DOM.querySelectorAll without nodeIds".into()))?;
    Ok(ids.iter().filter_map(Value::as_i64).filter(|id| *id != 0).collect())
}

pub async fn outer_html<C>(channel: &mut C, node: NodeId) -> Result<String, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let result = channel.call("DOM.getOuterHTML", json!({ "nodeId": node })).await?;
    result
        .get("outerHTML")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::MalformedResponse("DOM.getOuterHTML without outerHTML".into()))
}

/// Evaluate `expression` in the page and return its value. `None` means the
/// expression produced `undefined`. A thrown exception comes back as
/// [`ScrapeError::RemoteError`].
pub async fn evaluate<C>(channel: &mut C, expression: &str) -> Result<Option<Value>, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let result = channel
        .call(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;

    if let Some(exception) = result.get("exceptionDetails") {
        let message = exception
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| exception.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception")
            .to_string();
        return Err(ScrapeError::RemoteError {
            code: exception.get("exceptionId").and_then(Value::as_i64).unwrap_or(0),
            message,
            data: None,
        });
    }

    Ok(result.get("result").and_then(|r| r.get("value")).cloned())
}

/// Poll `expression` until it evaluates to `true` or `timeout` passes.
/// Returns whether the condition was met; running out of time is not an
/// error, the caller decides what an unmet condition means.
pub async fn wait_for<C>(
    channel: &mut C,
    expression: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<bool, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if evaluate(channel, expression).await? == Some(Value::Bool(true)) {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            debug!(expression, ?timeout, "Condition not met before deadline");
            return Ok(false);
        }
        trace!(expression, "Condition not met yet");
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedChannel;

    #[tokio::test]
    async fn query_selector_maps_zero_to_none() {
        let mut channel = ScriptedChannel::new(|method, params| match method {
            "DOM.querySelector" if params["selector"] == "span.present" => Ok(json!({"nodeId": 12})),
            "DOM.querySelector" => Ok(json!({"nodeId": 0})),
            other => panic!("unexpected {other}"),
        });
        assert_eq!(query_selector(&mut channel, 1, "span.present").await.unwrap(), Some(12));
        assert_eq!(query_selector(&mut channel, 1, "span.absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn evaluate_surfaces_exceptions() {
        let mut channel = ScriptedChannel::new(|_, _| {
            Ok(json!({
                "result": {"type": "object", "subtype": "error"},
                "exceptionDetails": {
                    "exceptionId": 4,
                    "text": "Uncaught",
                    "exception": {"description": "TypeError: Cannot read properties of null"}
                }
            }))
        });
        match evaluate(&mut channel, "null.x").await {
            Err(ScrapeError::RemoteError { code, message, .. }) => {
                assert_eq!(code, 4);
                assert!(message.starts_with("TypeError"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn evaluate_undefined_is_none() {
        let mut channel = ScriptedChannel::new(|_, _| Ok(json!({"result": {"type": "undefined"}})));
        assert_eq!(evaluate(&mut channel, "void 0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_for_polls_until_true() {
        let mut polls = 0;
        let mut channel = ScriptedChannel::new(move |_, _| {
            polls += 1;
            Ok(json!({"result": {"type": "boolean", "value": polls >= 3}}))
        });
        let met = wait_for(&mut channel, "ready()", Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(met);
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn wait_for_gives_up_without_error() {
        let mut channel =
            ScriptedChannel::new(|_, _| Ok(json!({"result": {"type": "boolean", "value": false}})));
        let met = wait_for(&mut channel, "never()", Duration::from_millis(20), Duration::from_millis(5))
            .await
            .unwrap();
        assert!(!met);
    }
}
