//! Where things live in Discord's UI.
//!
//! The scraper never hard-codes a selector: everything it clicks or queries is
//! named here, so a Discord UI update means editing this table (or shipping a
//! JSON override, see [`crate::config`]) instead of touching the protocol or
//! orchestration code.

use serde::{Deserialize, Serialize};

/// The named selectors and traversal steps used to reach and read the
/// friends list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorStrategy {
    /// Home navigation link in the guild sidebar.
    pub home_button: String,
    /// Entry point for direct messages.
    pub direct_messages: String,
    /// The "Friends" button, which has no stable selector of its own.
    pub friends_tab: TraversalStep,
    /// One row per friend in the friends list.
    pub contact_row: String,
    /// Username text, relative to a contact row.
    pub username: String,
    /// Discriminator text (`#1234`), relative to a contact row.
    pub discriminator: String,
}

impl Default for LocatorStrategy {
    fn default() -> Self {
        Self {
            home_button: r#"a[aria-label="Home"][href]"#.to_string(),
            direct_messages: "a[href='/channels/@me']".to_string(),
            friends_tab: TraversalStep::default(),
            contact_row: "div[class^='friendsRow']".to_string(),
            username: "span[class^='username-']".to_string(),
            discriminator: "span[class^='discriminator-']".to_string(),
        }
    }
}

impl LocatorStrategy {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Locate an element relative to an anchor: pick the `anchor_index`-th match
/// of `anchor`, climb `ancestor_levels` parents, then pick the
/// `target_index`-th descendant matching `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalStep {
    pub anchor: String,
    pub anchor_index: usize,
    pub ancestor_levels: usize,
    pub target: String,
    pub target_index: usize,
}

impl Default for TraversalStep {
    fn default() -> Self {
        Self {
            anchor: "svg[name='PersonWaving']".to_string(),
            anchor_index: 1,
            ancestor_levels: 2,
            target: "div[role='button']".to_string(),
            target_index: 2,
        }
    }
}

impl TraversalStep {
    /// Script that performs the traversal and clicks the result. Evaluates to
    /// `true` when something was clicked.
    pub fn click_script(&self) -> String {
        format!(
            r#"(function () {{
  let node = document.querySelectorAll({anchor})[{anchor_index}];
  for (let i = 0; i < {levels} && node; i++) {{
    node = node.parentElement;
  }}
  if (!node) {{
    return false;
  }}
  const target = node.querySelectorAll({target})[{target_index}];
  if (!target) {{
    return false;
  }}
  target.click();
  return true;
}})()"#,
            anchor = js_string(&self.anchor),
            anchor_index = self.anchor_index,
            levels = self.ancestor_levels,
            target = js_string(&self.target),
            target_index = self.target_index,
        )
    }
}

/// Script that clicks the first element matching `selector`. Evaluates to
/// `true` when the element existed.
pub fn click_script(selector: &str) -> String {
    format!(
        r#"(function () {{
  const el = document.querySelector({selector});
  if (!el) {{
    return false;
  }}
  el.click();
  return true;
}})()"#,
        selector = js_string(selector)
    )
}

/// Script that evaluates to `true` once `selector` matches anything.
pub fn presence_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

/// Quote `s` as a JavaScript string literal. JSON string syntax is a subset
/// of JavaScript's, so serde_json's escaping is sufficient.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
