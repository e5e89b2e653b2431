//! Friends list scraping: click through to the friends page, then read each
//! row's username and discriminator out of the DOM.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::ScrapeConfig;
use crate::dom::{self, NodeId};
use crate::error::ScrapeError;
use crate::locators::{click_script, presence_script, LocatorStrategy};
use crate::protocol::DevtoolsChannel;

/// A single wrapping element around text: `<span class="...">text</span>`.
static WRAPPED_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*<[A-Za-z][A-Za-z0-9-]*(?:\s[^>]*)?>(.*)</[A-Za-z][A-Za-z0-9-]*>\s*$")
        .expect("static regex")
});

static INNER_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    /// `displayName#discriminator`
    pub handle: String,
    pub display_name: String,
}

impl ContactEntry {
    pub fn new(display_name: &str, discriminator: &str) -> Self {
        Self {
            handle: format!("{display_name}#{discriminator}"),
            display_name: display_name.to_string(),
        }
    }
}

pub struct SocialGraphScraper {
    locators: LocatorStrategy,
    navigation_settle: Duration,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl SocialGraphScraper {
    pub fn new(locators: LocatorStrategy) -> Self {
        let defaults = ScrapeConfig::default();
        Self {
            locators,
            navigation_settle: defaults.post_navigation_settle,
            wait_timeout: defaults.dom_wait_timeout,
            poll_interval: defaults.dom_poll_interval,
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            locators: config.locators.clone(),
            navigation_settle: config.post_navigation_settle,
            wait_timeout: config.dom_wait_timeout,
            poll_interval: config.dom_poll_interval,
        }
    }

    pub fn with_timing(mut self, settle: Duration, wait_timeout: Duration, poll_interval: Duration) -> Self {
        self.navigation_settle = settle;
        self.wait_timeout = wait_timeout;
        self.poll_interval = poll_interval;
        self
    }

    #[instrument(skip_all)]
    pub async fn scrape<C>(&self, channel: &mut C) -> Result<Vec<ContactEntry>, ScrapeError>
    where
        C: DevtoolsChannel + ?Sized,
    {
        self.open_friends_page(channel).await?;

        tokio::time::sleep(self.navigation_settle).await;
        let rows_visible = dom::wait_for(
            channel,
            &presence_script(&self.locators.contact_row),
            self.wait_timeout,
            self.poll_interval,
        )
        .await?;
        if !rows_visible {
            info!("No contact rows appeared; treating friends list as empty");
        }

        let contacts = self.read_contacts(channel).await?;
        info!(contacts = contacts.len(), "Friends list scraped");
        Ok(contacts)
    }

    /// Home, then direct messages, then the friends tab. Clicks are fire and
    /// forget: a missing element is logged and the sequence carries on.
    pub async fn open_friends_page<C>(&self, channel: &mut C) -> Result<(), ScrapeError>
    where
        C: DevtoolsChannel + ?Sized,
    {
        let steps = [
            ("home", click_script(&self.locators.home_button)),
            ("direct messages", click_script(&self.locators.direct_messages)),
            ("friends", self.locators.friends_tab.click_script()),
        ];

        for (step, script) in steps {
            let clicked = dom::evaluate(channel, &script).await?;
            if clicked == Some(Value::Bool(true)) {
                debug!(step, "Clicked");
            } else {
                warn!(step, "Navigation element not found");
            }
        }
        Ok(())
    }

    /// Enumerate contact rows on the current page. Rows that do not have the
    /// expected shape are skipped.
    pub async fn read_contacts<C>(&self, channel: &mut C) -> Result<Vec<ContactEntry>, ScrapeError>
    where
        C: DevtoolsChannel + ?Sized,
    {
        let root = dom::document_root(channel).await?;
        let rows = dom::query_selector_all(channel, root, &self.locators.contact_row).await?;
        debug!(rows = rows.len(), "Found contact rows");

        let mut contacts = Vec::with_capacity(rows.len());
        for row in rows {
            match self.read_row(channel, row).await {
                Ok(contact) => contacts.push(contact),
                Err(ScrapeError::MalformedResponse(reason)) => {
                    warn!(row, %reason, "Skipping contact row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(contacts)
    }

    async fn read_row<C>(&self, channel: &mut C, row: NodeId) -> Result<ContactEntry, ScrapeError>
    where
        C: DevtoolsChannel + ?Sized,
    {
        let username = self.read_text(channel, row, &self.locators.username).await?;
        let discriminator = self.read_text(channel, row, &self.locators.discriminator).await?;
        let discriminator = discriminator.trim_start_matches('#');
        if username.is_empty() || discriminator.is_empty() {
            return Err(ScrapeError::MalformedResponse(format!(
                "row {row} has an empty username or discriminator"
            )));
        }
        Ok(ContactEntry::new(&username, discriminator))
    }

    async fn read_text<C>(&self, channel: &mut C, row: NodeId, selector: &str) -> Result<String, ScrapeError>
    where
        C: DevtoolsChannel + ?Sized,
    {
        let node = dom::query_selector(channel, row, selector)
            .await?
            .ok_or_else(|| ScrapeError::MalformedResponse(format!("row {row} has no '{selector}'")))?;
        let markup = dom::outer_html(channel, node).await?;
        element_text(&markup)
            .ok_or_else(|| ScrapeError::MalformedResponse(format!("unexpected markup for '{selector}': {markup}")))
    }
}

/// Text content of markup shaped like `<tag ...>text</tag>`.
pub fn element_text(markup: &str) -> Option<String> {
    let inner = WRAPPED_TEXT.captures(markup)?.get(1)?.as_str();
    let text = INNER_TAG.replace_all(inner, "");
    Some(decode_entities(text.trim()))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
