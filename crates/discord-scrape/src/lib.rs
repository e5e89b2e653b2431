//! Snapshot a locally running Discord client over the Chrome DevTools Protocol
//!
//! The client is restarted with remote debugging enabled when needed, then
//! driven through its main page to read the signed-in account's email, the
//! installed applications and the friends list. [`ScrapeSession`] is the entry
//! point; the modules underneath are usable on their own.

pub mod config;
pub mod dom;
pub mod endpoint;
pub mod error;
pub mod inventory;
pub mod locators;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod social;
pub mod storage;
pub mod supervisor;
#[cfg(test)]
mod test_support;
pub mod utils;

pub use config::ScrapeConfig;
pub use endpoint::{DebugEndpoint, DebugEndpointResolver};
pub use error::ScrapeError;
pub use inventory::InventoryEntry;
pub use locators::LocatorStrategy;
pub use protocol::{DevtoolsChannel, ProtocolClient};
pub use retry::{BackoffPolicy, RetryOrchestrator, SessionState};
pub use session::{Connector, DebugTarget, ScrapeHandle, ScrapeSession, ScrapeSnapshot};
pub use social::ContactEntry;
pub use supervisor::ProcessSupervisor;
