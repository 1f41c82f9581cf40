#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sealant-devtools
//!
//! DevTools protocol channel for Sealant.
//!
//! Implements the engine's [`sealant_engine::Connector`] and
//! [`sealant_engine::Inspector`] over a DevTools WebSocket:
//!
//! - [`discovery`] finds the page's debugger URL from the `/json` listing
//! - [`protocol`] encodes commands and decodes responses and events
//! - [`connection`] correlates commands with responses and feeds events into
//!   the session's trackers
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sealant_devtools::DevToolsConnector;
//! use sealant_engine::{CaseOptions, EvaluateAction, SealantConfig, measure_case};
//!
//! let config = SealantConfig::from_env();
//! let connector = Arc::new(DevToolsConnector::from_config(&config)?);
//! let mut action = EvaluateAction::new("document.querySelector('#add').click()");
//! let outcome = measure_case(config, connector, "add", CaseOptions::timeline(), &mut action).await?;
//! ```

pub mod connection;
pub mod discovery;
pub mod error;
pub mod protocol;

pub use connection::{CdpConnection, DEFAULT_COMMAND_TIMEOUT, DevToolsConnector};
pub use discovery::websocket_debugger_url;
pub use error::{Error, Result};
pub use protocol::{Frame, RpcError};
