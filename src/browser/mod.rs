//! Chrome DevTools Protocol plumbing for the browser capture path.

pub mod cdp;
pub mod launch;
pub mod session;

use std::time::Duration;

use thiserror::Error;

pub use cdp::{CdpClient, CdpEvent};
pub use launch::{BrowserProcess, DevtoolsEndpoint, PageTarget};
pub use session::{InstallCheck, PageSession, PageSlot};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrowserError {
    #[error("devtools socket error: {0}")]
    Socket(String),

    #[error("devtools connection closed")]
    Closed,

    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("{method} failed: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page script threw: {0}")]
    ScriptException(String),

    #[error("capture interceptor is not present in the page")]
    InterceptorNotInstalled,

    #[error("capture interceptor ran after document start (readyState={0})")]
    InterceptorInstalledLate(String),
}
