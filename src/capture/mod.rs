//! Capturing the heatmap response as it passes through a page or transport.

pub mod intercept;
pub mod script;
pub mod slot;
pub mod waiter;

pub use intercept::{url_contains, InterceptLayer, Intercepted, Request, RequestKind, Response, Transport};
pub use slot::{capture_slot, Captured, SlotReader, SlotSource, SlotWriter};
pub use waiter::{CancelToken, CaptureOutcome, CaptureWaiter, NotCapturedReason, WaitConfig};
