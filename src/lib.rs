//! LwM2M conformance harness
//!
//! This library drives interactive LwM2M binaries over a pseudo-terminal and
//! turns their printed output back into structured values: payload records,
//! registration events and notification counts.

pub mod cli;
pub mod commands;
pub mod common;
pub mod decode;
pub mod notify;
pub mod registration;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use notify::{CountBounds, NotificationSample};
pub use registration::{RegistrationEvent, RegistrationKind};
pub use session::{Role, Session, SessionOptions};
