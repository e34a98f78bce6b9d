//! Test utilities shared across crate-level unit tests.

pub mod delegate;
pub mod http;
pub mod scripted;

pub use delegate::{DelegateEvent, RecordingDelegate};
pub use http::{start_mock_server, try_start_server};
pub use scripted::{Script, ScriptedTransport, Step};
