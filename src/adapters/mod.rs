//! Adapters to the systems the exporter talks to
//!
//! Each adapter sits behind a trait so the orchestration code can be driven
//! by mocks in tests.

mod discovery;
mod informers;
mod jq;
mod port_client;

pub use discovery::*;
pub use informers::*;
pub use jq::*;
pub use port_client::*;
