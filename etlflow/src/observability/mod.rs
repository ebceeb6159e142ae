//! Observability utilities.

mod logging;

pub use logging::{init_tracing, try_init_tracing, LogFormat, SpanTimer};
