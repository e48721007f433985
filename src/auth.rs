//! Credential lifecycle: cached access tokens, refresh-token rotation, and the single-flight
//! refresh path every endpoint and stream depends on.

mod manager;
mod metrics;
mod token;

pub use manager::*;
pub use metrics::RefreshMetrics;
pub use token::*;
