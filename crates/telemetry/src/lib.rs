//! Run metrics and cost estimation for VanillaClaw.
//!
//! Counts provider calls, tool executions, parse failures and token usage
//! for a single run, and estimates what free-tier usage saved by pricing it
//! against a paid reference model.

pub mod metrics;
pub mod pricing;

pub use metrics::RunMetrics;
pub use pricing::{ModelPricing, PricingTable};
