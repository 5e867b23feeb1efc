//! Provider pools and the gateway that drives them.
//!
//! Providers implement `vanillaclaw_core::Provider`. A [`ProviderGroup`]
//! holds a primary and a fallback pool; the [`ProviderGateway`] walks them
//! sequentially or races them according to the strategy mode and tier.

pub mod gateway;
pub mod group;

pub use gateway::{AttemptOutcome, ChatResult, ProviderAttempt, ProviderGateway, Walk};
pub use group::{Pool, ProviderGroup};
