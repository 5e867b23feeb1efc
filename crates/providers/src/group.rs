//! Provider pools.

use std::sync::Arc;
use vanillaclaw_core::{Provider, ProviderTier};

pub use vanillaclaw_core::Pool;

/// An ordered primary pool and an ordered fallback pool.
///
/// The primary pool is always tried before the fallback pool.
#[derive(Clone, Default)]
pub struct ProviderGroup {
    pub primary: Vec<Arc<dyn Provider>>,
    pub fallback: Vec<Arc<dyn Provider>>,
}

impl ProviderGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the primary pool.
    pub fn primary(mut self, provider: Arc<dyn Provider>) -> Self {
        self.primary.push(provider);
        self
    }

    /// Append a provider to the fallback pool.
    pub fn fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback.push(provider);
        self
    }

    /// Pools in the order they are tried.
    pub fn pools(&self) -> [(Pool, &[Arc<dyn Provider>]); 2] {
        [
            (Pool::Primary, self.primary.as_slice()),
            (Pool::Fallback, self.fallback.as_slice()),
        ]
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.fallback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ProviderGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |pool: &[Arc<dyn Provider>]| -> Vec<String> {
            pool.iter().map(|p| format!("{}({})", p.id(), p.tier())).collect()
        };
        f.debug_struct("ProviderGroup")
            .field("primary", &ids(&self.primary))
            .field("fallback", &ids(&self.fallback))
            .finish()
    }
}

/// True when every provider in the pool is metered.
pub(crate) fn all_paid(providers: &[Arc<dyn Provider>]) -> bool {
    !providers.is_empty() && providers.iter().all(|p| p.tier() == ProviderTier::Paid)
}
