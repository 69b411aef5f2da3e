//! The uniform data-source contract (spec §4.2).

use crate::error::FetchError;
use crate::model::Feature;
use async_trait::async_trait;

/// Anything the ingestion client can fetch features from. Generalized from
/// the teacher's Solana-RPC-specific fetch methods (`fetch_token_supply`,
/// `fetch_holder_distribution`, ...) into a single per-source trait method,
/// the way `LedgerStorage` generalized the teacher's own persistence calls
/// behind one trait.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name used as the breaker/rate-limiter/cache key and as each
    /// produced `Feature`'s `provenance.source`.
    fn name(&self) -> &str;

    /// Fetch the features this source contributes for `token`. A source
    /// that partially fails should still return whatever features it could
    /// gather rather than erroring the whole call, when that's meaningful;
    /// a hard transport failure returns `Err`.
    async fn fetch(&self, token: &str) -> Result<Vec<Feature>, FetchError>;
}
