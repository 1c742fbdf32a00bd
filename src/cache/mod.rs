//! # Cache Module
//!
//! Short-lived caching for values that are expensive to obtain from
//! external extractors.
//!
//! Resolved stream URLs are signed and expire upstream, so they are cached
//! with a TTL rather than kept forever. Queue entries never hold cached
//! values by reference: a cache hit produces a fresh frozen track.
//!
//! ## Configuration
//!
//! ```env
//! STREAM_URL_TTL=30m          # How long a resolved stream URL is reused
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guildcast::cache::StreamUrlCache;
//! use std::time::Duration;
//!
//! # fn example() {
//! let cache = StreamUrlCache::new(500, Some(Duration::from_secs(1800)));
//! cache.insert(
//!     "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
//!     "https://rr1---sn.googlevideo.com/videoplayback?...".to_string(),
//! );
//! # }
//! ```

pub mod ttl_cache;

pub use ttl_cache::{CacheMetrics, TtlCache};

use tracing::info;

/// Máximo de URLs de stream en memoria
pub const STREAM_URL_CAPACITY: usize = 500;

/// URL original del track → URL de stream resuelta
pub type StreamUrlCache = TtlCache<String, String>;

impl StreamUrlCache {
    /// Limpieza periódica de URLs vencidas
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache de streams: {} URLs vencidas eliminadas", removed);
        }
    }
}
