// SurfaceGate - per-platform allow-list of entry surfaces
//
// Consulted on every ingress carrying a platform_id and surface_type.
// Missing or disabled bindings reject with SurfaceNotBound. Lookups are
// cached with a short TTL; every surface mutation invalidates the cache so
// a just-disabled surface cannot admit workflows past T_cache.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use ade_core::{AdeError, AdeResult, StoreRef, SurfaceContext, SurfaceType};

/// Cache TTL bounding staleness across processes
const CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedBinding {
    enabled: bool,
    cached_at: Instant,
}

/// The ingress surface gate
pub struct SurfaceGate {
    store: StoreRef,
    cache: DashMap<(String, SurfaceType), CachedBinding>,
}

impl SurfaceGate {
    pub fn new(store: StoreRef) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Check an ingress. Legacy workflows (no surface context) skip the
    /// gate entirely.
    pub async fn check(&self, surface_context: Option<&SurfaceContext>) -> AdeResult<()> {
        let Some(ctx) = surface_context else {
            return Ok(());
        };

        let key = (ctx.platform_id.clone(), ctx.surface_type);
        if let Some(cached) = self.cache.get(&key) {
            if cached.cached_at.elapsed() < CACHE_TTL {
                return if cached.enabled {
                    Ok(())
                } else {
                    Err(self.rejection(ctx))
                };
            }
        }

        let binding = self
            .store
            .get_surface(&ctx.platform_id, ctx.surface_type)
            .await?;
        let enabled = binding.map(|b| b.enabled).unwrap_or(false);
        self.cache.insert(
            key,
            CachedBinding {
                enabled,
                cached_at: Instant::now(),
            },
        );

        if enabled {
            debug!(platform_id = %ctx.platform_id, surface = %ctx.surface_type, "surface admitted");
            Ok(())
        } else {
            Err(self.rejection(ctx))
        }
    }

    fn rejection(&self, ctx: &SurfaceContext) -> AdeError {
        AdeError::SurfaceNotBound(format!(
            "platform {} does not admit {} ingress",
            ctx.platform_id, ctx.surface_type
        ))
    }

    /// Invalidate one binding. Called by every surface mutation.
    pub fn invalidate(&self, platform_id: &str, surface_type: SurfaceType) {
        self.cache
            .remove(&(platform_id.to_string(), surface_type));
    }

    /// Invalidate every binding of a platform.
    pub fn invalidate_platform(&self, platform_id: &str) {
        self.cache.retain(|(pid, _), _| pid != platform_id);
    }
}
