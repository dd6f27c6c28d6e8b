// DefinitionService - platform, definition, and surface administration
//
// The CRUD surface consumed by dashboard/API collaborators. Every mutation
// invalidates the corresponding router or gate cache so a stale read can
// never outlive T_cache.

use std::sync::Arc;
use tracing::info;

use ade_core::{
    AdeError, AdeResult, DefinitionDocument, Platform, PlatformSurface, StoreRef, SurfaceType,
    WorkflowDefinition,
};

use crate::gate::SurfaceGate;
use crate::router::StageRouter;

/// Administration service for platforms, definitions, and surfaces
pub struct DefinitionService {
    store: StoreRef,
    router: Arc<StageRouter>,
    gate: Arc<SurfaceGate>,
}

impl DefinitionService {
    pub fn new(store: StoreRef, router: Arc<StageRouter>, gate: Arc<SurfaceGate>) -> Self {
        Self {
            store,
            router,
            gate,
        }
    }

    // ------------------------------------------------------------------
    // Platforms
    // ------------------------------------------------------------------

    pub async fn create_platform(
        &self,
        name: impl Into<String>,
        layer: impl Into<String>,
    ) -> AdeResult<Platform> {
        let platform = Platform::new(name, layer);
        self.store.insert_platform(&platform).await?;
        info!(platform_id = %platform.id, name = %platform.name, "platform created");
        Ok(platform)
    }

    pub async fn list_platforms(&self) -> AdeResult<Vec<Platform>> {
        self.store.list_platforms().await
    }

    // ------------------------------------------------------------------
    // Workflow definitions
    // ------------------------------------------------------------------

    /// Create a definition after validating its graph. The owning platform
    /// must exist.
    pub async fn create_definition(
        &self,
        platform_id: &str,
        name: impl Into<String>,
        document: DefinitionDocument,
    ) -> AdeResult<WorkflowDefinition> {
        self.store
            .get_platform(platform_id)
            .await?
            .ok_or_else(|| AdeError::PlatformNotFound(platform_id.to_string()))?;
        document
            .validate()
            .map_err(AdeError::DefinitionInvalid)?;

        let definition = WorkflowDefinition::new(platform_id, name, document);
        self.store.insert_definition(&definition).await?;
        self.router.invalidate(platform_id);
        info!(
            definition_id = %definition.id,
            platform_id = %platform_id,
            name = %definition.name,
            "workflow definition created"
        );
        Ok(definition)
    }

    pub async fn get_definition(&self, definition_id: &str) -> AdeResult<WorkflowDefinition> {
        self.store
            .get_definition(definition_id)
            .await?
            .ok_or_else(|| AdeError::NotFound(format!("definition {}", definition_id)))
    }

    pub async fn list_definitions(
        &self,
        platform_id: &str,
    ) -> AdeResult<Vec<WorkflowDefinition>> {
        self.store.list_definitions(platform_id, false).await
    }

    /// Replace a definition's stage graph. Writes a new version; the old
    /// one is never mutated in place.
    pub async fn update_definition(
        &self,
        definition_id: &str,
        document: DefinitionDocument,
    ) -> AdeResult<WorkflowDefinition> {
        document
            .validate()
            .map_err(AdeError::DefinitionInvalid)?;
        let mut definition = self.get_definition(definition_id).await?;
        definition.definition = document;
        self.store.update_definition(&definition).await?;
        self.router.invalidate(&definition.platform_id);
        self.get_definition(definition_id).await
    }

    pub async fn set_definition_enabled(
        &self,
        definition_id: &str,
        enabled: bool,
    ) -> AdeResult<WorkflowDefinition> {
        let mut definition = self.get_definition(definition_id).await?;
        definition.enabled = enabled;
        self.store.update_definition(&definition).await?;
        self.router.invalidate(&definition.platform_id);
        info!(definition_id, enabled, "definition toggled");
        self.get_definition(definition_id).await
    }

    pub async fn delete_definition(&self, definition_id: &str) -> AdeResult<()> {
        let definition = self.get_definition(definition_id).await?;
        self.store.delete_definition(definition_id).await?;
        self.router.invalidate(&definition.platform_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Surfaces
    // ------------------------------------------------------------------

    pub async fn list_surfaces(&self, platform_id: &str) -> AdeResult<Vec<PlatformSurface>> {
        self.store.list_surfaces(platform_id).await
    }

    /// Bind (or re-enable) a surface type on a platform.
    pub async fn enable_surface(
        &self,
        platform_id: &str,
        surface_type: SurfaceType,
        config: Option<serde_json::Value>,
    ) -> AdeResult<PlatformSurface> {
        self.store
            .get_platform(platform_id)
            .await?
            .ok_or_else(|| AdeError::PlatformNotFound(platform_id.to_string()))?;

        let mut surface = self
            .store
            .get_surface(platform_id, surface_type)
            .await?
            .unwrap_or_else(|| PlatformSurface::new(platform_id, surface_type));
        surface.enabled = true;
        if let Some(config) = config {
            surface.config = config;
        }
        surface.updated_at = chrono::Utc::now();
        self.store.upsert_surface(&surface).await?;
        self.gate.invalidate(platform_id, surface_type);
        info!(platform_id, surface = %surface_type, "surface enabled");
        Ok(surface)
    }

    /// Update a surface's config without changing its enabled flag.
    pub async fn update_surface(
        &self,
        platform_id: &str,
        surface_type: SurfaceType,
        config: serde_json::Value,
    ) -> AdeResult<PlatformSurface> {
        let mut surface = self
            .store
            .get_surface(platform_id, surface_type)
            .await?
            .ok_or_else(|| {
                AdeError::NotFound(format!("surface {} on platform {}", surface_type, platform_id))
            })?;
        surface.config = config;
        surface.updated_at = chrono::Utc::now();
        self.store.upsert_surface(&surface).await?;
        self.gate.invalidate(platform_id, surface_type);
        Ok(surface)
    }

    pub async fn disable_surface(
        &self,
        platform_id: &str,
        surface_type: SurfaceType,
    ) -> AdeResult<PlatformSurface> {
        let mut surface = self
            .store
            .get_surface(platform_id, surface_type)
            .await?
            .unwrap_or_else(|| PlatformSurface::new(platform_id, surface_type));
        surface.enabled = false;
        surface.updated_at = chrono::Utc::now();
        self.store.upsert_surface(&surface).await?;
        self.gate.invalidate(platform_id, surface_type);
        info!(platform_id, surface = %surface_type, "surface disabled");
        Ok(surface)
    }
}
