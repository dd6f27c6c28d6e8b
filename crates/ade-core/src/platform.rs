// ADE Core - Platform and surface binding types
//
// Platforms own workflow definitions and an allow-list of entry surfaces.
// Surface bindings are unique on (platform_id, surface_type); a missing or
// disabled binding rejects ingress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entry surface types a platform may admit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfaceType {
    Rest,
    Webhook,
    Cli,
    Dashboard,
    MobileApi,
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SurfaceType::Rest => "REST",
            SurfaceType::Webhook => "WEBHOOK",
            SurfaceType::Cli => "CLI",
            SurfaceType::Dashboard => "DASHBOARD",
            SurfaceType::MobileApi => "MOBILE_API",
        };
        write!(f, "{}", s)
    }
}

/// Platform - logical grouping that owns definitions and surface bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    /// Stable identifier
    pub id: String,

    /// Platform name
    pub name: String,

    /// Layer tag (e.g. "delivery", "experimentation")
    #[serde(default)]
    pub layer: String,

    /// Whether the platform accepts new workflows
    #[serde(default = "default_active")]
    pub active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Platform {
    pub fn new(name: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            layer: layer.into(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Surface binding - one row per (platform, surface type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSurface {
    /// Owning platform
    pub platform_id: String,

    /// Surface type this binding admits
    pub surface_type: SurfaceType,

    /// Opaque per-surface configuration
    #[serde(default)]
    pub config: serde_json::Value,

    /// Disabled bindings reject ingress exactly like missing ones
    pub enabled: bool,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl PlatformSurface {
    pub fn new(platform_id: impl Into<String>, surface_type: SurfaceType) -> Self {
        Self {
            platform_id: platform_id.into(),
            surface_type,
            config: serde_json::Value::Null,
            enabled: true,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_type_serialization() {
        assert_eq!(
            serde_json::to_string(&SurfaceType::MobileApi).unwrap(),
            "\"MOBILE_API\""
        );
        let parsed: SurfaceType = serde_json::from_str("\"WEBHOOK\"").unwrap();
        assert_eq!(parsed, SurfaceType::Webhook);
    }

    #[test]
    fn test_surface_type_rejects_unknown() {
        assert!(serde_json::from_str::<SurfaceType>("\"CARRIER_PIGEON\"").is_err());
    }

    #[test]
    fn test_surface_type_display() {
        assert_eq!(SurfaceType::Rest.to_string(), "REST");
        assert_eq!(SurfaceType::MobileApi.to_string(), "MOBILE_API");
    }

    #[test]
    fn test_new_surface_enabled_by_default() {
        let surface = PlatformSurface::new("p1", SurfaceType::Rest);
        assert!(surface.enabled);
        assert_eq!(surface.platform_id, "p1");
    }

    #[test]
    fn test_platform_defaults() {
        let platform = Platform::new("ml-platform", "experimentation");
        assert!(platform.active);
        assert!(!platform.id.is_empty());
    }
}
