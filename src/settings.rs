use async_trait::async_trait;
use dashmap::DashMap;
use deskcore::channel::TenantId;

/// Attachment size budget in MiB, string-encoded.
pub const UPLOAD_LIMIT: &str = "uploadLimit";
/// `"enabled"` lets queue members follow group conversations they are not assigned to.
pub const GROUP_CONVERSATIONS: &str = "CheckMsgIsGroup";

/// Per-tenant key/value settings.
#[async_trait]
pub trait TenantSettings: Send + Sync {
    async fn get_setting(&self, tenant_id: TenantId, key: &str) -> anyhow::Result<Option<String>>;
}

pub async fn is_enabled(settings: &dyn TenantSettings, tenant_id: TenantId, key: &str) -> bool {
    match settings.get_setting(tenant_id, key).await {
        Ok(value) => value.as_deref() == Some("enabled"),
        Err(e) => {
            log::warn!(target: "Settings", "Failed to read {key} for tenant {tenant_id}: {e}");
            false
        }
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: DashMap<(TenantId, String), String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: TenantId, key: &str, value: impl Into<String>) {
        self.values.insert((tenant_id, key.to_string()), value.into());
    }
}

#[async_trait]
impl TenantSettings for MemorySettings {
    async fn get_setting(&self, tenant_id: TenantId, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .values
            .get(&(tenant_id, key.to_string()))
            .map(|v| v.value().clone()))
    }
}
