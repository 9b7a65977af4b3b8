pub mod supabase;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use supabase::SupabaseAdmin;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSpec {
    pub name: String,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_limit: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOutcome {
    Created,
    AlreadyExists,
}

/// Service-role operations against the backend's auth, storage and REST endpoints.
#[async_trait::async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_users(&self, page: u32, per_page: u32) -> anyhow::Result<Vec<AuthUser>>;

    async fn delete_user(&self, id: Uuid) -> anyhow::Result<()>;

    async fn list_buckets(&self) -> anyhow::Result<Vec<Bucket>>;

    async fn create_bucket(&self, spec: &BucketSpec) -> anyhow::Result<BucketOutcome>;

    async fn rpc(&self, function: &str, args: serde_json::Value)
        -> anyhow::Result<serde_json::Value>;
}
