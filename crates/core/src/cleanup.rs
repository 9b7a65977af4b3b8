//! Removal of auth users that never got a `public.profiles` row.

use crate::admin::{AdminApi, AuthUser};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

pub const USERS_PAGE_SIZE: u32 = 200;
pub const DEFAULT_GRACE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    /// Without this only the orphan list is reported.
    pub execute: bool,
    /// Users younger than this are skipped; their profile may still be being created.
    pub grace: Duration,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            execute: false,
            grace: Duration::minutes(DEFAULT_GRACE_MINUTES),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDeletion {
    pub id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub executed: bool,
    pub scanned: usize,
    pub orphans: Vec<AuthUser>,
    pub deleted: Vec<Uuid>,
    pub failed: Vec<FailedDeletion>,
}

pub async fn list_all_users(api: &dyn AdminApi) -> anyhow::Result<Vec<AuthUser>> {
    let mut out = Vec::new();
    let mut page: u32 = 1;
    loop {
        let batch = api
            .list_users(page, USERS_PAGE_SIZE)
            .await
            .with_context(|| format!("list auth users page {page} failed"))?;
        let len = batch.len();
        out.extend(batch);
        if len < USERS_PAGE_SIZE as usize {
            break;
        }
        page += 1;
    }
    Ok(out)
}

pub async fn profile_ids(pool: &PgPool, ids: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM public.profiles WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("select profiles failed")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Users with no profile that are older than `grace`, oldest first.
pub fn find_orphans(
    users: &[AuthUser],
    profile_ids: &HashSet<Uuid>,
    now: DateTime<Utc>,
    grace: Duration,
) -> Vec<AuthUser> {
    let cutoff = now - grace;
    let mut out: Vec<AuthUser> = users
        .iter()
        .filter(|u| !profile_ids.contains(&u.id) && u.created_at <= cutoff)
        .cloned()
        .collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Deletes each orphan, continuing past individual failures.
pub async fn delete_users(api: &dyn AdminApi, users: &[AuthUser]) -> (Vec<Uuid>, Vec<FailedDeletion>) {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    for user in users {
        match api.delete_user(user.id).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, email = ?user.email, "deleted orphaned auth user");
                deleted.push(user.id);
            }
            Err(err) => {
                tracing::error!(user_id = %user.id, error = %err, "delete auth user failed");
                failed.push(FailedDeletion {
                    id: user.id,
                    error: format!("{err:#}"),
                });
            }
        }
    }
    (deleted, failed)
}

pub async fn cleanup_orphans(
    api: &dyn AdminApi,
    pool: &PgPool,
    opts: CleanupOptions,
) -> anyhow::Result<CleanupReport> {
    anyhow::ensure!(opts.grace >= Duration::zero(), "grace period must be non-negative");

    let users = list_all_users(api).await?;
    let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
    let known = profile_ids(pool, &ids).await?;
    let orphans = find_orphans(&users, &known, Utc::now(), opts.grace);

    tracing::info!(
        scanned = users.len(),
        orphans = orphans.len(),
        execute = opts.execute,
        "orphaned auth users scan"
    );

    let mut report = CleanupReport {
        executed: opts.execute,
        scanned: users.len(),
        ..Default::default()
    };
    if opts.execute {
        let (deleted, failed) = delete_users(api, &orphans).await;
        report.deleted = deleted;
        report.failed = failed;
    }
    report.orphans = orphans;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{Bucket, BucketOutcome, BucketSpec};
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn user(n: u128, created_at: DateTime<Utc>) -> AuthUser {
        AuthUser {
            id: Uuid::from_u128(n),
            email: Some(format!("user{n}@example.com")),
            created_at,
        }
    }

    #[derive(Default)]
    struct FakeAdmin {
        users: Vec<AuthUser>,
        fail_delete: HashSet<Uuid>,
        deleted: Mutex<Vec<Uuid>>,
        pages_requested: Mutex<Vec<u32>>,
    }

    #[async_trait::async_trait]
    impl AdminApi for FakeAdmin {
        async fn list_users(&self, page: u32, per_page: u32) -> anyhow::Result<Vec<AuthUser>> {
            self.pages_requested.lock().unwrap().push(page);
            let start = ((page - 1) * per_page) as usize;
            Ok(self
                .users
                .iter()
                .skip(start)
                .take(per_page as usize)
                .cloned()
                .collect())
        }

        async fn delete_user(&self, id: Uuid) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail_delete.contains(&id), "boom");
            self.deleted.lock().unwrap().push(id);
            Ok(())
        }

        async fn list_buckets(&self) -> anyhow::Result<Vec<Bucket>> {
            Ok(Vec::new())
        }

        async fn create_bucket(&self, _spec: &BucketSpec) -> anyhow::Result<BucketOutcome> {
            Ok(BucketOutcome::Created)
        }

        async fn rpc(&self, _function: &str, _args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn orphans_exclude_profiles_and_recent_signups() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let users = vec![
            user(3, now - Duration::days(2)),
            user(1, now - Duration::days(5)),
            user(2, now - Duration::days(1)),
            user(4, now - Duration::minutes(10)),
        ];
        let profiles: HashSet<Uuid> = [Uuid::from_u128(2)].into_iter().collect();

        let orphans = find_orphans(&users, &profiles, now, Duration::minutes(60));
        let ids: Vec<u128> = orphans.iter().map(|u| u.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn zero_grace_includes_fresh_users() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let users = vec![user(7, now)];
        let orphans = find_orphans(&users, &HashSet::new(), now, Duration::zero());
        assert_eq!(orphans.len(), 1);
    }

    #[tokio::test]
    async fn list_all_users_pages_until_short_page() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let api = FakeAdmin {
            users: (0..(USERS_PAGE_SIZE as u128 + 5)).map(|n| user(n, now)).collect(),
            ..Default::default()
        };
        let all = list_all_users(&api).await.unwrap();
        assert_eq!(all.len(), USERS_PAGE_SIZE as usize + 5);
        assert_eq!(*api.pages_requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn delete_users_continues_after_failure() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let users = vec![user(1, now), user(2, now), user(3, now)];
        let api = FakeAdmin {
            fail_delete: [Uuid::from_u128(2)].into_iter().collect(),
            ..Default::default()
        };

        let (deleted, failed) = delete_users(&api, &users).await;
        assert_eq!(deleted, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, Uuid::from_u128(2));
        assert!(failed[0].error.contains("boom"));
        assert_eq!(api.deleted.lock().unwrap().len(), 2);
    }
}
