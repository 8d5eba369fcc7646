//! Periodic `SYNC_REPOSITORY` emission (§4.2), replacing file-watch polling
//! with a plain interval since there's no local filesystem to watch here:
//! every repository gets resynced roughly every `sync_interval_secs`, with
//! jitter so a fleet of repositories doesn't all wake the worker at once.

use rand::{distributions::Uniform, thread_rng, Rng};
use tracing::{error, info};

use crate::context::Context;
use crate::queue::{Priority, TaskPayload, TaskType};

/// Adds up to half the base interval again, in seconds, so repeated ticks
/// across many repositories don't line up.
fn jittery_interval(base: std::time::Duration) -> std::time::Duration {
    let jitter = thread_rng().sample(Uniform::new(0, 1 + base.as_secs() / 2));
    base + std::time::Duration::from_secs(jitter)
}

pub async fn run(ctx: &Context, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        let sleep = jittery_interval(ctx.config.sync_interval());
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler received shutdown signal");
                    return;
                }
            }
            _ = tokio::time::sleep(sleep) => {
                if let Err(e) = enqueue_sync_for_all_repositories(ctx).await {
                    error!(error = %e, "failed to enqueue periodic sync");
                }
            }
        }
    }
}

async fn enqueue_sync_for_all_repositories(ctx: &Context) -> crate::error::Result<()> {
    let repo_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM repositories WHERE cloned_path IS NOT NULL")
        .fetch_all(&ctx.pool)
        .await?;

    for repo_id in &repo_ids {
        ctx.queue
            .enqueue_tasks(
                &[TaskType::SyncRepository],
                Priority::Background,
                &TaskPayload::for_repo(*repo_id),
            )
            .await?;
    }

    info!(count = repo_ids.len(), "enqueued periodic repository sync");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;
    use crate::queue::TaskQueue;
    use std::time::Duration;

    #[test]
    fn jittery_interval_never_shrinks_and_caps_at_half_base() {
        let base = Duration::from_secs(60);
        for _ in 0..100 {
            let got = jittery_interval(base);
            assert!(got >= base);
            assert!(got <= base + Duration::from_secs(30));
        }
    }

    #[test]
    fn jittery_interval_handles_zero_base() {
        let got = jittery_interval(Duration::from_secs(0));
        assert_eq!(got, Duration::from_secs(0));
    }

    #[tokio::test]
    async fn enqueue_sync_skips_repositories_without_a_clone() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool.clone());

        sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri, cloned_path)
             VALUES ('https://a', 'https://a', '/tmp/a')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO repositories (remote_uri, sanitized_remote_uri)
             VALUES ('https://b', 'https://b')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM repositories WHERE cloned_path IS NOT NULL")
                .fetch_all(&pool)
                .await
                .unwrap();
        for repo_id in &repo_ids {
            queue
                .enqueue_tasks(
                    &[TaskType::SyncRepository],
                    Priority::Background,
                    &TaskPayload::for_repo(*repo_id),
                )
                .await
                .unwrap();
        }

        let task = queue.take().await.unwrap().unwrap();
        assert_eq!(task.r#type, TaskType::SyncRepository);
        assert!(queue.take().await.unwrap().is_none());
    }
}
