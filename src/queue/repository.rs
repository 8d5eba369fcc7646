use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::{KoditError, Result};

use super::task::{Priority, Task, TaskPayload, TaskState, TaskType};

/// Database-backed task queue (§4.1).
///
/// `take()` is the only operation with concurrency-sensitive semantics.
/// SQLite has no `SELECT ... FOR UPDATE SKIP LOCKED`, so we get the same
/// guarantee a different way: `BEGIN IMMEDIATE` acquires the database's
/// single write lock up front, so a second concurrent `take()` blocks until
/// the first transaction commits, then sees whichever row (if any) is left
/// — never the same row twice (testable property 5).
#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        task_type: TaskType,
        priority: i64,
        payload: &TaskPayload,
    ) -> Result<i64> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| KoditError::Inconsistent(format!("payload serialization: {e}")))?;
        let now = Utc::now();

        let id = sqlx::query(
            "INSERT INTO tasks (type, payload, priority, state, created_at, attempts)
             VALUES (?, ?, ?, 'pending', ?, 0)",
        )
        .bind(task_type.as_str())
        .bind(payload_json)
        .bind(priority)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Enqueues an ordered pipeline atomically, preserving order via
    /// monotonically increasing priority offsets within `base_priority`'s
    /// band (§4.1).
    pub async fn enqueue_tasks(
        &self,
        sequence: &[TaskType],
        base_priority: Priority,
        payload: &TaskPayload,
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(sequence.len());
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| KoditError::Inconsistent(format!("payload serialization: {e}")))?;
        let now = Utc::now();

        for (index, task_type) in sequence.iter().enumerate() {
            let priority = base_priority.offset(index);
            let id = sqlx::query(
                "INSERT INTO tasks (type, payload, priority, state, created_at, attempts)
                 VALUES (?, ?, ?, 'pending', ?, 0)",
            )
            .bind(task_type.as_str())
            .bind(&payload_json)
            .bind(priority)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn take(&self) -> Result<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let row = sqlx::query(
            "SELECT id, type, payload, priority, state, created_at, taken_at, attempts, last_error
             FROM tasks WHERE state = 'pending'
             ORDER BY priority ASC, created_at ASC
             LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let now = Utc::now();

        sqlx::query("UPDATE tasks SET state = 'in_flight', taken_at = ?, attempts = attempts + 1 WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("COMMIT").execute(&mut *conn).await?;

        let task_type = TaskType::from_str(row.try_get::<String, _>("type")?.as_str())
            .ok_or_else(|| KoditError::Inconsistent("unknown task type in queue row".into()))?;
        let payload: TaskPayload = serde_json::from_str(row.try_get::<String, _>("payload")?.as_str())
            .map_err(|e| KoditError::Inconsistent(format!("payload deserialization: {e}")))?;
        let attempts: i64 = row.try_get("attempts")?;

        Ok(Some(Task {
            id,
            r#type: task_type,
            payload,
            priority: row.try_get("priority")?,
            state: TaskState::InFlight,
            created_at: row.try_get("created_at")?,
            taken_at: Some(now),
            attempts: attempts + 1,
            last_error: None,
        }))
    }

    pub async fn complete(&self, task_id: i64, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                sqlx::query("UPDATE tasks SET state = 'done' WHERE id = ?")
                    .bind(task_id)
                    .execute(&self.pool)
                    .await?;
            }
            Err(e) => {
                sqlx::query("UPDATE tasks SET state = 'failed', last_error = ? WHERE id = ?")
                    .bind(e.to_string())
                    .bind(task_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn in_flight_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM tasks WHERE state = 'in_flight'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("c")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_in_memory;

    #[tokio::test]
    async fn take_respects_priority_bands() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool);

        queue
            .enqueue(TaskType::SyncRepository, Priority::Background.offset(0), &TaskPayload::for_repo(1))
            .await
            .unwrap();
        queue
            .enqueue(TaskType::CloneRepository, Priority::UserInitiated.offset(0), &TaskPayload::for_repo(2))
            .await
            .unwrap();

        let first = queue.take().await.unwrap().unwrap();
        assert_eq!(first.r#type, TaskType::CloneRepository);

        let second = queue.take().await.unwrap().unwrap();
        assert_eq!(second.r#type, TaskType::SyncRepository);

        assert!(queue.take().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_tasks_preserves_pipeline_order() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool);

        let sequence = TaskType::scan_and_index_commit_pipeline();
        queue
            .enqueue_tasks(sequence, Priority::UserInitiated, &TaskPayload::for_commit(1, "deadbeef"))
            .await
            .unwrap();

        for expected in sequence {
            let task = queue.take().await.unwrap().unwrap();
            assert_eq!(task.r#type, *expected);
            queue.complete(task.id, Ok(())).await.unwrap();
        }
    }

    #[tokio::test]
    async fn concurrent_take_never_returns_same_row() {
        let pool = connect_in_memory().await.unwrap();
        let queue = TaskQueue::new(pool);

        for _ in 0..4 {
            queue
                .enqueue(TaskType::ScanCommit, Priority::Background.offset(0), &TaskPayload::for_repo(1))
                .await
                .unwrap();
        }

        let a = queue.clone();
        let b = queue.clone();
        let (ra, rb) = tokio::join!(
            async move {
                let mut ids = vec![];
                while let Some(t) = a.take().await.unwrap() {
                    ids.push(t.id);
                    if ids.len() == 2 {
                        break;
                    }
                }
                ids
            },
            async move {
                let mut ids = vec![];
                while let Some(t) = b.take().await.unwrap() {
                    ids.push(t.id);
                    if ids.len() == 2 {
                        break;
                    }
                }
                ids
            }
        );

        let mut all = ra;
        all.extend(rb);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
        assert_eq!(queue.in_flight_count().await.unwrap(), 4);
    }
}
