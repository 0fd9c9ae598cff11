use crate::ledger::LedgerError;
use crate::proto::{DeadLetterTask, TaskClaim, TranscodeTask};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use prost::Message;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Task not found: seq={0}")]
    TaskNotFound(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// FjallQueue persists transcode tasks with delayed visibility and a DLQ
///
/// Architecture:
/// - `tasks` partition: u64 (big-endian) → TranscodeTask (protobuf)
/// - `ready` partition: due_ms ++ seq (both big-endian) → empty
/// - `claims` partition: u64 → TaskClaim (protobuf)
/// - `metadata` partition: "next_seq" → u64
/// - `dlq` partition: u64 → DeadLetterTask (protobuf)
///
/// A task is in exactly one of `ready` or `claims` until it is acked or
/// dead-lettered. Ordering the ready index by due time first gives FIFO for
/// fresh tasks and lets retries sit invisible until their backoff elapses.
///
/// Mutations are not synchronized here; callers hold the broker's write lock.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    ready: PartitionHandle,
    claims: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let ready = keyspace.open_partition("ready", PartitionCreateOptions::default())?;
        let claims = keyspace.open_partition("claims", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| decode_u64(&bytes))
            .unwrap_or(0);

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            ready,
            claims,
            metadata,
            dlq,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Enqueue a task visible immediately
    pub fn enqueue(&self, task: &TranscodeTask) -> Result<u64> {
        self.enqueue_at(task, now_ms())
    }

    /// Enqueue a task that becomes claimable at `due_ms`.
    ///
    /// Task, ready entry and counter are written in one batch.
    pub fn enqueue_at(&self, task: &TranscodeTask, due_ms: u64) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, seq.to_be_bytes().to_vec(), task.encode_to_vec());
        batch.insert(&self.ready, ready_key(due_ms, seq), Vec::<u8>::new());
        batch.insert(
            &self.metadata,
            b"next_seq".to_vec(),
            (seq + 1).to_be_bytes().to_vec(),
        );
        batch.commit()?;

        debug!(seq, job_id = %task.job_id, due_ms, "Task enqueued");
        Ok(seq)
    }

    /// Claim the oldest task whose due time has passed.
    ///
    /// The ready entry is swapped for a claim in one batch, so a claimed task
    /// is invisible to every other claimer.
    pub fn claim_next(&self, worker_id: &str, now_ms: u64) -> Result<Option<(u64, TranscodeTask)>> {
        for item in self.ready.iter() {
            let (key, _) = item?;
            let Some((due_ms, seq)) = decode_ready_key(&key) else {
                continue;
            };
            if due_ms > now_ms {
                return Ok(None);
            }

            let Some(task) = self.get_task(seq)? else {
                // ready entry outlived its task
                self.ready.remove(key.to_vec())?;
                continue;
            };

            let claim = TaskClaim {
                worker_id: worker_id.to_string(),
                claimed_at_ms: now_ms,
            };
            let mut batch = self.keyspace.batch();
            batch.remove(&self.ready, key.to_vec());
            batch.insert(&self.claims, seq.to_be_bytes().to_vec(), claim.encode_to_vec());
            batch.commit()?;

            debug!(seq, worker_id, job_id = %task.job_id, "Task claimed");
            return Ok(Some((seq, task)));
        }

        Ok(None)
    }

    /// Drop a finished task
    pub fn ack(&self, seq: u64) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.remove(&self.tasks, seq.to_be_bytes().to_vec());
        batch.remove(&self.claims, seq.to_be_bytes().to_vec());
        batch.commit()?;
        debug!(seq, "Task acked");
        Ok(())
    }

    /// Store the updated task and make it claimable again at `due_ms`
    pub fn retry_later(&self, seq: u64, task: &TranscodeTask, due_ms: u64) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, seq.to_be_bytes().to_vec(), task.encode_to_vec());
        batch.remove(&self.claims, seq.to_be_bytes().to_vec());
        batch.insert(&self.ready, ready_key(due_ms, seq), Vec::<u8>::new());
        batch.commit()?;
        debug!(seq, due_ms, attempt = task.attempt, "Task scheduled for retry");
        Ok(())
    }

    /// Return a claimed task to the ready index immediately
    pub fn release(&self, seq: u64) -> Result<()> {
        if self.get_task(seq)?.is_none() {
            return Err(QueueError::TaskNotFound(seq));
        }
        let mut batch = self.keyspace.batch();
        batch.remove(&self.claims, seq.to_be_bytes().to_vec());
        batch.insert(&self.ready, ready_key(now_ms(), seq), Vec::<u8>::new());
        batch.commit()?;
        debug!(seq, "Task released");
        Ok(())
    }

    /// Release a task only if it is currently claimed. Returns whether it was.
    pub fn reclaim(&self, seq: u64) -> Result<bool> {
        if self.get_claim(seq)?.is_none() {
            return Ok(false);
        }
        self.release(seq)?;
        Ok(true)
    }

    /// Return every claimed task to the ready index.
    ///
    /// The keyspace is held by one process at a time, so at startup any claim
    /// left behind belongs to a worker that is gone.
    pub fn release_all_claims(&self) -> Result<Vec<u64>> {
        let mut seqs = Vec::new();
        for item in self.claims.iter() {
            let (key, _) = item?;
            seqs.push(decode_u64(&key));
        }
        for seq in &seqs {
            self.release(*seq)?;
        }
        if !seqs.is_empty() {
            info!(count = seqs.len(), "Released orphaned claims");
        }
        Ok(seqs)
    }

    /// Move a task to the Dead Letter Queue (DLQ)
    ///
    /// Called when a task exhausts all retries or encounters a permanent failure.
    pub fn move_to_dlq(
        &self,
        seq: u64,
        failure_code: String,
        failure_message: String,
        attempts: u32,
    ) -> Result<()> {
        let task = self.get_task(seq)?.ok_or(QueueError::TaskNotFound(seq))?;

        let dlq_entry = DeadLetterTask {
            task: Some(task),
            failure_code,
            failure_message,
            attempts,
            failed_at_ms: now_ms(),
        };

        let key = seq.to_be_bytes().to_vec();
        let mut batch = self.keyspace.batch();
        batch.insert(&self.dlq, key.clone(), dlq_entry.encode_to_vec());
        batch.remove(&self.tasks, key.clone());
        batch.remove(&self.claims, key);
        batch.commit()?;

        info!(seq, attempts, "Task moved to DLQ");
        Ok(())
    }

    pub fn get_task(&self, seq: u64) -> Result<Option<TranscodeTask>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(TranscodeTask::decode(&*bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_claim(&self, seq: u64) -> Result<Option<TaskClaim>> {
        match self.claims.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(TaskClaim::decode(&*bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_dlq_task(&self, seq: u64) -> Result<Option<DeadLetterTask>> {
        match self.dlq.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(DeadLetterTask::decode(&*bytes)?)),
            None => Ok(None),
        }
    }

    /// List DLQ tasks (for debugging/inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        let mut results = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            results.push((decode_u64(&key), DeadLetterTask::decode(&*value)?));
        }
        Ok(results)
    }

    /// Tasks waiting in the ready index, due or not
    pub fn ready_len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.ready.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn claimed_len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.claims.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn ready_key(due_ms: u64, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&due_ms.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn decode_ready_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != 16 {
        return None;
    }
    let (due, seq) = key.split_at(8);
    Some((decode_u64(due), decode_u64(seq)))
}

fn decode_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap_or([0u8; 8]))
}

/// Get current Unix timestamp in milliseconds
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_task(job_id: &str) -> TranscodeTask {
        TranscodeTask {
            job_id: job_id.to_string(),
            video_id: format!("video-{job_id}"),
            source_locator: format!("video-{job_id}"),
            category_partition: None,
            attempt: 0,
        }
    }

    #[test]
    fn test_enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("job1")).unwrap();
        assert_eq!(seq, 0);

        let retrieved = queue.get_task(seq).unwrap().unwrap();
        assert_eq!(retrieved.job_id, "job1");
        assert_eq!(queue.ready_len().unwrap(), 1);
    }

    #[test]
    fn test_claims_in_fifo_order_and_hides_claimed() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        queue.enqueue_at(&create_test_task("job1"), 100).unwrap();
        queue.enqueue_at(&create_test_task("job2"), 100).unwrap();

        let (seq1, task1) = queue.claim_next("w1", 1_000).unwrap().unwrap();
        let (seq2, task2) = queue.claim_next("w2", 1_000).unwrap().unwrap();
        assert_eq!((seq1, task1.job_id.as_str()), (0, "job1"));
        assert_eq!((seq2, task2.job_id.as_str()), (1, "job2"));
        assert!(queue.claim_next("w3", 1_000).unwrap().is_none());

        assert_eq!(queue.get_claim(seq1).unwrap().unwrap().worker_id, "w1");
        assert_eq!(queue.claimed_len().unwrap(), 2);
    }

    #[test]
    fn test_delayed_task_invisible_until_due() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        queue.enqueue_at(&create_test_task("later"), 5_000).unwrap();
        assert!(queue.claim_next("w1", 4_999).unwrap().is_none());
        assert!(queue.claim_next("w1", 5_000).unwrap().is_some());
    }

    #[test]
    fn test_retry_later_updates_task() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        queue.enqueue_at(&create_test_task("job1"), 0).unwrap();
        let (seq, mut task) = queue.claim_next("w1", 10).unwrap().unwrap();

        task.attempt = 1;
        queue.retry_later(seq, &task, 500).unwrap();
        assert!(queue.get_claim(seq).unwrap().is_none());
        assert!(queue.claim_next("w1", 499).unwrap().is_none());

        let (again, retried) = queue.claim_next("w1", 500).unwrap().unwrap();
        assert_eq!(again, seq);
        assert_eq!(retried.attempt, 1);
    }

    #[test]
    fn test_release_all_claims() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        queue.enqueue_at(&create_test_task("job1"), 0).unwrap();
        queue.enqueue_at(&create_test_task("job2"), 0).unwrap();
        queue.claim_next("w1", 10).unwrap().unwrap();
        queue.claim_next("w1", 10).unwrap().unwrap();

        assert_eq!(queue.release_all_claims().unwrap(), vec![0, 1]);
        assert_eq!(queue.claimed_len().unwrap(), 0);
        assert_eq!(queue.ready_len().unwrap(), 2);
        assert!(queue.release_all_claims().unwrap().is_empty());
    }

    #[test]
    fn test_ack_and_reclaim() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue_at(&create_test_task("job1"), 0).unwrap();
        assert!(!queue.reclaim(seq).unwrap());

        queue.claim_next("w1", 10).unwrap().unwrap();
        assert!(queue.reclaim(seq).unwrap());
        assert_eq!(queue.ready_len().unwrap(), 1);

        queue.claim_next("w1", now_ms()).unwrap().unwrap();
        queue.ack(seq).unwrap();
        assert!(queue.get_task(seq).unwrap().is_none());
        assert_eq!(queue.claimed_len().unwrap(), 0);
        assert!(matches!(queue.release(seq), Err(QueueError::TaskNotFound(_))));
    }

    #[test]
    fn test_move_to_dlq() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("failed_job")).unwrap();
        queue
            .move_to_dlq(seq, "NOT_FOUND".to_string(), "no source".to_string(), 1)
            .unwrap();

        let dlq_task = queue.get_dlq_task(seq).unwrap().unwrap();
        assert_eq!(dlq_task.failure_code, "NOT_FOUND");
        assert_eq!(dlq_task.attempts, 1);
        assert_eq!(dlq_task.task.unwrap().job_id, "failed_job");
        assert!(queue.get_task(seq).unwrap().is_none());
        assert_eq!(queue.list_dlq(10).unwrap().len(), 1);
    }
}
