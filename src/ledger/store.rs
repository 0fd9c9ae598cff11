use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::error::Result;
use super::models::{JobEvent, JobRecord, JobStatus};
use super::partitions::{
    decode_log_key, encode_job_key, encode_log_key, encode_log_prefix, encode_video_key,
};

/// Fjall-backed persistent storage for job records and their event history
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    videos: PartitionHandle,
    logs: PartitionHandle,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let videos = keyspace.open_partition("videos", PartitionCreateOptions::default())?;
        let logs = keyspace.open_partition("logs", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            videos,
            logs,
        })
    }

    /// Store or update a job record and point its video at it.
    ///
    /// Both writes land in one batch so readers never see a video pointing
    /// at a job that does not exist yet.
    pub fn upsert(&self, record: &JobRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, encode_job_key(&record.job_id), value);
        batch.insert(
            &self.videos,
            encode_video_key(&record.video_id),
            record.job_id.as_bytes().to_vec(),
        );
        batch.commit()?;
        debug!(job_id = %record.job_id, status = %record.status, "Upserted job");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Latest job submitted for a video
    pub fn get_by_video(&self, video_id: &str) -> Result<Option<JobRecord>> {
        match self.videos.get(encode_video_key(video_id))? {
            Some(job_id) => {
                let job_id = String::from_utf8_lossy(&job_id).to_string();
                self.get(&job_id)
            }
            None => Ok(None),
        }
    }

    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let record: JobRecord = serde_json::from_slice(&value)?;
            if record.status == status {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Append an event to a job's history, returning its offset
    pub fn append_event(&self, job_id: &str, event: &JobEvent) -> Result<u64> {
        let next = match self.logs.prefix(encode_log_prefix(job_id)).next_back() {
            Some(item) => {
                let (key, _) = item?;
                decode_log_key(&key).map(|(_, offset)| offset + 1).unwrap_or(0)
            }
            None => 0,
        };
        self.logs
            .insert(encode_log_key(job_id, next), serde_json::to_vec(event)?)?;
        Ok(next)
    }

    /// Event history of a job, oldest first
    pub fn events(&self, job_id: &str) -> Result<Vec<JobEvent>> {
        let mut events = Vec::new();
        for item in self.logs.prefix(encode_log_prefix(job_id)) {
            let (_, value) = item?;
            events.push(serde_json::from_slice(&value)?);
        }
        Ok(events)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let record: JobRecord = serde_json::from_slice(&value)?;
            stats.job_count += 1;
            match record.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        for item in self.logs.iter() {
            item?;
            stats.log_count += 1;
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub job_count: usize,
    pub log_count: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("ledger")).unwrap();
        (store, temp_dir)
    }

    fn record(job_id: &str, video_id: &str) -> JobRecord {
        JobRecord::pending(
            job_id.to_string(),
            video_id.to_string(),
            video_id.to_string(),
            None,
            0,
            3,
        )
    }

    fn event(message: &str) -> JobEvent {
        JobEvent {
            status: JobStatus::Running,
            progress: 10,
            attempt: 1,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_get_job() {
        let (store, _temp) = create_test_store();
        store.upsert(&record("job_123", "v1")).unwrap();

        let retrieved = store.get("job_123").unwrap().unwrap();
        assert_eq!(retrieved.video_id, "v1");
        assert_eq!(retrieved.status, JobStatus::Pending);
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_video_index_follows_latest_job() {
        let (store, _temp) = create_test_store();
        store.upsert(&record("job_1", "v1")).unwrap();
        store.upsert(&record("job_2", "v1")).unwrap();

        let latest = store.get_by_video("v1").unwrap().unwrap();
        assert_eq!(latest.job_id, "job_2");
        assert!(store.get_by_video("v2").unwrap().is_none());
    }

    #[test]
    fn test_events_are_ordered() {
        let (store, _temp) = create_test_store();
        for i in 0..12 {
            let offset = store.append_event("job_1", &event(&format!("e{i}"))).unwrap();
            assert_eq!(offset, i);
        }
        store.append_event("job_10", &event("other")).unwrap();

        let events = store.events("job_1").unwrap();
        assert_eq!(events.len(), 12);
        assert_eq!(events[0].message, "e0");
        assert_eq!(events[11].message, "e11");
    }

    #[test]
    fn test_list_by_status_and_stats() {
        let (store, _temp) = create_test_store();
        store.upsert(&record("job_1", "v1")).unwrap();
        let mut running = record("job_2", "v2");
        running.status = JobStatus::Running;
        store.upsert(&running).unwrap();

        let pending = store.list_by_status(JobStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, "job_1");

        let stats = store.stats().unwrap();
        assert_eq!(stats.job_count, 2);
        assert_eq!(stats.running, 1);
        store.persist().unwrap();
    }
}
