/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> JobRecord (JSON)
/// - `videos`: video:{video_id} -> job_id of the latest job for that video
/// - `logs`: log:{job_id}:{offset:016} -> JobEvent (JSON)

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

/// Decode a job key: job:{job_id} -> job_id
pub fn decode_job_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("job:").map(String::from)
}

/// Encode a video index key: video:{video_id}
pub fn encode_video_key(video_id: &str) -> Vec<u8> {
    format!("video:{}", video_id).into_bytes()
}

/// Encode a log key: log:{job_id}:{offset:016}
pub fn encode_log_key(job_id: &str, offset: u64) -> Vec<u8> {
    format!("log:{}:{:016}", job_id, offset).into_bytes()
}

/// Encode a log prefix for range scan: log:{job_id}:
pub fn encode_log_prefix(job_id: &str) -> Vec<u8> {
    format!("log:{}:", job_id).into_bytes()
}

/// Decode a log key: log:{job_id}:{offset:016} -> (job_id, offset)
pub fn decode_log_key(key: &[u8]) -> Option<(String, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (job_id, offset) = key_str.strip_prefix("log:")?.rsplit_once(':')?;
    Some((job_id.to_string(), offset.parse().ok()?))
}
