/// Last-writer-wins decision for one question: the remote record is applied
/// when no local record exists or the local one is not strictly newer. Equal
/// timestamps favor the remote value — a local timestamp only ever moves on a
/// write, so equality means the remote record originated from that same edit
/// and re-applying it is idempotent.
///
/// Pure; callers re-read the local timestamp from the target namespace at
/// apply time so a fresher local edit always beats a slower in-flight fetch.
pub fn should_apply(local_timestamp: Option<i64>, remote_timestamp: i64) -> bool {
    match local_timestamp {
        None => true,
        Some(local) => local <= remote_timestamp,
    }
}
