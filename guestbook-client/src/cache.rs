use chrono::Duration;

use crate::{api::Time, CommentRecord};

/// Locally saved copy of the flat list.
///
/// Only ever used to show something before the first remote load
/// completes; the remote store stays authoritative.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub saved_at: Time,
    pub records: Vec<CommentRecord>,
}

impl Snapshot {
    pub fn is_fresh(&self, now: Time, ttl_secs: i64) -> bool {
        now - self.saved_at < Duration::seconds(ttl_secs) && self.saved_at <= now
    }
}
