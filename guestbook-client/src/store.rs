use crate::{
    api::{CommentStore, Error, RawComment},
    CommentRecord,
};

/// Fetches the whole guestbook and normalizes it into the flat list.
///
/// Rows that cannot be placed (no id or no date) are dropped with a warning.
/// Remote failures come back as `Error::Fetch`; falling back to a previous
/// list is up to the caller.
pub async fn load<S: CommentStore + ?Sized>(store: &S) -> Result<Vec<CommentRecord>, Error> {
    let raw = store.fetch_comments().await.map_err(Error::fetch)?;
    Ok(normalize_all(raw))
}

pub fn normalize_all(raw: Vec<RawComment>) -> Vec<CommentRecord> {
    let fetched = raw.len();
    let records = raw
        .into_iter()
        .filter_map(|r| match CommentRecord::try_from(r) {
            Ok(r) => Some(r),
            Err(err) => {
                tracing::warn!(?err, "skipping unusable comment row");
                None
            }
        })
        .collect::<Vec<_>>();
    tracing::debug!(fetched, kept = records.len(), "normalized comment rows");
    records
}
