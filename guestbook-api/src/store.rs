use async_trait::async_trait;

use crate::{CommentId, NewComment, RawComment, Session};

/// The remote data/auth service holding the authoritative guestbook.
///
/// Implementations report transport and store failures as plain errors;
/// classifying them is up to the caller.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn fetch_comments(&self) -> anyhow::Result<Vec<RawComment>>;

    /// Returns the row as stored, including the server-assigned id and date
    async fn create_comment(&self, c: &NewComment) -> anyhow::Result<RawComment>;

    async fn update_like_count(&self, id: &CommentId, likes: u64) -> anyhow::Result<()>;

    /// Removes the comment and, transitively, every reply to it
    async fn delete_comment(&self, id: &CommentId) -> anyhow::Result<()>;

    async fn get_session(&self) -> anyhow::Result<Session>;
}
