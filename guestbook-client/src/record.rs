use anyhow::anyhow;

use crate::api::{self, CommentId, Time};

/// A comment as held in the flat list. Only `likes` ever changes after creation.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub author: String,
    pub content: String,
    pub created_at: Time,
    pub likes: u64,
    pub device: String,
    pub is_admin: bool,
}

impl TryFrom<api::RawComment> for CommentRecord {
    type Error = anyhow::Error;

    fn try_from(raw: api::RawComment) -> anyhow::Result<CommentRecord> {
        let id = raw
            .id()
            .ok_or_else(|| anyhow!("comment has no usable id: {:?}", raw.id))?;
        let created_at = raw.created_at().ok_or_else(|| {
            anyhow!("comment {id} has no usable creation date")
        })?;
        let parent_id = raw.parent_id();
        let likes = raw.likes();
        let is_admin = raw.is_admin();
        Ok(CommentRecord {
            id,
            parent_id,
            author: raw.author.unwrap_or_default(),
            content: raw.content.unwrap_or_default(),
            created_at,
            likes,
            device: raw.device.unwrap_or_default(),
            is_admin,
        })
    }
}
