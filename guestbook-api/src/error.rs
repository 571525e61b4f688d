use crate::CommentId;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid comment: {0}")]
    Validation(#[from] ValidationError),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Failed to load comments: {0}")]
    Fetch(String),

    #[error("The same action is already being submitted")]
    Busy,

    #[error("Unknown comment {0}")]
    UnknownComment(CommentId),
}

impl Error {
    pub fn remote(err: anyhow::Error) -> Error {
        Error::Remote(format!("{err:#}"))
    }

    pub fn fetch(err: anyhow::Error) -> Error {
        Error::Fetch(format!("{err:#}"))
    }

    /// Stable, machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::PermissionDenied => "permission-denied",
            Error::Remote(_) => "remote",
            Error::Fetch(_) => "fetch",
            Error::Busy => "busy",
            Error::UnknownComment(_) => "unknown-comment",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("author name is required")]
    EmptyAuthor,

    #[error("comment text is required")]
    EmptyContent,

    #[error("author name is {len} characters long, at most {max} are allowed")]
    AuthorTooLong { len: usize, max: usize },

    #[error("comment is {len} characters long, at most {max} are allowed")]
    ContentTooLong { len: usize, max: usize },

    #[error("malformed email address {0:?}")]
    InvalidEmail(String),

    #[error("null byte in string is not allowed {0:?}")]
    NullByte(String),

    #[error("replies to {parent} would nest deeper than {max_depth} levels")]
    MaxDepthExceeded { parent: CommentId, max_depth: usize },
}
