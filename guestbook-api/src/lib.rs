use chrono::Utc;
use regex::Regex;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod comment;
pub use comment::{CommentId, NewComment, RawComment};

mod device;
pub use device::device_from_user_agent;

mod error;
pub use error::{Error, ValidationError};

mod store;
pub use store::CommentStore;

mod user;
pub use user::{Role, Session, UserId};

/// Length limits applied to user-submitted comments
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    pub max_author_len: usize,
    pub max_content_len: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_author_len: 20,
            max_content_len: 500,
        }
    }
}

pub fn validate_string(s: &str) -> Result<(), ValidationError> {
    if s.contains('\0') {
        Err(ValidationError::NullByte(String::from(s)))
    } else {
        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex does not compile");
}

/// Permissive check: `local@domain.tld`, no whitespace, a single `@`
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if !EMAIL.is_match(email) {
        return Err(ValidationError::InvalidEmail(String::from(email)));
    }
    Ok(())
}
