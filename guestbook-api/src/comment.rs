use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{Limits, Time, ValidationError};

/// Identifier of a guestbook comment.
///
/// The backing store hands out ids as JSON numbers or strings depending on
/// the endpoint. Both are folded into a single canonical text form, so that
/// `12`, `"12"` and `" 012 "` all compare equal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CommentId(String);

impl CommentId {
    pub fn new(id: &str) -> Option<CommentId> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        if id.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = id.parse::<u64>() {
                return Some(CommentId(n.to_string()));
            }
        }
        Some(CommentId(String::from(id)))
    }

    /// Reads an id out of an untyped JSON value. `null`, empty strings,
    /// fractional numbers, booleans and containers are not ids.
    pub fn from_json(v: &Value) -> Option<CommentId> {
        match v {
            Value::String(s) => CommentId::new(s),
            Value::Number(n) => {
                if let Some(n) = n.as_u64() {
                    Some(CommentId(n.to_string()))
                } else if let Some(n) = n.as_i64() {
                    Some(CommentId(n.to_string()))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| CommentId(format!("{f:.0}")))
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_number(&self) -> Option<u64> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }
}

impl From<u64> for CommentId {
    fn from(n: u64) -> CommentId {
        CommentId(n.to_string())
    }
}

impl FromStr for CommentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<CommentId> {
        CommentId::new(s).ok_or_else(|| anyhow::anyhow!("empty comment id"))
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Numeric ids sort numerically and before any textual id
impl Ord for CommentId {
    fn cmp(&self, other: &CommentId) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for CommentId {
    fn partial_cmp(&self, other: &CommentId) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for CommentId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(n) => s.serialize_u64(n),
            None => s.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for CommentId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<CommentId, D::Error> {
        let v = Value::deserialize(d)?;
        CommentId::from_json(&v).ok_or_else(|| de::Error::custom(format!("invalid comment id {v}")))
    }
}

/// A guestbook row as the remote store returns it.
///
/// Field names drifted over the lifetime of the site (`created_at` vs
/// `createdAt` vs `timestamp`, ...), and numbers sometimes come back as
/// strings. Nothing here is trusted: use the accessors, which resolve the
/// aliases, and let the client decide what to do with unusable rows.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RawComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Value>,
    #[serde(default, rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id_camel: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at_camel: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, rename = "isAdmin", skip_serializing_if = "Option::is_none")]
    pub is_admin_camel: Option<bool>,
}

impl RawComment {
    pub fn id(&self) -> Option<CommentId> {
        self.id.as_ref().and_then(CommentId::from_json)
    }

    pub fn parent_id(&self) -> Option<CommentId> {
        self.parent_id
            .as_ref()
            .or(self.parent_id_camel.as_ref())
            .and_then(CommentId::from_json)
    }

    pub fn created_at(&self) -> Option<Time> {
        [&self.created_at, &self.created_at_camel, &self.timestamp]
            .into_iter()
            .flatten()
            .find_map(parse_time)
    }

    /// Missing, negative or unparseable counters read as zero
    pub fn likes(&self) -> u64 {
        match &self.likes {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin.or(self.is_admin_camel).unwrap_or(false)
    }
}

fn parse_time(v: &Value) -> Option<Time> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.with_timezone(&Utc));
            }
            // postgres' default text rendering of timestamptz
            if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
                return Some(t.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .into_iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|t| Utc.from_utc_datetime(&t))
        }
        _ => None,
    }
}

/// Payload sent to the remote store to create a comment or a reply
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct NewComment {
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub content: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    /// Trims the user-typed fields; an empty email counts as no email
    pub fn new(author: &str, content: &str) -> NewComment {
        NewComment {
            author: String::from(author.trim()),
            email: None,
            content: String::from(content.trim()),
            device: String::new(),
            is_admin: false,
            parent_id: None,
        }
    }

    pub fn with_email(mut self, email: &str) -> NewComment {
        let email = email.trim();
        self.email = (!email.is_empty()).then(|| String::from(email));
        self
    }

    pub fn replying_to(mut self, parent: CommentId) -> NewComment {
        self.parent_id = Some(parent);
        self
    }

    pub fn validate(&self, limits: &Limits) -> Result<(), ValidationError> {
        crate::validate_string(&self.author)?;
        crate::validate_string(&self.content)?;
        crate::validate_string(&self.device)?;
        if self.author.is_empty() {
            return Err(ValidationError::EmptyAuthor);
        }
        if self.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let len = self.author.chars().count();
        if len > limits.max_author_len {
            return Err(ValidationError::AuthorTooLong {
                len,
                max: limits.max_author_len,
            });
        }
        let len = self.content.chars().count();
        if len > limits.max_content_len {
            return Err(ValidationError::ContentTooLong {
                len,
                max: limits.max_content_len,
            });
        }
        if let Some(email) = &self.email {
            crate::validate_string(email)?;
            crate::validate_email(email)?;
        }
        Ok(())
    }
}
