use crate::api::Limits;

/// What to do with a reply whose parent already sits at the maximum depth
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthPolicy {
    /// Accept it; the tree builder shows it as a new root thread
    #[default]
    Flatten,
    /// Refuse it before contacting the store
    Reject,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Deepest nesting level shown, roots being at depth 0
    pub max_depth: usize,
    pub max_author_len: usize,
    pub max_content_len: usize,
    pub depth_policy: DepthPolicy,
    /// Number of root threads per page
    pub comments_per_page: usize,
    /// How long a local snapshot may be shown before the first remote load
    pub cache_ttl_secs: i64,
}

impl Default for Config {
    fn default() -> Config {
        let limits = Limits::default();
        Config {
            max_depth: 5,
            max_author_len: limits.max_author_len,
            max_content_len: limits.max_content_len,
            depth_policy: DepthPolicy::Flatten,
            comments_per_page: 10,
            cache_ttl_secs: 5 * 60,
        }
    }
}

impl Config {
    pub fn limits(&self) -> Limits {
        Limits {
            max_author_len: self.max_author_len,
            max_content_len: self.max_content_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let c: Config =
            serde_json::from_str(r#"{ "max_depth": 2, "depth_policy": "reject" }"#).unwrap();
        assert_eq!(c.max_depth, 2);
        assert_eq!(c.depth_policy, DepthPolicy::Reject);
        assert_eq!(c.max_content_len, 500);
        assert_eq!(c.comments_per_page, 10);
    }
}
