use anyhow::{anyhow, Context};
use async_trait::async_trait;
use guestbook_api::{CommentId, CommentStore, NewComment, RawComment, Session, UserId, Uuid};
use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

const ADMINS_TABLE: &str = "admins";

/// A guestbook table behind a PostgREST endpoint, with the auth service of
/// the same deployment (the Supabase layout)
pub struct RestStore {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    token: Option<String>,
    table: String,
}

#[derive(serde::Deserialize)]
struct AuthUser {
    id: Uuid,
}

impl RestStore {
    pub fn new(url: &str, anon_key: String, token: Option<String>, table: String) -> RestStore {
        RestStore {
            client: reqwest::Client::new(),
            url: String::from(url.trim_end_matches('/')),
            anon_key,
            token,
            table,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.token.as_deref().unwrap_or(&self.anon_key))
    }

    fn table(&self, method: Method) -> RequestBuilder {
        self.request(method, &format!("rest/v1/{}", self.table))
    }

    async fn rows(req: RequestBuilder, what: &str) -> anyhow::Result<Vec<Value>> {
        req.header("Prefer", "return=representation")
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("sending request to {what}"))?
            .error_for_status()
            .with_context(|| format!("server refused to {what}"))?
            .json()
            .await
            .with_context(|| format!("parsing response to {what}"))
    }
}

/// Rows that do not even have the shape of a comment are dropped here,
/// everything else is left to the client's normalization
fn parse_rows(rows: Vec<Value>) -> Vec<RawComment> {
    rows.into_iter()
        .filter_map(|v| match serde_json::from_value::<RawComment>(v) {
            Ok(r) => Some(r),
            Err(err) => {
                tracing::warn!(?err, "ignoring malformed guestbook row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl CommentStore for RestStore {
    async fn fetch_comments(&self) -> anyhow::Result<Vec<RawComment>> {
        let req = self
            .table(Method::GET)
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let rows = RestStore::rows(req, "fetch comments").await?;
        Ok(parse_rows(rows))
    }

    async fn create_comment(&self, c: &NewComment) -> anyhow::Result<RawComment> {
        let req = self.table(Method::POST).json(&[c]);
        let rows = RestStore::rows(req, "create comment").await?;
        parse_rows(rows)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("server did not return the created comment"))
    }

    async fn update_like_count(&self, id: &CommentId, likes: u64) -> anyhow::Result<()> {
        let req = self
            .table(Method::PATCH)
            .query(&[("id", format!("eq.{id}"))])
            .json(&json!({ "likes": likes }));
        let rows = RestStore::rows(req, "update likes").await?;
        if rows.is_empty() {
            return Err(anyhow!("no comment with id {id}"));
        }
        Ok(())
    }

    async fn delete_comment(&self, id: &CommentId) -> anyhow::Result<()> {
        let req = self
            .table(Method::DELETE)
            .query(&[("id", format!("eq.{id}"))]);
        let rows = RestStore::rows(req, "delete comment").await?;
        // row level security silently filters out what we may not delete
        if rows.is_empty() {
            return Err(anyhow!(
                "deleting comment {id} removed nothing, it does not exist or the session is not an admin"
            ));
        }
        Ok(())
    }

    async fn get_session(&self) -> anyhow::Result<Session> {
        if self.token.is_none() {
            return Ok(Session::anonymous());
        }
        let resp = self
            .request(Method::GET, "auth/v1/user")
            .send()
            .await
            .context("sending request to fetch session")?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("auth token was refused, continuing signed out");
            return Ok(Session::anonymous());
        }
        let user: AuthUser = resp
            .error_for_status()
            .context("server refused to fetch session")?
            .json()
            .await
            .context("parsing session")?;
        let req = self
            .request(Method::GET, &format!("rest/v1/{ADMINS_TABLE}"))
            .query(&[("select", String::from("id")), ("id", format!("eq.{}", user.id))]);
        let admins = RestStore::rows(req, "look up admin role").await?;
        let id = UserId(user.id);
        Ok(match admins.is_empty() {
            true => Session::user(id),
            false => Session::admin(id),
        })
    }
}
