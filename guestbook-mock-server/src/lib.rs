use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use guestbook_api::{self as api, CommentId, CommentStore, NewComment, RawComment, Session, Time};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

/// Remote operations, for failure injection and call counting
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    Fetch,
    Create,
    UpdateLikes,
    Delete,
    Session,
}

/// In-memory stand-in for the guestbook backend.
///
/// Behaves like the real table: ids and dates are assigned on insert,
/// inserting under a missing parent is refused, deleting cascades to every
/// reply, and deleting requires an admin session.
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<State>,
    gates: Mutex<HashMap<Op, Arc<Semaphore>>>,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<RawComment>,
    session: Session,
    clock: Option<Time>,
    failing: HashSet<Op>,
    calls: HashMap<Op, usize>,
}

impl State {
    fn position(&self, id: &CommentId) -> Option<usize> {
        self.rows.iter().position(|r| r.id().as_ref() == Some(id))
    }

    fn next_id(&self) -> u64 {
        self.rows
            .iter()
            .filter_map(|r| r.id().and_then(|id| id.as_number()))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn now(&mut self) -> Time {
        match &mut self.clock {
            Some(t) => {
                let now = *t;
                *t = now + Duration::seconds(1);
                now
            }
            None => Utc::now(),
        }
    }
}

impl MockStore {
    pub fn new() -> MockStore {
        MockStore::default()
    }

    pub fn with_rows(rows: Vec<RawComment>) -> MockStore {
        let res = MockStore::new();
        res.state.lock().rows = rows;
        res
    }

    /// Adds a row as is, bypassing every check
    pub fn insert(&self, row: RawComment) {
        self.state.lock().rows.push(row);
    }

    pub fn rows(&self) -> Vec<RawComment> {
        self.state.lock().rows.clone()
    }

    pub fn set_session(&self, session: Session) {
        self.state.lock().session = session;
    }

    /// Use a deterministic clock for created dates, that ticks one second
    /// per created comment
    pub fn set_clock(&self, start: Time) {
        self.state.lock().clock = Some(start);
    }

    /// Make every following call to `op` fail, or stop doing so
    pub fn fail(&self, op: Op, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Number of calls to `op` so far, including failed and paused ones
    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Hold every following call to `op` until released
    pub fn pause(&self, op: Op) {
        self.gates
            .lock()
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls to `op` proceed
    pub fn release(&self, op: Op, n: usize) {
        if let Some(gate) = self.gates.lock().get(&op) {
            gate.add_permits(n);
        }
    }

    /// Stop holding calls to `op`. Calls already held stay held until
    /// released.
    pub fn resume(&self, op: Op) {
        self.gates.lock().remove(&op);
    }

    async fn enter(&self, op: Op) -> anyhow::Result<()> {
        *self.state.lock().calls.entry(op).or_insert(0) += 1;
        let gate = self.gates.lock().get(&op).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .context("mock store gate closed")?
                .forget();
        }
        if self.state.lock().failing.contains(&op) {
            return Err(anyhow!("injected failure for {op:?}"));
        }
        Ok(())
    }
}

#[async_trait]
impl CommentStore for MockStore {
    async fn fetch_comments(&self) -> anyhow::Result<Vec<RawComment>> {
        self.enter(Op::Fetch).await?;
        let mut rows = self.rows();
        rows.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(rows)
    }

    async fn create_comment(&self, c: &NewComment) -> anyhow::Result<RawComment> {
        self.enter(Op::Create).await?;
        let mut state = self.state.lock();
        if let Some(parent) = &c.parent_id {
            if state.position(parent).is_none() {
                return Err(anyhow!(
                    "insert violates foreign key constraint: parent {parent} does not exist"
                ));
            }
        }
        let id = state.next_id();
        let now = state.now();
        let row = RawComment {
            id: Some(Value::from(id)),
            parent_id: Some(match &c.parent_id {
                Some(p) => serde_json::to_value(p)?,
                None => Value::Null,
            }),
            author: Some(c.author.clone()),
            email: c.email.clone(),
            content: Some(c.content.clone()),
            created_at: Some(Value::from(now.to_rfc3339())),
            likes: Some(Value::from(0)),
            device: Some(c.device.clone()),
            is_admin: Some(c.is_admin),
            ..RawComment::default()
        };
        state.rows.push(row.clone());
        tracing::debug!(id, "mock store created comment");
        Ok(row)
    }

    async fn update_like_count(&self, id: &CommentId, likes: u64) -> anyhow::Result<()> {
        self.enter(Op::UpdateLikes).await?;
        let mut state = self.state.lock();
        let pos = state
            .position(id)
            .with_context(|| format!("no comment with id {id}"))?;
        state.rows[pos].likes = Some(Value::from(likes));
        Ok(())
    }

    async fn delete_comment(&self, id: &CommentId) -> anyhow::Result<()> {
        self.enter(Op::Delete).await?;
        let mut state = self.state.lock();
        if !state.session.is_admin() {
            return Err(api::Error::PermissionDenied.into());
        }
        state
            .position(id)
            .with_context(|| format!("no comment with id {id}"))?;
        let mut doomed = HashSet::from([id.clone()]);
        loop {
            let before = doomed.len();
            for r in &state.rows {
                if let (Some(rid), Some(parent)) = (r.id(), r.parent_id()) {
                    if doomed.contains(&parent) {
                        doomed.insert(rid);
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        state
            .rows
            .retain(|r| !r.id().map(|rid| doomed.contains(&rid)).unwrap_or(false));
        tracing::debug!(%id, removed = doomed.len(), "mock store deleted comment");
        Ok(())
    }

    async fn get_session(&self) -> anyhow::Result<Session> {
        self.enter(Op::Session).await?;
        Ok(self.state.lock().session.clone())
    }
}
