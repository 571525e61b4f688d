use std::collections::HashSet;

use anyhow::anyhow;

use crate::{
    api::{CommentId, Error, NewComment, RawComment, Time, ValidationError},
    tree, CommentNode, CommentRecord, Config, DepthPolicy, Snapshot,
};

/// A mutation that was validated and is now waiting on the remote store.
/// While pending, the same action cannot be started again.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Pending {
    /// New comment, with the id of the comment it replies to
    Submit(Option<CommentId>),
    Like(CommentId),
    Delete(CommentId),
}

/// Handed out when a mutation starts submitting, consumed when its outcome
/// is applied
#[derive(Debug)]
#[must_use = "a ticket must be finished, or the action stays disabled"]
pub struct Ticket {
    pending: Pending,
    flattens: bool,
}

impl Ticket {
    pub fn pending(&self) -> &Pending {
        &self.pending
    }

    /// For replies: whether the parent is already at the maximum depth, so
    /// that the reply will show up as a new root thread
    pub fn flattens(&self) -> bool {
        self.flattens
    }
}

/// Where the current flat list comes from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    Remote { loaded_at: Time },
    Cache { saved_at: Time },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeletePreview {
    pub id: CommentId,
    pub author: String,
    /// Replies that go away together with the comment
    pub replies: usize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct Stats {
    pub total: usize,
    /// Created since midnight UTC
    pub today: usize,
    /// Carrying the admin badge
    pub admin: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDump {
    pub export_time: Time,
    pub total_comments: usize,
    pub comments: Vec<CommentRecord>,
}

/// The comment thread: the authoritative flat list, the tree derived from
/// it, and the set of mutations currently in flight.
///
/// Every operation here is synchronous. Talking to the remote store happens
/// between a `begin_*` and the matching `finish_*`, and several of those may
/// be outstanding at once; each `finish_*` applies to whatever the list
/// contains by then.
#[derive(Clone, Debug)]
pub struct Thread {
    config: Config,
    records: Vec<CommentRecord>,
    tree: Vec<CommentNode>,
    source: Option<Source>,
    last_error: Option<String>,
    in_flight: HashSet<Pending>,
}

impl Thread {
    pub fn new(config: Config) -> Thread {
        Thread {
            config,
            records: Vec::new(),
            tree: Vec::new(),
            source: None,
            last_error: None,
            in_flight: HashSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn records(&self) -> &[CommentRecord] {
        &self.records
    }

    pub fn tree(&self) -> &[CommentNode] {
        &self.tree
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        CommentNode::find_in(&self.tree, id)
    }

    pub fn source(&self) -> Option<Source> {
        self.source
    }

    /// Message of the last failed load, cleared by the next successful one
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn in_flight(&self) -> &HashSet<Pending> {
        &self.in_flight
    }

    fn rebuild(&mut self) {
        self.tree = tree::build(&self.records, self.config.max_depth);
    }

    fn start(&mut self, pending: Pending) -> Result<Ticket, Error> {
        if !self.in_flight.insert(pending.clone()) {
            return Err(Error::Busy);
        }
        Ok(Ticket {
            pending,
            flattens: false,
        })
    }

    fn release(&mut self, t: &Ticket) {
        self.in_flight.remove(&t.pending);
    }

    /// Applies the outcome of a load. On failure the current list is kept
    /// as is, whether it is a previous load, a cached copy, or nothing.
    pub fn apply_load(
        &mut self,
        res: Result<Vec<CommentRecord>, Error>,
        now: Time,
    ) -> Result<usize, Error> {
        match res {
            Ok(records) => {
                tracing::info!(comments = records.len(), "loaded comments");
                self.records = records;
                self.source = Some(Source::Remote { loaded_at: now });
                self.last_error = None;
                self.rebuild();
                Ok(self.records.len())
            }
            Err(err) => {
                tracing::warn!(%err, kept = self.records.len(), "failed loading comments, keeping current list");
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Shows a saved snapshot until the first remote load, if it is fresh
    /// enough. Returns whether it was used.
    pub fn seed_from_cache(&mut self, snapshot: Snapshot, now: Time) -> bool {
        if self.source.is_some() || !snapshot.is_fresh(now, self.config.cache_ttl_secs) {
            return false;
        }
        tracing::debug!(comments = snapshot.records.len(), "showing cached comments");
        self.records = snapshot.records;
        self.source = Some(Source::Cache {
            saved_at: snapshot.saved_at,
        });
        self.rebuild();
        true
    }

    pub fn snapshot(&self, now: Time) -> Snapshot {
        Snapshot {
            saved_at: now,
            records: self.records.clone(),
        }
    }

    pub fn begin_submit(&mut self, c: &NewComment) -> Result<Ticket, Error> {
        c.validate(&self.config.limits())?;
        let mut flattens = false;
        if let Some(parent_id) = &c.parent_id {
            let parent = self
                .find(parent_id)
                .ok_or_else(|| Error::UnknownComment(parent_id.clone()))?;
            if parent.depth >= self.config.max_depth {
                match self.config.depth_policy {
                    DepthPolicy::Reject => {
                        return Err(Error::Validation(ValidationError::MaxDepthExceeded {
                            parent: parent_id.clone(),
                            max_depth: self.config.max_depth,
                        }))
                    }
                    DepthPolicy::Flatten => {
                        tracing::warn!(
                            parent = %parent_id,
                            max_depth = self.config.max_depth,
                            "reply is past the maximum depth, it will show as a new thread"
                        );
                        flattens = true;
                    }
                }
            }
        }
        let mut t = self.start(Pending::Submit(c.parent_id.clone()))?;
        t.flattens = flattens;
        Ok(t)
    }

    /// Adds the record the store created. Nothing changes locally when the
    /// store failed.
    pub fn finish_submit(
        &mut self,
        t: Ticket,
        res: anyhow::Result<RawComment>,
    ) -> Result<CommentRecord, Error> {
        self.release(&t);
        let raw = res.map_err(Error::remote)?;
        let rec = CommentRecord::try_from(raw)
            .map_err(|e| Error::remote(e.context("store returned an unusable comment")))?;
        // a reload may have raced us and already brought it in
        match self.records.iter_mut().find(|r| r.id == rec.id) {
            Some(existing) => *existing = rec.clone(),
            None => self.records.push(rec.clone()),
        }
        self.rebuild();
        tracing::info!(id = %rec.id, parent = ?rec.parent_id, "comment created");
        Ok(rec)
    }

    /// Bumps the counter right away. The returned count is what should be
    /// persisted.
    pub fn like(&mut self, id: &CommentId) -> Result<(Ticket, u64), Error> {
        if !self.records.iter().any(|r| r.id == *id) {
            return Err(Error::UnknownComment(id.clone()));
        }
        let t = self.start(Pending::Like(id.clone()))?;
        let mut likes = 0;
        for r in self.records.iter_mut().filter(|r| r.id == *id) {
            r.likes += 1;
            likes = r.likes;
        }
        self.rebuild();
        Ok((t, likes))
    }

    /// The local counter is kept even when persisting it failed
    pub fn finish_like(&mut self, t: Ticket, res: anyhow::Result<()>) -> Result<(), Error> {
        self.release(&t);
        res.map_err(|e| {
            let err = Error::remote(e);
            if let Pending::Like(id) = &t.pending {
                tracing::warn!(%id, %err, "failed persisting like, keeping local count");
            }
            err
        })
    }

    pub fn delete_preview(&self, id: &CommentId) -> Result<DeletePreview, Error> {
        let node = self
            .find(id)
            .ok_or_else(|| Error::UnknownComment(id.clone()))?;
        Ok(DeletePreview {
            id: id.clone(),
            author: node.record.author.clone(),
            replies: tree::cascade(&self.records, node).len() - 1,
        })
    }

    /// `authorized` is the access gate's verdict, taken right before
    pub fn begin_delete(&mut self, id: &CommentId, authorized: bool) -> Result<Ticket, Error> {
        if !authorized {
            tracing::info!(%id, "refusing unauthorized delete");
            return Err(Error::PermissionDenied);
        }
        if self.find(id).is_none() {
            return Err(Error::UnknownComment(id.clone()));
        }
        self.start(Pending::Delete(id.clone()))
    }

    /// Once the store confirmed, removes the comment and all its replies.
    /// Returns the ids removed from the flat list.
    pub fn finish_delete(
        &mut self,
        t: Ticket,
        res: anyhow::Result<()>,
    ) -> Result<Vec<CommentId>, Error> {
        self.release(&t);
        res.map_err(Error::remote)?;
        let id = match &t.pending {
            Pending::Delete(id) => id,
            p => return Err(Error::remote(anyhow!("finish_delete called for {p:?}"))),
        };
        // computed on the tree as it is right now, before rebuilding
        let doomed = match self.find(id) {
            Some(node) => tree::cascade(&self.records, node),
            None => HashSet::from([id.clone()]),
        };
        let before = self.records.len();
        let mut removed = Vec::with_capacity(doomed.len());
        self.records.retain(|r| {
            let keep = !doomed.contains(&r.id);
            if !keep {
                removed.push(r.id.clone());
            }
            keep
        });
        self.rebuild();
        tracing::info!(%id, removed = before - self.records.len(), "comment deleted");
        Ok(removed)
    }

    pub fn stats(&self, now: Time) -> Stats {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        Stats {
            total: self.records.len(),
            today: self
                .records
                .iter()
                .filter(|r| midnight.map(|m| r.created_at >= m).unwrap_or(false))
                .count(),
            admin: self.records.iter().filter(|r| r.is_admin).count(),
        }
    }

    pub fn export(&self, now: Time) -> ExportDump {
        ExportDump {
            export_time: now,
            total_comments: self.records.len(),
            comments: self.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn t(secs: i64) -> Time {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn rec(id: u64, parent: Option<u64>, secs: i64) -> CommentRecord {
        CommentRecord {
            id: CommentId::from(id),
            parent_id: parent.map(CommentId::from),
            author: format!("author {id}"),
            content: format!("comment {id}"),
            created_at: t(secs),
            likes: 0,
            device: String::new(),
            is_admin: false,
        }
    }

    fn raw(id: u64, parent: Option<u64>, secs: i64) -> RawComment {
        serde_json::from_value(json!({
            "id": id,
            "parent_id": parent,
            "author": "someone",
            "content": "hello",
            "created_at": t(secs).to_rfc3339(),
        }))
        .unwrap()
    }

    fn loaded(config: Config, records: Vec<CommentRecord>) -> Thread {
        let mut th = Thread::new(config);
        th.apply_load(Ok(records), t(1000)).unwrap();
        th
    }

    fn ids(th: &Thread) -> Vec<u64> {
        let mut ids = th
            .records()
            .iter()
            .map(|r| r.id.as_number().unwrap())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn cascade_fixture() -> Thread {
        loaded(
            Config::default(),
            vec![
                rec(1, None, 1),
                rec(2, Some(1), 2),
                rec(3, Some(1), 3),
                rec(4, Some(3), 4),
                rec(5, None, 5),
            ],
        )
    }

    #[test]
    fn failed_load_keeps_last_good_list() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        let err = th
            .apply_load(Err(Error::Fetch(String::from("offline"))), t(2000))
            .unwrap_err();
        assert_eq!(err, Error::Fetch(String::from("offline")));
        assert_eq!(ids(&th), vec![1]);
        assert_eq!(th.tree().len(), 1);
        assert!(th.last_error().is_some());
        assert_eq!(th.source(), Some(Source::Remote { loaded_at: t(1000) }));
    }

    #[test]
    fn submit_appends_the_stored_record() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        let c = NewComment::new("ana", "reply").replying_to(CommentId::from(1));
        let ticket = th.begin_submit(&c).unwrap();
        assert!(!ticket.flattens());
        assert!(th.in_flight().contains(&Pending::Submit(Some(CommentId::from(1)))));
        let rec = th.finish_submit(ticket, Ok(raw(2, Some(1), 2))).unwrap();
        assert_eq!(rec.id, CommentId::from(2));
        assert!(th.in_flight().is_empty());
        assert_eq!(th.find(&CommentId::from(2)).unwrap().depth, 1);
    }

    #[test]
    fn failed_submit_changes_nothing() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        let ticket = th.begin_submit(&NewComment::new("ana", "hi")).unwrap();
        let err = th
            .finish_submit(ticket, Err(anyhow!("connection reset")))
            .unwrap_err();
        assert!(matches!(err, Error::Remote(msg) if msg.contains("connection reset")));
        assert_eq!(ids(&th), vec![1]);
        assert!(th.in_flight().is_empty());
    }

    #[test]
    fn duplicate_submission_is_refused() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        let c = NewComment::new("ana", "hi");
        let ticket = th.begin_submit(&c).unwrap();
        assert_eq!(th.begin_submit(&c).unwrap_err(), Error::Busy);
        // replying elsewhere is a different action
        let reply = th
            .begin_submit(&c.clone().replying_to(CommentId::from(1)))
            .unwrap();
        th.finish_submit(ticket, Err(anyhow!("nope"))).unwrap_err();
        th.finish_submit(reply, Err(anyhow!("nope"))).unwrap_err();
        assert!(th.begin_submit(&c).is_ok());
    }

    #[test]
    fn invalid_submissions_are_rejected_before_submitting() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        assert_eq!(
            th.begin_submit(&NewComment::new("", "hi")).unwrap_err(),
            Error::Validation(ValidationError::EmptyAuthor)
        );
        assert_eq!(
            th.begin_submit(&NewComment::new("ana", "hi").replying_to(CommentId::from(9)))
                .unwrap_err(),
            Error::UnknownComment(CommentId::from(9))
        );
        assert!(th.in_flight().is_empty());
    }

    #[test]
    fn reply_past_max_depth_flattens() {
        let config = Config {
            max_depth: 1,
            ..Config::default()
        };
        let mut th = loaded(config, vec![rec(1, None, 1), rec(2, Some(1), 2)]);
        let c = NewComment::new("ana", "deep").replying_to(CommentId::from(2));
        let ticket = th.begin_submit(&c).unwrap();
        assert!(ticket.flattens());
        th.finish_submit(ticket, Ok(raw(3, Some(2), 3))).unwrap();
        let node = th.find(&CommentId::from(3)).unwrap();
        assert_eq!(node.depth, 0);
        assert!(th.tree().iter().any(|n| n.record.id == CommentId::from(3)));
    }

    #[test]
    fn reply_past_max_depth_can_be_rejected() {
        let config = Config {
            max_depth: 1,
            depth_policy: DepthPolicy::Reject,
            ..Config::default()
        };
        let mut th = loaded(config, vec![rec(1, None, 1), rec(2, Some(1), 2)]);
        let c = NewComment::new("ana", "deep").replying_to(CommentId::from(2));
        assert_eq!(
            th.begin_submit(&c).unwrap_err(),
            Error::Validation(ValidationError::MaxDepthExceeded {
                parent: CommentId::from(2),
                max_depth: 1,
            })
        );
    }

    #[test]
    fn submit_racing_a_reload_does_not_duplicate() {
        let mut th = loaded(Config::default(), vec![rec(1, None, 1)]);
        let ticket = th.begin_submit(&NewComment::new("ana", "hi")).unwrap();
        th.apply_load(Ok(vec![rec(1, None, 1), rec(2, None, 2)]), t(2000))
            .unwrap();
        th.finish_submit(ticket, Ok(raw(2, None, 2))).unwrap();
        assert_eq!(ids(&th), vec![1, 2]);
    }

    #[test]
    fn like_is_optimistic_and_never_rolled_back() {
        let mut th = loaded(Config::default(), vec![rec(5, None, 1)]);
        let (ticket, likes) = th.like(&CommentId::from(5)).unwrap();
        assert_eq!(likes, 1);
        assert_eq!(th.find(&CommentId::from(5)).unwrap().record.likes, 1);
        assert_eq!(th.like(&CommentId::from(5)).unwrap_err(), Error::Busy);
        assert!(th.finish_like(ticket, Err(anyhow!("timeout"))).is_err());
        assert_eq!(th.records()[0].likes, 1);
        let (ticket, likes) = th.like(&CommentId::from(5)).unwrap();
        assert_eq!(likes, 2);
        th.finish_like(ticket, Ok(())).unwrap();
        assert_eq!(
            th.like(&CommentId::from(6)).unwrap_err(),
            Error::UnknownComment(CommentId::from(6))
        );
    }

    #[test]
    fn delete_cascades_after_confirmation() {
        let mut th = cascade_fixture();
        assert_eq!(
            th.delete_preview(&CommentId::from(1)).unwrap(),
            DeletePreview {
                id: CommentId::from(1),
                author: String::from("author 1"),
                replies: 3,
            }
        );
        let ticket = th.begin_delete(&CommentId::from(1), true).unwrap();
        // nothing happens before the store confirms
        assert_eq!(ids(&th), vec![1, 2, 3, 4, 5]);
        let mut removed = th.finish_delete(ticket, Ok(())).unwrap();
        removed.sort();
        assert_eq!(
            removed,
            [1, 2, 3, 4].into_iter().map(CommentId::from).collect::<Vec<_>>()
        );
        assert_eq!(ids(&th), vec![5]);
        assert_eq!(tree::count(th.tree()), 1);
    }

    #[test]
    fn delete_also_removes_flattened_replies() {
        let config = Config {
            max_depth: 1,
            ..Config::default()
        };
        let mut th = loaded(
            config,
            vec![rec(1, None, 1), rec(2, Some(1), 2), rec(3, Some(2), 3)],
        );
        // 3 is shown as a root, away from 1
        assert_eq!(th.find(&CommentId::from(3)).unwrap().depth, 0);
        assert_eq!(th.delete_preview(&CommentId::from(1)).unwrap().replies, 2);
        let ticket = th.begin_delete(&CommentId::from(1), true).unwrap();
        let mut removed = th.finish_delete(ticket, Ok(())).unwrap();
        removed.sort();
        assert_eq!(
            removed,
            [1, 2, 3].into_iter().map(CommentId::from).collect::<Vec<_>>()
        );
        assert!(ids(&th).is_empty());
        assert!(th.tree().is_empty());
        assert_eq!(
            th.like(&CommentId::from(3)).unwrap_err(),
            Error::UnknownComment(CommentId::from(3))
        );
    }

    #[test]
    fn failed_delete_changes_nothing() {
        let mut th = cascade_fixture();
        let ticket = th.begin_delete(&CommentId::from(1), true).unwrap();
        assert!(matches!(
            th.finish_delete(ticket, Err(anyhow!("503"))),
            Err(Error::Remote(_))
        ));
        assert_eq!(ids(&th), vec![1, 2, 3, 4, 5]);
        assert!(th.in_flight().is_empty());
    }

    #[test]
    fn unauthorized_delete_is_refused() {
        let mut th = cascade_fixture();
        assert_eq!(
            th.begin_delete(&CommentId::from(1), false).unwrap_err(),
            Error::PermissionDenied
        );
        assert!(th.in_flight().is_empty());
    }

    #[test]
    fn delete_sees_replies_that_landed_meanwhile() {
        let mut th = cascade_fixture();
        let del = th.begin_delete(&CommentId::from(3), true).unwrap();
        let reply = th
            .begin_submit(&NewComment::new("ana", "late").replying_to(CommentId::from(4)))
            .unwrap();
        th.finish_submit(reply, Ok(raw(6, Some(4), 6))).unwrap();
        th.finish_delete(del, Ok(())).unwrap();
        assert_eq!(ids(&th), vec![1, 2, 5]);
    }

    #[test]
    fn reply_landing_after_its_parent_was_deleted_shows_as_root() {
        let mut th = cascade_fixture();
        let reply = th
            .begin_submit(&NewComment::new("ana", "late").replying_to(CommentId::from(4)))
            .unwrap();
        let del = th.begin_delete(&CommentId::from(1), true).unwrap();
        th.finish_delete(del, Ok(())).unwrap();
        th.finish_submit(reply, Ok(raw(6, Some(4), 6))).unwrap();
        assert_eq!(ids(&th), vec![5, 6]);
        assert_eq!(th.find(&CommentId::from(6)).unwrap().depth, 0);
    }

    #[test]
    fn cache_only_seeds_before_first_load() {
        let mut th = Thread::new(Config::default());
        let stale = Snapshot {
            saved_at: t(0),
            records: vec![rec(1, None, 1)],
        };
        assert!(!th.seed_from_cache(stale.clone(), t(10_000)));
        assert!(th.seed_from_cache(stale.clone(), t(10)));
        assert_eq!(th.source(), Some(Source::Cache { saved_at: t(0) }));
        th.apply_load(Ok(vec![rec(2, None, 2)]), t(20)).unwrap();
        assert_eq!(ids(&th), vec![2]);
        assert!(!th.seed_from_cache(stale, t(21)));
    }

    #[test]
    fn stats_and_export() {
        let mut admin = rec(3, None, 3);
        admin.is_admin = true;
        let th = loaded(
            Config::default(),
            vec![rec(1, None, -13 * 3600), rec(2, None, 60), admin],
        );
        assert_eq!(
            th.stats(t(120)),
            Stats {
                total: 3,
                today: 2,
                admin: 1,
            }
        );
        let dump = th.export(t(120));
        assert_eq!(dump.total_comments, 3);
        let v = serde_json::to_value(&dump).unwrap();
        assert!(v.get("exportTime").is_some());
        assert_eq!(v["comments"].as_array().unwrap().len(), 3);
    }
}
