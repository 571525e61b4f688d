use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use futures::channel::mpsc;
use parking_lot::Mutex;

use crate::{
    api::{CommentId, CommentStore, Error, NewComment, Session, Time},
    markup,
    render::{self, Affordance, Binding, RenderContext, View},
    store, AccessGate, CommentRecord, Config, DeletePreview, ExportDump, Snapshot, Stats, Thread,
};

const EXCERPT_LEN: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, dismissable message for the user
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Sent to every subscriber
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Signal {
    /// The comment list changed, anything indexing rendered comments should
    /// resynchronize
    ContentChanged { comments: usize },
    Notice(Notice),
}

/// What the reply form needs to show which comment is being answered
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyContext {
    pub parent: CommentId,
    pub author: String,
    pub excerpt: String,
}

/// Outcome of activating a [`Binding`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Activation {
    ReplyTo(ReplyContext),
    Liked(u64),
    /// Deleting needs a confirmation, after which `delete` is to be called
    ConfirmDelete(DeletePreview),
}

struct Display {
    view: View,
    page: usize,
}

/// Owns one guestbook thread: loads it from the store, applies the user's
/// actions to it, and keeps its rendered view current.
///
/// Cloning gives another handle to the same thread.
pub struct CommentTreeService<S: ?Sized> {
    store: Arc<S>,
    thread: Arc<Mutex<Thread>>,
    gate: AccessGate,
    display: Arc<Mutex<Display>>,
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Signal>>>>,
    clock: Arc<dyn Fn() -> Time + Send + Sync>,
    device: String,
    tz: Tz,
}

impl<S: ?Sized> Clone for CommentTreeService<S> {
    fn clone(&self) -> Self {
        CommentTreeService {
            store: self.store.clone(),
            thread: self.thread.clone(),
            gate: self.gate.clone(),
            display: self.display.clone(),
            listeners: self.listeners.clone(),
            clock: self.clock.clone(),
            device: self.device.clone(),
            tz: self.tz,
        }
    }
}

impl<S: CommentStore + ?Sized> CommentTreeService<S> {
    pub fn new(store: Arc<S>, config: Config) -> CommentTreeService<S> {
        CommentTreeService {
            store,
            thread: Arc::new(Mutex::new(Thread::new(config))),
            gate: AccessGate::default(),
            display: Arc::new(Mutex::new(Display {
                view: View::Loading,
                page: 1,
            })),
            listeners: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(Utc::now),
            device: String::new(),
            tz: chrono_tz::UTC,
        }
    }

    /// Provenance recorded on the comments submitted through this service
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> Time + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Signal> {
        let (sender, receiver) = mpsc::unbounded();
        self.listeners.lock().push(sender);
        receiver
    }

    fn emit(&self, s: Signal) {
        self.listeners
            .lock()
            .retain(|l| l.unbounded_send(s.clone()).is_ok());
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        self.emit(Signal::Notice(Notice { level, message }));
    }

    /// Every failure reaches the user as a notice
    fn report<T>(&self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &res {
            self.notify(NoticeLevel::Error, err.to_string());
        }
        res
    }

    fn content_changed(&self) {
        let comments = self.thread.lock().records().len();
        self.emit(Signal::ContentChanged { comments });
    }

    fn rerender(&self) {
        let thread = self.thread.lock();
        let mut display = self.display.lock();
        let ctx = RenderContext {
            now: (self.clock)(),
            tz: self.tz,
            authorized: self.gate.can_delete(),
            pending: thread.in_flight(),
            page: display.page,
            per_page: thread.config().comments_per_page,
        };
        display.view = render::render_view(&thread, &ctx);
    }

    pub fn view(&self) -> View {
        self.display.lock().view.clone()
    }

    pub fn set_page(&self, page: usize) {
        self.display.lock().page = page;
        self.rerender();
    }

    /// Runs `f` against the current thread state
    pub fn with_thread<R>(&self, f: impl FnOnce(&Thread) -> R) -> R {
        f(&self.thread.lock())
    }

    pub fn stats(&self) -> Stats {
        self.thread.lock().stats((self.clock)())
    }

    pub fn export(&self) -> ExportDump {
        self.thread.lock().export((self.clock)())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.thread.lock().snapshot((self.clock)())
    }

    /// Shows a previously saved snapshot while waiting for the first load
    pub fn seed_cache(&self, snapshot: Snapshot) -> bool {
        let seeded = self
            .thread
            .lock()
            .seed_from_cache(snapshot, (self.clock)());
        if seeded {
            self.rerender();
        }
        seeded
    }

    /// Fetches the session, then the comments
    pub async fn initialize(&self) -> Result<usize, Error> {
        if let Err(err) = self.gate.refresh(&*self.store).await {
            tracing::warn!(%err, "failed fetching session, continuing signed out");
            self.gate.set_session(Session::anonymous());
            self.notify(NoticeLevel::Warning, err.to_string());
        }
        self.refresh().await
    }

    /// Reloads the whole list from the store. On failure the last good list
    /// stays on display.
    pub async fn refresh(&self) -> Result<usize, Error> {
        let res = store::load(&*self.store).await;
        let res = self.thread.lock().apply_load(res, (self.clock)());
        self.rerender();
        if res.is_ok() {
            self.content_changed();
        }
        self.report(res)
    }

    pub async fn submit(&self, mut c: NewComment) -> Result<CommentRecord, Error> {
        if c.device.is_empty() {
            c.device = self.device.clone();
        }
        // the badge reflects the session at submission time
        c.is_admin = self.gate.session().is_admin();
        let ticket = self.report(self.thread.lock().begin_submit(&c))?;
        let flattens = ticket.flattens();
        self.rerender();
        let res = self.store.create_comment(&c).await;
        let res = self.thread.lock().finish_submit(ticket, res);
        self.rerender();
        let rec = self.report(res)?;
        if flattens {
            self.notify(
                NoticeLevel::Info,
                String::from("The conversation is nested too deeply, the reply was posted as a new thread"),
            );
        }
        self.content_changed();
        Ok(rec)
    }

    pub async fn submit_top_level(
        &self,
        author: &str,
        content: &str,
    ) -> Result<CommentRecord, Error> {
        self.submit(NewComment::new(author, content)).await
    }

    pub async fn submit_reply(
        &self,
        parent: CommentId,
        author: &str,
        content: &str,
    ) -> Result<CommentRecord, Error> {
        self.submit(NewComment::new(author, content).replying_to(parent))
            .await
    }

    /// Bumps the counter locally, then persists it. Failing to persist only
    /// raises a warning: the new count is returned either way.
    pub async fn like(&self, id: &CommentId) -> Result<u64, Error> {
        let (ticket, likes) = self.report(self.thread.lock().like(id))?;
        self.rerender();
        let res = self.store.update_like_count(id, likes).await;
        let res = self.thread.lock().finish_like(ticket, res);
        self.rerender();
        if let Err(err) = res {
            self.notify(NoticeLevel::Warning, err.to_string());
        }
        Ok(likes)
    }

    async fn authorize(&self) -> Result<(), Error> {
        let can_delete = self.gate.refresh(&*self.store).await?;
        self.rerender();
        match can_delete {
            true => Ok(()),
            false => Err(Error::PermissionDenied),
        }
    }

    /// First half of a delete: checks permissions and tells what would go
    pub async fn request_delete(&self, id: &CommentId) -> Result<DeletePreview, Error> {
        let res = self.authorize().await;
        let res = res.and_then(|()| self.thread.lock().delete_preview(id));
        self.report(res)
    }

    /// Deletes the comment and all its replies, once the store confirmed.
    /// Returns the removed ids.
    pub async fn delete(&self, id: &CommentId) -> Result<Vec<CommentId>, Error> {
        let authorized = match self.gate.refresh(&*self.store).await {
            Ok(authorized) => authorized,
            Err(err) => return self.report(Err(err)),
        };
        self.rerender();
        let ticket = self.report(self.thread.lock().begin_delete(id, authorized))?;
        self.rerender();
        let res = self.store.delete_comment(id).await;
        let res = self.thread.lock().finish_delete(ticket, res);
        self.rerender();
        let removed = self.report(res)?;
        self.content_changed();
        Ok(removed)
    }

    pub async fn activate(&self, b: &Binding) -> Result<Activation, Error> {
        if !b.enabled {
            return Err(Error::Busy);
        }
        match b.affordance {
            Affordance::Reply => {
                let thread = self.thread.lock();
                let node = thread
                    .find(&b.target)
                    .ok_or_else(|| Error::UnknownComment(b.target.clone()))?;
                Ok(Activation::ReplyTo(ReplyContext {
                    parent: b.target.clone(),
                    author: node.record.author.clone(),
                    excerpt: excerpt(&node.record.content),
                }))
            }
            Affordance::Like => self.like(&b.target).await.map(Activation::Liked),
            Affordance::Delete => self
                .request_delete(&b.target)
                .await
                .map(Activation::ConfirmDelete),
        }
    }
}

fn excerpt(content: &str) -> String {
    let plain = markup::to_plain(&markup::parse(content));
    let mut chars = plain.chars();
    let mut res = chars.by_ref().take(EXCERPT_LEN).collect::<String>();
    if chars.next().is_some() {
        res.push('…');
    }
    res
}
