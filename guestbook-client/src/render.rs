//! Turns the comment tree into a display structure.
//!
//! Rendering is a pure function of the tree and the [`RenderContext`]: the
//! same inputs always give the same output, so the display can be replaced
//! wholesale on every change.

use std::collections::HashSet;

use chrono_tz::Tz;

use crate::{
    api::{CommentId, Time},
    markup::{self, Inline},
    tree, CommentNode, Pending, Source, Thread,
};

const AVATAR_PALETTES: u32 = 5;
const UNKNOWN_DEVICE: &str = "Unknown device";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize)]
pub enum Affordance {
    Reply,
    Like,
    Delete,
}

/// An interactive control attached to one rendered comment
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Binding {
    pub affordance: Affordance,
    pub target: CommentId,
    /// Disabled while the same action is being submitted
    pub enabled: bool,
}

impl Binding {
    fn pending(&self) -> Pending {
        match self.affordance {
            Affordance::Reply => Pending::Submit(Some(self.target.clone())),
            Affordance::Like => Pending::Like(self.target.clone()),
            Affordance::Delete => Pending::Delete(self.target.clone()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Avatar {
    pub initial: String,
    pub palette: u32,
}

impl Avatar {
    pub fn for_author(author: &str) -> Avatar {
        let initial = match author.chars().next() {
            Some(c) => c.to_uppercase().collect(),
            None => String::from("?"),
        };
        let sum = author
            .chars()
            .fold(0u32, |acc, c| acc.wrapping_add(u32::from(c)));
        Avatar {
            initial,
            palette: sum % AVATAR_PALETTES,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct RenderedComment {
    pub id: CommentId,
    pub depth: usize,
    /// Raw author name, escaped when turned into html
    pub author: String,
    pub avatar: Avatar,
    pub admin_badge: bool,
    pub time_label: String,
    pub device: String,
    pub likes: u64,
    pub content: Vec<Inline>,
    pub bindings: Vec<Binding>,
    pub children: Vec<RenderedComment>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Page {
    /// 1-based
    pub current: usize,
    pub total_pages: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub enum View {
    /// Nothing was loaded yet
    Loading,
    /// The first load failed and there is nothing to show
    Failed { error: String },
    /// The guestbook has no comments
    Empty { stale: bool },
    Comments {
        threads: Vec<RenderedComment>,
        page: Page,
        total_comments: usize,
        /// Showing a cached copy, or the last load failed
        stale: bool,
    },
}

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub now: Time,
    pub tz: Tz,
    pub authorized: bool,
    pub pending: &'a HashSet<Pending>,
    /// 1-based, clamped to the existing pages
    pub page: usize,
    /// Root threads per page, 0 for everything on one page
    pub per_page: usize,
}

/// Human-relative label for `t`, as seen at `now`
pub fn relative_time(t: Time, now: Time, tz: Tz) -> String {
    let diff = now.signed_duration_since(t);
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };
    if diff.num_minutes() < 1 {
        String::from("just now")
    } else if diff.num_hours() < 1 {
        plural(diff.num_minutes(), "minute")
    } else if diff.num_days() < 1 {
        plural(diff.num_hours(), "hour")
    } else if diff.num_days() < 7 {
        plural(diff.num_days(), "day")
    } else if diff.num_days() < 30 {
        plural(diff.num_weeks(), "week")
    } else {
        t.with_timezone(&tz).format("%b %-d, %Y").to_string()
    }
}

fn bindings(id: &CommentId, ctx: &RenderContext) -> Vec<Binding> {
    let mut affordances = vec![Affordance::Reply, Affordance::Like];
    if ctx.authorized {
        affordances.push(Affordance::Delete);
    }
    affordances
        .into_iter()
        .map(|affordance| {
            let mut b = Binding {
                affordance,
                target: id.clone(),
                enabled: true,
            };
            b.enabled = !ctx.pending.contains(&b.pending());
            b
        })
        .collect()
}

fn render_node(node: &CommentNode, ctx: &RenderContext) -> RenderedComment {
    let r = &node.record;
    RenderedComment {
        id: r.id.clone(),
        depth: node.depth,
        author: r.author.clone(),
        avatar: Avatar::for_author(&r.author),
        admin_badge: r.is_admin,
        time_label: relative_time(r.created_at, ctx.now, ctx.tz),
        device: match r.device.is_empty() {
            true => String::from(UNKNOWN_DEVICE),
            false => r.device.clone(),
        },
        likes: r.likes,
        content: markup::parse(&r.content),
        bindings: bindings(&r.id, ctx),
        children: node.children.iter().map(|c| render_node(c, ctx)).collect(),
    }
}

/// Renders every given thread, ignoring pagination
pub fn render(tree: &[CommentNode], ctx: &RenderContext) -> Vec<RenderedComment> {
    tree.iter().map(|n| render_node(n, ctx)).collect()
}

fn paginate<'a>(roots: &'a [CommentNode], ctx: &RenderContext) -> (&'a [CommentNode], Page) {
    if ctx.per_page == 0 {
        let page = Page {
            current: 1,
            total_pages: 1,
        };
        return (roots, page);
    }
    let total_pages = std::cmp::max(1, roots.len().div_ceil(ctx.per_page));
    let current = ctx.page.clamp(1, total_pages);
    let start = std::cmp::min((current - 1) * ctx.per_page, roots.len());
    let end = std::cmp::min(start.saturating_add(ctx.per_page), roots.len());
    (
        &roots[start..end],
        Page {
            current,
            total_pages,
        },
    )
}

/// The whole display for the thread's current state
pub fn render_view(thread: &Thread, ctx: &RenderContext) -> View {
    let stale = thread.last_error().is_some();
    match (thread.source(), thread.last_error()) {
        (None, None) => View::Loading,
        (None, Some(error)) => View::Failed {
            error: String::from(error),
        },
        (Some(source), _) => {
            if thread.tree().is_empty() {
                return View::Empty { stale };
            }
            let (roots, page) = paginate(thread.tree(), ctx);
            View::Comments {
                threads: render(roots, ctx),
                page,
                total_comments: tree::count(thread.tree()),
                stale: stale || matches!(source, Source::Cache { .. }),
            }
        }
    }
}

impl RenderedComment {
    pub fn walk(&self) -> Vec<&RenderedComment> {
        let mut res = vec![self];
        for c in &self.children {
            res.extend(c.walk());
        }
        res
    }

    pub fn to_html(&self) -> String {
        let mut res = format!(
            r#"<div class="comment depth-{}" data-id="{}">"#,
            self.depth,
            markup::escape(self.id.as_str())
        );
        res.push_str(&format!(
            r#"<div class="avatar palette-{}">{}</div>"#,
            self.avatar.palette,
            markup::escape(&self.avatar.initial)
        ));
        res.push_str(&format!(
            r#"<h4>{}{}</h4>"#,
            markup::escape(&self.author),
            if self.admin_badge {
                r#" <span class="admin-badge">admin</span>"#
            } else {
                ""
            }
        ));
        res.push_str(&format!(
            r#"<div class="comment-time">{} · {}</div>"#,
            markup::escape(&self.time_label),
            markup::escape(&self.device)
        ));
        res.push_str(&format!(
            r#"<div class="comment-content">{}</div>"#,
            markup::to_html(&self.content)
        ));
        for b in &self.bindings {
            let (class, label) = match b.affordance {
                Affordance::Reply => ("reply-btn", String::from("Reply")),
                Affordance::Like => ("like-btn", format!("Like ({})", self.likes)),
                Affordance::Delete => ("delete-btn", String::from("Delete")),
            };
            res.push_str(&format!(
                r#"<button class="{class}" data-id="{}"{}>{label}</button>"#,
                markup::escape(b.target.as_str()),
                if b.enabled { "" } else { " disabled" }
            ));
        }
        if !self.children.is_empty() {
            res.push_str(r#"<div class="comment-replies">"#);
            for c in &self.children {
                res.push_str(&c.to_html());
            }
            res.push_str("</div>");
        }
        res.push_str("</div>");
        res
    }
}

impl View {
    pub fn threads(&self) -> &[RenderedComment] {
        match self {
            View::Comments { threads, .. } => threads,
            _ => &[],
        }
    }

    /// Every binding currently on display, in display order
    pub fn bindings(&self) -> Vec<&Binding> {
        self.threads()
            .iter()
            .flat_map(|t| t.walk())
            .flat_map(|c| c.bindings.iter())
            .collect()
    }

    pub fn find(&self, id: &CommentId) -> Option<&RenderedComment> {
        self.threads()
            .iter()
            .flat_map(|t| t.walk())
            .find(|c| c.id == *id)
    }

    pub fn to_html(&self) -> String {
        match self {
            View::Loading => String::from(r#"<div class="comments-loading">Loading…</div>"#),
            View::Failed { error } => format!(
                r#"<div class="comments-error">Failed to load comments: {}</div>"#,
                markup::escape(error)
            ),
            View::Empty { .. } => {
                String::from(r#"<div class="comments-empty">No comments yet</div>"#)
            }
            View::Comments {
                threads,
                page,
                total_comments,
                stale,
            } => {
                let mut res = format!(
                    r#"<div class="comments{}" data-total="{total_comments}">"#,
                    if *stale { " stale" } else { "" }
                );
                for t in threads {
                    res.push_str(&t.to_html());
                }
                if page.total_pages > 1 {
                    res.push_str(&format!(
                        r#"<div class="pagination">{} / {}</div>"#,
                        page.current, page.total_pages
                    ));
                }
                res.push_str("</div>");
                res
            }
        }
    }
}
