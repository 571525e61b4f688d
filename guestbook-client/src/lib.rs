mod cache;
pub use cache::Snapshot;

mod config;
pub use config::{Config, DepthPolicy};

mod gate;
pub use gate::AccessGate;

pub mod markup;

mod record;
pub use record::CommentRecord;

pub mod render;
pub use render::{Affordance, Binding, RenderContext, RenderedComment, View};

mod service;
pub use service::{Activation, CommentTreeService, Notice, NoticeLevel, ReplyContext, Signal};

mod store;
pub use store::{load, normalize_all};

mod thread;
pub use thread::{DeletePreview, ExportDump, Pending, Source, Stats, Thread, Ticket};

pub mod tree;
pub use tree::CommentNode;

pub mod api {
    pub use guestbook_api::*;
}
