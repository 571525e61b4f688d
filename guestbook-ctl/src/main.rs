use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use chrono_tz::Tz;
use futures::channel::mpsc;
use guestbook_api::{CommentId, CommentStore, NewComment, RawComment, Session, UserId};
use guestbook_client::{
    markup, render::RenderedComment, CommentTreeService, Config, NoticeLevel, Signal, Snapshot,
    View,
};
use guestbook_mock_server::MockStore;
use tracing_subscriber::EnvFilter;

mod rest;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Base url of the backend, defaults to the GUESTBOOK_URL environment variable
    #[structopt(long)]
    url: Option<String>,

    /// Table holding the comments
    #[structopt(long, default_value = "guestbook")]
    table: String,

    /// Work on a local JSON dump of the table instead of a backend
    #[structopt(long, parse(from_os_str))]
    dump: Option<PathBuf>,

    /// With --dump, act as a signed-in admin
    #[structopt(long)]
    admin: bool,

    /// JSON file overriding the default thread settings
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Timezone for absolute dates
    #[structopt(long, default_value = "UTC")]
    tz: String,

    /// File to keep a snapshot of the last listing in
    #[structopt(long, parse(from_os_str))]
    cache: Option<PathBuf>,

    /// Device recorded on new comments, defaults to this machine's name
    #[structopt(long)]
    device: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Show the comment threads
    List {
        #[structopt(long, default_value = "1")]
        page: usize,
    },

    /// Post a new comment
    Post {
        author: String,
        content: String,
        #[structopt(long)]
        email: Option<String>,
    },

    /// Reply to a comment
    Reply {
        parent: CommentId,
        author: String,
        content: String,
        #[structopt(long)]
        email: Option<String>,
    },

    /// Like a comment
    Like { id: CommentId },

    /// Delete a comment with all its replies
    Delete {
        id: CommentId,

        /// Actually delete, instead of only showing what would go
        #[structopt(long)]
        yes: bool,
    },

    /// Show comment counts
    Stats,

    /// Write all comments as JSON
    Export {
        #[structopt(long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
}

fn env_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("retrieving {name} environment variable"))
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {path:?}"))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config file {path:?}"))
}

fn read_dump(path: &Path) -> anyhow::Result<Vec<RawComment>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let s = std::fs::read_to_string(path).with_context(|| format!("reading dump {path:?}"))?;
    serde_json::from_str(&s).with_context(|| format!("parsing dump {path:?}"))
}

fn write_json<T: serde::Serialize>(path: &Path, v: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serializing")?;
    std::fs::write(path, s).with_context(|| format!("writing {path:?}"))
}

fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let s = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&s) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::warn!(?err, ?path, "ignoring unreadable cache");
            None
        }
    }
}

fn print_comment(c: &RenderedComment) {
    let indent = "    ".repeat(c.depth);
    println!(
        "{indent}#{} {}{} · {} · {} · ♥ {}",
        c.id,
        c.author,
        if c.admin_badge { " [admin]" } else { "" },
        c.time_label,
        c.device,
        c.likes,
    );
    for line in markup::to_plain(&c.content).lines() {
        println!("{indent}  {line}");
    }
    for child in &c.children {
        print_comment(child);
    }
}

fn print_view(view: &View) {
    match view {
        View::Loading => println!("Loading…"),
        View::Failed { error } => println!("Failed to load comments: {error}"),
        View::Empty { .. } => println!("No comments yet"),
        View::Comments {
            threads,
            page,
            total_comments,
            stale,
        } => {
            if *stale {
                println!("(showing saved comments, they may be out of date)");
            }
            for t in threads {
                print_comment(t);
                println!();
            }
            println!(
                "page {}/{} · {total_comments} comments",
                page.current, page.total_pages
            );
        }
    }
}

fn print_notices(signals: &mut mpsc::UnboundedReceiver<Signal>) {
    while let Ok(Some(s)) = signals.try_next() {
        if let Signal::Notice(n) = s {
            let level = match n.level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            eprintln!("{level}: {}", n.message);
        }
    }
}

fn new_comment(author: &str, content: &str, email: Option<&str>) -> NewComment {
    let c = NewComment::new(author, content);
    match email {
        Some(email) => c.with_email(email),
        None => c,
    }
}

async fn run<S: CommentStore + ?Sized>(
    svc: &CommentTreeService<S>,
    cmd: Command,
) -> anyhow::Result<()> {
    match cmd {
        Command::List { page } => {
            svc.set_page(page);
            print_view(&svc.view());
        }
        Command::Post {
            author,
            content,
            email,
        } => {
            let rec = svc
                .submit(new_comment(&author, &content, email.as_deref()))
                .await?;
            println!("posted comment #{}", rec.id);
        }
        Command::Reply {
            parent,
            author,
            content,
            email,
        } => {
            let rec = svc
                .submit(new_comment(&author, &content, email.as_deref()).replying_to(parent))
                .await?;
            println!("posted reply #{}", rec.id);
        }
        Command::Like { id } => {
            let likes = svc.like(&id).await?;
            println!("comment #{id} now has {likes} likes");
        }
        Command::Delete { id, yes } => {
            let preview = svc.request_delete(&id).await?;
            if !yes {
                println!(
                    "would delete comment #{} by {} and its {} replies, pass --yes to confirm",
                    preview.id, preview.author, preview.replies
                );
                return Ok(());
            }
            let removed = svc.delete(&id).await?;
            println!("deleted {} comments", removed.len());
        }
        Command::Stats => {
            let stats = svc.stats();
            println!("total: {}", stats.total);
            println!("today: {}", stats.today);
            println!("by admins: {}", stats.admin);
        }
        Command::Export { output } => {
            let dump = svc.export();
            match output {
                Some(path) => write_json(&path, &dump)?,
                None => println!(
                    "{}",
                    serde_json::to_string_pretty(&dump).context("serializing export")?
                ),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let config = match &opt.config {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };
    let tz: Tz = opt
        .tz
        .parse()
        .map_err(|e| anyhow!("unknown timezone {:?}: {e}", opt.tz))?;

    let mock = match &opt.dump {
        Some(path) => {
            let store = MockStore::with_rows(read_dump(path)?);
            if opt.admin {
                store.set_session(Session::admin(UserId::stub()));
            }
            Some(Arc::new(store))
        }
        None => None,
    };
    let store: Arc<dyn CommentStore> = match &mock {
        Some(mock) => mock.clone() as Arc<dyn CommentStore>,
        None => {
            let url = match opt.url.clone() {
                Some(url) => url,
                None => env_var("GUESTBOOK_URL")?,
            };
            Arc::new(rest::RestStore::new(
                &url,
                env_var("GUESTBOOK_ANON_KEY")?,
                std::env::var("GUESTBOOK_TOKEN").ok(),
                opt.table.clone(),
            ))
        }
    };

    let device = opt.device.clone().unwrap_or_else(whoami::devicename);
    let svc = CommentTreeService::new(store, config)
        .with_device(device)
        .with_timezone(tz);
    let mut signals = svc.subscribe();

    if let Some(snapshot) = opt.cache.as_deref().and_then(read_snapshot) {
        svc.seed_cache(snapshot);
    }
    let loaded = svc.initialize().await;
    print_notices(&mut signals);
    if let (Ok(_), Some(path)) = (&loaded, &opt.cache) {
        write_json(path, &svc.snapshot())?;
    }
    if loaded.is_err() && !matches!(opt.cmd, Command::List { .. }) {
        return Err(anyhow!("cannot modify comments that failed to load"));
    }

    let res = run(&svc, opt.cmd).await;
    print_notices(&mut signals);
    if let (Some(mock), Some(path)) = (&mock, &opt.dump) {
        write_json(path, &mock.rows())?;
    }
    res
}
