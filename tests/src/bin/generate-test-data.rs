//! Prints a JSON dump of guestbook rows, usable with `guestbook-ctl --dump`.
//!
//! Rows come in the various shapes the table went through over time, with
//! some orphans and some threads deeper than the default maximum depth.

use chrono::{Duration, Utc};
use guestbook_api::device_from_user_agent;
use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Value};

const NUM_COMMENTS: u64 = 200;
const MAX_CONTENT_WORDS: usize = 40;
const DAYS_OF_HISTORY: i64 = 90;

const AUTHORS: &[&str] = &["Ana", "bo", "Chen Wei", "Dolores", "élise", "Farid", "gus"];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1",
];

fn gen_content(rng: &mut impl Rng) -> String {
    let mut content = lipsum::lipsum_words(rng.gen_range(3..MAX_CONTENT_WORDS));
    match rng.gen_range(0..10) {
        0 => content.push_str(" [b]really[/b]"),
        1 => content.push_str(" see https://example.com/guestbook"),
        2 => content.push_str("\n[i]p.s.[/i] [code]<3[/code]"),
        _ => (),
    }
    content
}

fn gen_parent(rng: &mut impl Rng, id: u64, chain_tip: &mut Option<u64>) -> Value {
    match rng.gen_range(0..20) {
        // roots
        0..=7 => Value::Null,
        // orphans, pointing past the end of the table
        8 => json!(NUM_COMMENTS + id),
        // deep chains
        9..=12 => {
            let parent = chain_tip.unwrap_or(id - 1);
            *chain_tip = Some(id);
            json!(parent)
        }
        // anything earlier, sometimes as a string
        _ => {
            let parent = rng.gen_range(1..id);
            match rng.gen_bool(0.5) {
                true => json!(parent),
                false => json!(parent.to_string()),
            }
        }
    }
}

fn main() -> serde_json::Result<()> {
    let mut rng = rand::thread_rng();
    let start = Utc::now() - Duration::days(DAYS_OF_HISTORY);
    let step = DAYS_OF_HISTORY * 24 * 3600 / NUM_COMMENTS as i64;
    let mut chain_tip = None;

    let mut rows = Vec::new();
    for id in 1..=NUM_COMMENTS {
        let created_at = start + Duration::seconds(step * id as i64 + rng.gen_range(0..step));
        let parent = match id {
            1 => Value::Null,
            _ => gen_parent(&mut rng, id, &mut chain_tip),
        };
        let author = AUTHORS.choose(&mut rng).copied().unwrap_or("anonymous");
        let ua = USER_AGENTS.choose(&mut rng).copied().unwrap_or("");
        let mut row = json!({
            "id": id,
            "author": author,
            "content": gen_content(&mut rng),
            "likes": rng.gen_range(0..12),
            "device": device_from_user_agent(ua),
        });
        // the table's column names changed a few times
        match rng.gen_range(0..4) {
            0 => {
                row["parentId"] = parent;
                row["createdAt"] = json!(created_at.to_rfc3339());
                row["isAdmin"] = json!(author == "Ana");
            }
            1 => {
                row["parent_id"] = parent;
                row["timestamp"] = json!(created_at.timestamp_millis());
            }
            _ => {
                row["parent_id"] = parent;
                row["created_at"] = json!(created_at.to_rfc3339());
                row["is_admin"] = json!(author == "Ana");
            }
        }
        rows.push(row);
    }

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
