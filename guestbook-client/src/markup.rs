//! The small set of inline formatting allowed in comments.
//!
//! Everything else in a comment is plain text, and is escaped on output.

use pest::{iterators::Pairs, Parser as _};

#[derive(pest_derive::Parser)]
#[grammar = "markup.pest"]
struct Parser;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub enum Inline {
    Text(String),
    Bold(Vec<Inline>),
    Italic(Vec<Inline>),
    Code(String),
    Link(String),
    LineBreak,
}

pub fn parse(content: &str) -> Vec<Inline> {
    match Parser::parse(Rule::markup, content) {
        Ok(mut pairs) => match pairs.next() {
            Some(markup) => spans(markup.into_inner()),
            None => vec![Inline::Text(String::from(content))],
        },
        Err(err) => {
            // the grammar accepts any input, so this is a bug in it
            tracing::error!(?err, "failed parsing comment markup");
            vec![Inline::Text(String::from(content))]
        }
    }
}

fn spans(pairs: Pairs<Rule>) -> Vec<Inline> {
    let mut res: Vec<Inline> = Vec::new();
    for p in pairs {
        let span = match p.as_rule() {
            Rule::bold => Inline::Bold(parse(inner_str(p))),
            Rule::italic => Inline::Italic(parse(inner_str(p))),
            Rule::code => Inline::Code(String::from(inner_str(p))),
            Rule::url => Inline::Link(String::from(p.as_str())),
            Rule::newline => Inline::LineBreak,
            Rule::text | Rule::stray => Inline::Text(String::from(p.as_str())),
            _ => continue,
        };
        // merge text runs split by stray brackets
        match (res.last_mut(), span) {
            (Some(Inline::Text(prev)), Inline::Text(t)) => prev.push_str(&t),
            (_, span) => res.push(span),
        }
    }
    res
}

fn inner_str(p: pest::iterators::Pair<Rule>) -> &str {
    p.into_inner().next().map(|body| body.as_str()).unwrap_or("")
}

pub fn escape(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => res.push_str("&amp;"),
            '<' => res.push_str("&lt;"),
            '>' => res.push_str("&gt;"),
            '"' => res.push_str("&quot;"),
            '\'' => res.push_str("&#39;"),
            c => res.push(c),
        }
    }
    res
}

pub fn to_html(spans: &[Inline]) -> String {
    let mut res = String::new();
    for s in spans {
        match s {
            Inline::Text(t) => res.push_str(&escape(t)),
            Inline::Bold(inner) => {
                res.push_str("<strong>");
                res.push_str(&to_html(inner));
                res.push_str("</strong>");
            }
            Inline::Italic(inner) => {
                res.push_str("<em>");
                res.push_str(&to_html(inner));
                res.push_str("</em>");
            }
            Inline::Code(c) => {
                res.push_str("<code>");
                res.push_str(&escape(c));
                res.push_str("</code>");
            }
            Inline::Link(url) => {
                let url = escape(url);
                res.push_str(&format!(
                    r#"<a href="{url}" target="_blank" rel="noopener">{url}</a>"#
                ));
            }
            Inline::LineBreak => res.push_str("<br>"),
        }
    }
    res
}

/// Text with the formatting stripped, for terminals and search indexing
pub fn to_plain(spans: &[Inline]) -> String {
    let mut res = String::new();
    for s in spans {
        match s {
            Inline::Text(t) | Inline::Code(t) | Inline::Link(t) => res.push_str(t),
            Inline::Bold(inner) | Inline::Italic(inner) => res.push_str(&to_plain(inner)),
            Inline::LineBreak => res.push('\n'),
        }
    }
    res
}
