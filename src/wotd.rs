// ABOUTME: Word of the day read from an RSS feed over the shared transport
// ABOUTME: Backs the wotd builtin; only the first feed item is used

use crate::session::search;
use crate::transport::Transport;
use async_trait::async_trait;
use regex::Regex;
use sechat_core::events::decode_html_entities;
use sechat_core::{ChatResult, WordSource};
use std::sync::{Arc, LazyLock};

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<item>(.*?)</item>").expect("item pattern is valid"));
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<title>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</title>")
        .expect("title pattern is valid")
});
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<link>\s*(.*?)\s*</link>").expect("link pattern is valid")
});
static SHORTDEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<merriam:shortdef>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</merriam:shortdef>")
        .expect("shortdef pattern is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

fn clean(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, "");
    decode_html_entities(stripped.trim())
}

/// Chat text for the first item of an RSS feed
pub fn parse_feed(xml: &str) -> ChatResult<String> {
    let item = search(&ITEM_RE, xml, "feed item")?;
    let word = clean(&search(&TITLE_RE, &item, "word title")?);
    let link = search(&LINK_RE, &item, "word link").ok();
    let definition = search(&SHORTDEF_RE, &item, "short definition")
        .ok()
        .map(|d| clean(&d))
        .filter(|d| !d.is_empty());

    let mut text = match link {
        Some(link) => format!("Word of the day: [{}]({})", word, link.trim()),
        None => format!("Word of the day: {}", word),
    };
    if let Some(definition) = definition {
        text.push_str(": ");
        text.push_str(&definition);
    }
    Ok(text)
}

/// Reads the word of the day from a feed URL
pub struct FeedWordSource {
    transport: Arc<dyn Transport>,
    url: String,
}

impl FeedWordSource {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }
}

#[async_trait]
impl WordSource for FeedWordSource {
    async fn word_of_the_day(&self) -> ChatResult<String> {
        tracing::debug!(url = %self.url, "Fetching word of the day");
        let feed = self.transport.get(&self.url).await?;
        parse_feed(&feed)
    }
}
