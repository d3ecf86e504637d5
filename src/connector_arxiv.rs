//! arXiv connector.
//!
//! Pages through the arXiv export API (an Atom feed) and normalises each
//! `<entry>` into a [`PaperRecord`]. Used by `rgraph ingest arxiv` and by
//! the author enrichment pass for single-paper lookups.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.arxiv]
//! default_query = "cat:cs.LG"
//! page_size = 50
//! max_results = 100
//! page_delay_ms = 3000
//! ```
//!
//! # Identifiers
//!
//! Entry ids look like `http://arxiv.org/abs/2301.00001v2`. The part after
//! `/abs/` is kept as the record's `raw_id`; the version suffix is stripped
//! to form the identity key (`2301.00001`).
//!
//! # Isolation
//!
//! An entry with no id or no title is skipped with a warning and the rest
//! of the page is kept. Only an unreadable document or a non-2xx response
//! fails the call.

use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use std::time::Duration;

use crate::config::ArxivConnectorConfig;
use crate::error::{Error, Result};
use crate::models::{base_id, PaperRecord};
use crate::sources::PaperSource;

const SOURCE_NAME: &str = "arxiv";

pub struct ArxivConnector {
    client: reqwest::Client,
    config: ArxivConnectorConfig,
}

impl ArxivConnector {
    pub fn new(config: &ArxivConnectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("research-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("arxiv http client: {}", e)))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn get_feed(&self, params: &[(&str, String)]) -> Result<FeedPage> {
        let resp = self
            .client
            .get(&self.config.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::upstream(SOURCE_NAME, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(
                SOURCE_NAME,
                format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        let xml = resp
            .text()
            .await
            .map_err(|e| Error::upstream(SOURCE_NAME, e.to_string()))?;
        parse_feed(&xml)
    }
}

#[async_trait]
impl PaperSource for ArxivConnector {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_papers(&self, query: &str, max_results: usize) -> Result<Vec<PaperRecord>> {
        let mut records = Vec::new();
        let mut start = 0usize;

        while start < max_results {
            if start > 0 && self.config.page_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            }

            let count = self.config.page_size.min(max_results - start);
            let page = self
                .get_feed(&[
                    ("search_query", query.to_string()),
                    ("start", start.to_string()),
                    ("max_results", count.to_string()),
                    ("sortBy", "submittedDate".to_string()),
                    ("sortOrder", "descending".to_string()),
                ])
                .await;
            let page = match page {
                Ok(page) => page,
                Err(e) if start == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        start,
                        kept = records.len(),
                        error = %e,
                        "arxiv page failed, keeping earlier pages"
                    );
                    break;
                }
            };

            tracing::debug!(
                start,
                entries = page.entries,
                kept = page.records.len(),
                "arxiv page fetched"
            );

            if page.entries == 0 {
                break;
            }
            start += page.entries;
            records.extend(page.records);
        }

        records.truncate(max_results);
        Ok(records)
    }

    async fn lookup(&self, base_id: &str) -> Result<Option<PaperRecord>> {
        let page = self
            .get_feed(&[
                ("id_list", base_id.to_string()),
                ("max_results", "1".to_string()),
            ])
            .await?;
        Ok(page.records.into_iter().next())
    }
}

/// One parsed feed document.
#[derive(Debug, Default)]
pub struct FeedPage {
    /// Usable records.
    pub records: Vec<PaperRecord>,
    /// `<entry>` elements seen, including skipped ones.
    pub entries: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    categories: Vec<String>,
    pdf_url: Option<String>,
    authors: Vec<String>,
    author_name: String,
}

impl EntryBuilder {
    fn push_text(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Published => &mut self.published,
            Field::AuthorName => &mut self.author_name,
        };
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(text);
    }

    fn take_link_or_category(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"category" => {
                if let Some(term) = attr(e, b"term") {
                    if !term.is_empty() && !self.categories.contains(&term) {
                        self.categories.push(term);
                    }
                }
            }
            b"link" => {
                if attr(e, b"title").as_deref() == Some("pdf") {
                    self.pdf_url = attr(e, b"href");
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Option<PaperRecord> {
        let raw_id = entry_id(&self.id)?;
        let title = collapse_ws(&self.title);
        if title.is_empty() {
            return None;
        }

        let published_date = self
            .published
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        let pdf_url = self
            .pdf_url
            .or_else(|| Some(format!("https://arxiv.org/pdf/{}", raw_id)));

        Some(PaperRecord {
            base_id: base_id(&raw_id).to_string(),
            raw_id,
            title,
            abstract_text: collapse_ws(&self.summary),
            published_date,
            categories: self.categories,
            pdf_url,
            authors: self.authors,
            source: SOURCE_NAME.to_string(),
            on_hub: false,
            hub_upvotes: None,
        })
    }
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `http://arxiv.org/abs/2301.00001v2` → `2301.00001v2`.
fn entry_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let id = match raw.find("/abs/") {
        Some(pos) => &raw[pos + "/abs/".len()..],
        None => raw,
    };
    let id = id.trim_matches('/');
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom document.
pub fn parse_feed(xml: &str) -> Result<FeedPage> {
    let mut page = FeedPage::default();
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    entry = Some(EntryBuilder::default());
                    page.entries += 1;
                }
                b"author" if entry.is_some() => in_author = true,
                b"name" if in_author => field = Some(Field::AuthorName),
                b"id" if entry.is_some() && !in_author => field = Some(Field::Id),
                b"title" if entry.is_some() => field = Some(Field::Title),
                b"summary" if entry.is_some() => field = Some(Field::Summary),
                b"published" if entry.is_some() => field = Some(Field::Published),
                _ => {
                    if let Some(b) = entry.as_mut() {
                        b.take_link_or_category(&e);
                    }
                }
            },
            Ok(Event::Empty(e)) => {
                if let Some(b) = entry.as_mut() {
                    b.take_link_or_category(&e);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(b), Some(f)) = (entry.as_mut(), field) {
                    let text = t.unescape().unwrap_or_default();
                    b.push_text(f, &text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(b), Some(f)) = (entry.as_mut(), field) {
                    b.push_text(f, &String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(b) = entry.take() {
                        let id_hint = b.id.clone();
                        match b.finish() {
                            Some(record) => page.records.push(record),
                            None => tracing::warn!(
                                id = %id_hint,
                                "skipping arxiv entry without id or title"
                            ),
                        }
                    }
                    field = None;
                }
                b"author" => {
                    if let Some(b) = entry.as_mut() {
                        let name = collapse_ws(&std::mem::take(&mut b.author_name));
                        if !name.is_empty() {
                            b.authors.push(name);
                        }
                    }
                    in_author = false;
                    field = None;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::upstream(
                    SOURCE_NAME,
                    format!(
                        "malformed feed at byte {}: {}",
                        reader.buffer_position(),
                        e
                    ),
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=cat:cs.LG</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models &amp; more.
    </summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name><arxiv:affiliation>Google</arxiv:affiliation></author>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v7" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2301.00002v1</id>
    <published>2023-01-01T00:00:00Z</published>
    <summary>No title here.</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v2</id>
    <title>Old Style</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed_normalises_entries() {
        let page = parse_feed(FEED).unwrap();
        assert_eq!(page.entries, 3);
        assert_eq!(page.records.len(), 2);

        let p = &page.records[0];
        assert_eq!(p.raw_id, "1706.03762v7");
        assert_eq!(p.base_id, "1706.03762");
        assert_eq!(p.title, "Attention Is All You Need");
        assert_eq!(p.abstract_text, "The dominant sequence transduction models & more.");
        assert_eq!(p.published_date, NaiveDate::from_ymd_opt(2017, 6, 12));
        assert_eq!(p.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(p.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(
            p.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/1706.03762v7")
        );
        assert_eq!(p.source, "arxiv");
    }

    #[test]
    fn test_missing_optional_fields_become_empty() {
        let page = parse_feed(FEED).unwrap();
        let p = &page.records[1];
        assert_eq!(p.base_id, "hep-th/9901001");
        assert_eq!(p.abstract_text, "");
        assert!(p.authors.is_empty());
        assert!(p.categories.is_empty());
        assert!(p.published_date.is_none());
        assert_eq!(
            p.pdf_url.as_deref(),
            Some("https://arxiv.org/pdf/hep-th/9901001v2")
        );
    }

    #[test]
    fn test_empty_feed() {
        let page = parse_feed(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#,
        )
        .unwrap();
        assert_eq!(page.entries, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_malformed_feed_is_upstream_error() {
        let err = parse_feed("<feed><entry></feed>").unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[test]
    fn test_entry_id() {
        assert_eq!(
            entry_id("http://arxiv.org/abs/2301.00001v2").as_deref(),
            Some("2301.00001v2")
        );
        assert_eq!(entry_id("2301.00001").as_deref(), Some("2301.00001"));
        assert_eq!(entry_id("  "), None);
    }
}
