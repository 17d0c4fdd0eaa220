use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::dates::parse_pub_date;
use crate::util::unescape_html;

/// The document as a whole could not be read as a feed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),
}

/// One item that was skipped while the rest of the feed parsed fine.
#[derive(Debug, Clone, Error)]
#[error("item {index}: {reason}")]
pub struct ItemParseError {
    /// Zero-based position of the item in the document
    pub index: usize,
    pub reason: String,
}

/// What to do with an item whose non-empty pubDate matches no known layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidDatePolicy {
    /// Drop the item and record an [`ItemParseError`]
    #[default]
    Skip,
    /// Keep the item with an unknown publish time
    Unknown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub invalid_dates: InvalidDatePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    /// Item URL; empty when the feed gave none
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    /// Items in document order
    pub items: Vec<ParsedItem>,
    /// Items that were skipped, in document order
    pub errors: Vec<ItemParseError>,
}

/// Text-bearing child elements we read from `<channel>` and `<item>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    PubDate,
    Guid,
}

impl Field {
    fn from_local_name(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Field::Title),
            "link" => Some(Field::Link),
            "description" => Some(Field::Description),
            // dc:date in RSS 1.0
            "pubDate" | "date" => Some(Field::PubDate),
            "guid" => Some(Field::Guid),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawFields {
    title: String,
    link: String,
    description: String,
    pub_date: String,
    guid: String,
    decode_error: Option<String>,
}

impl RawFields {
    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Description => &mut self.description,
            Field::PubDate => &mut self.pub_date,
            Field::Guid => &mut self.guid,
        }
    }

    /// First occurrence wins (`atom:link` and friends share local names)
    fn set(&mut self, field: Field, text: String) {
        let slot = self.slot(field);
        if slot.trim().is_empty() {
            *slot = text;
        }
    }
}

/// Parses an RSS 2.0 (or RSS 1.0) document into a [`ParsedFeed`].
///
/// Documents rooted at Atom's `<feed>` are delegated to `feed-rs`.
///
/// Text fields come back with XML and HTML entities decoded. A broken item
/// (undecodable text, unrecognized pubDate under [`InvalidDatePolicy::Skip`])
/// is recorded in [`ParsedFeed::errors`] and skipped; the remaining items are
/// still returned.
///
/// # Errors
///
/// [`ParseError::MalformedXml`] when the bytes are not well-formed XML, the
/// root element is not a feed, or there is no `<channel>`.
pub fn parse_feed(bytes: &[u8], options: &ParseOptions) -> Result<ParsedFeed, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations, and text
    // is decoded by html-escape rather than a DTD-aware unescaper.
    // The XML declaration (or a BOM) selects the decoder for text events
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut saw_channel = false;
    let mut channel = RawFields::default();
    // (fields, depth of the <item> element)
    let mut item: Option<(RawFields, usize)> = None;
    let mut item_index = 0usize;
    // (field, depth of the field element, accumulated text)
    let mut field: Option<(Field, usize, String)> = None;

    let mut feed = ParsedFeed::default();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            ParseError::MalformedXml(format!("{} at byte {}", e, reader.error_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                let depth = stack.len();

                if depth == 0 {
                    match name.as_str() {
                        "rss" | "RDF" => {}
                        "feed" => return parse_atom(bytes),
                        other => {
                            return Err(ParseError::MalformedXml(format!(
                                "unexpected root element <{other}>"
                            )))
                        }
                    }
                } else if field.is_none() {
                    let parent = stack.last().map(String::as_str).unwrap_or_default();
                    match (parent, name.as_str()) {
                        (_, "channel") if depth == 1 => saw_channel = true,
                        // RSS 2.0 nests items in <channel>, RSS 1.0 puts them beside it
                        (_, "item") if depth <= 2 && item.is_none() => {
                            item = Some((RawFields::default(), depth));
                        }
                        ("item", child) if item.is_some() => {
                            if let Some(f) = Field::from_local_name(child) {
                                field = Some((f, depth, String::new()));
                            }
                        }
                        ("channel", child) => {
                            if let Some(f) = Field::from_local_name(child) {
                                field = Some((f, depth, String::new()));
                            }
                        }
                        _ => {}
                    }
                }

                stack.push(name);
            }
            Event::Empty(e) => {
                let depth = stack.len();
                match local_name(&e).as_str() {
                    "channel" if depth == 1 => saw_channel = true,
                    "item" if depth <= 2 && item.is_none() && field.is_none() => {
                        // <item/> carries nothing; keep its slot in the numbering
                        item_index += 1;
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some((_, _, text)) = field.as_mut() {
                    match reader.decoder().decode(&t) {
                        Ok(s) => text.push_str(&s),
                        Err(e) => record_decode_error(&mut item, &mut channel, e.to_string()),
                    }
                }
            }
            Event::CData(c) => {
                if let Some((_, _, text)) = field.as_mut() {
                    match reader.decoder().decode(&c) {
                        Ok(s) => text.push_str(&s),
                        Err(e) => record_decode_error(&mut item, &mut channel, e.to_string()),
                    }
                }
            }
            Event::End(_) => {
                stack.pop();
                let depth = stack.len();

                if field.as_ref().is_some_and(|(_, d, _)| *d == depth) {
                    if let Some((f, _, text)) = field.take() {
                        match item.as_mut() {
                            Some((fields, _)) => fields.set(f, text),
                            None => channel.set(f, text),
                        }
                    }
                } else if item.as_ref().is_some_and(|(_, d)| *d == depth) {
                    if let Some((fields, _)) = item.take() {
                        match finish_item(fields, item_index, options) {
                            Ok(parsed) => feed.items.push(parsed),
                            Err(err) => {
                                tracing::debug!(item = err.index, reason = %err.reason, "Skipping malformed feed item");
                                feed.errors.push(err);
                            }
                        }
                        item_index += 1;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::MalformedXml(format!(
            "unexpected end of document inside <{open}>"
        )));
    }
    if !saw_channel {
        return Err(ParseError::MalformedXml(
            "missing <channel> element".to_string(),
        ));
    }

    if let Some(error) = &channel.decode_error {
        tracing::debug!(%error, "Dropped undecodable channel text");
    }
    feed.title = unescape_html(&channel.title);
    feed.description = unescape_html(&channel.description);
    feed.link = Some(unescape_link(&channel.link)).filter(|l| !l.is_empty());

    Ok(feed)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn record_decode_error(
    item: &mut Option<(RawFields, usize)>,
    channel: &mut RawFields,
    error: String,
) {
    let fields = match item.as_mut() {
        Some((fields, _)) => fields,
        None => channel,
    };
    fields.decode_error.get_or_insert(error);
}

fn unescape_link(raw: &str) -> String {
    html_escape::decode_html_entities(raw.trim()).trim().to_string()
}

fn finish_item(
    raw: RawFields,
    index: usize,
    options: &ParseOptions,
) -> Result<ParsedItem, ItemParseError> {
    if let Some(error) = raw.decode_error {
        return Err(ItemParseError {
            index,
            reason: format!("undecodable text: {error}"),
        });
    }

    let mut link = unescape_link(&raw.link);
    if link.is_empty() {
        // A permalink guid is the item URL in all but name
        let guid = unescape_link(&raw.guid);
        if guid.starts_with("http://") || guid.starts_with("https://") {
            link = guid;
        }
    }

    let pub_date = raw.pub_date.trim();
    let published = if pub_date.is_empty() {
        None
    } else {
        match (parse_pub_date(pub_date), options.invalid_dates) {
            (Some(at), _) => Some(at),
            (None, InvalidDatePolicy::Unknown) => {
                tracing::debug!(item = index, date = %pub_date, "Unrecognized publish date, keeping item undated");
                None
            }
            (None, InvalidDatePolicy::Skip) => {
                return Err(ItemParseError {
                    index,
                    reason: format!("unrecognized publish date {pub_date:?}"),
                })
            }
        }
    };

    Ok(ParsedItem {
        title: unescape_html(&raw.title),
        link,
        description: unescape_html(&raw.description),
        published,
    })
}

/// The entry's own page: the first `alternate` (or rel-less) link, else
/// whatever link comes first.
fn entry_link(links: &[feed_rs::model::Link]) -> String {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default()
}

fn parse_atom(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed =
        feed_rs::parser::parse(bytes).map_err(|e| ParseError::MalformedXml(e.to_string()))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| ParsedItem {
            title: entry
                .title
                .map(|t| unescape_html(&t.content))
                .unwrap_or_default(),
            link: entry_link(&entry.links),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|s| unescape_html(&s))
                .unwrap_or_default(),
            published: entry.published.or(entry.updated),
        })
        .collect();

    Ok(ParsedFeed {
        title: feed
            .title
            .map(|t| unescape_html(&t.content))
            .unwrap_or_default(),
        description: feed
            .description
            .map(|d| unescape_html(&d.content))
            .unwrap_or_default(),
        link: feed.links.first().map(|l| l.href.clone()),
        items,
        errors: Vec::new(),
    })
}
