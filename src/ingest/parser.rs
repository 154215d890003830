// src/ingest/parser.rs
//! RSS 2.0 / Atom body → `ParsedFeed`.
//!
//! Only the fields the pipeline needs are read (title, link, publish time).
//! Anything else in the document is ignored.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::fetcher::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::types::{FeedEntry, ParsedFeed};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// `<dc:date>`; the deserializer sees the local name.
    #[serde(rename = "date", alias = "dc:date")]
    dc_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<AtomText>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Parse a timestamp in RFC 2822 (RSS) or RFC 3339 (Atom) form.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond()))
        // chrono is more lenient with obsolete zone names ("GMT", "EST")
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .or_else(|_| DateTime::parse_from_rfc3339(ts))
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Parse a feed body. An unknown root element or an XML error is `Malformed`;
/// a well-formed feed without items is `Empty`.
pub fn parse_feed(body: &str) -> Result<ParsedFeed, FetchError> {
    let t0 = std::time::Instant::now();
    let xml = escape_html_entities_for_xml(body);

    let parsed = match root_element(&xml).as_deref() {
        Some("rss") => parse_rss(&xml)?,
        Some("feed") => parse_atom(&xml)?,
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "unsupported root element <{other}>"
            )))
        }
        None => return Err(FetchError::Malformed("no root element".into())),
    };

    histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    if parsed.entries.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(parsed)
}

fn parse_rss(xml: &str) -> Result<ParsedFeed, FetchError> {
    let rss: Rss = from_str(xml).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let entries = rss
        .channel
        .item
        .into_iter()
        .map(|it| FeedEntry {
            title: normalize_text(it.title.as_deref().unwrap_or_default()),
            link: it.link.unwrap_or_default().trim().to_string(),
            published: it
                .pub_date
                .as_deref()
                .or(it.dc_date.as_deref())
                .and_then(parse_timestamp),
        })
        .collect();
    Ok(ParsedFeed {
        title: rss.channel.title.map(|t| normalize_text(&t)),
        entries,
    })
}

fn parse_atom(xml: &str) -> Result<ParsedFeed, FetchError> {
    let feed: AtomFeed = from_str(xml).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let entries = feed
        .entry
        .into_iter()
        .map(|e| {
            let link = e
                .link
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| e.link.first())
                .and_then(|l| l.href.clone())
                .unwrap_or_default();
            FeedEntry {
                title: normalize_text(e.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default()),
                link: link.trim().to_string(),
                published: e
                    .published
                    .as_deref()
                    .or(e.updated.as_deref())
                    .and_then(parse_timestamp),
            }
        })
        .collect();
    Ok(ParsedFeed {
        title: feed.title.map(|t| normalize_text(&t.value)),
        entries,
    })
}

fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Decode a raw body. Precedence: byte-order mark, then the HTTP charset,
/// then the `<?xml encoding=...?>` declaration, then UTF-8.
pub fn decode_feed_bytes(bytes: &[u8], http_charset: Option<&str>) -> String {
    let encoding = Encoding::for_bom(bytes)
        .map(|(enc, _)| enc)
        .or_else(|| http_charset.and_then(|c| Encoding::for_label(c.trim().as_bytes())))
        .or_else(|| declared_encoding(bytes))
        .unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "feed body had undecodable bytes");
    }
    text.into_owned()
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    static RE_DECL: OnceCell<Regex> = OnceCell::new();
    let re = RE_DECL.get_or_init(|| {
        Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap()
    });
    // the declaration is ASCII in every encoding we care about
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let caps = re.captures(&head)?;
    Encoding::for_label(caps.get(1)?.as_str().as_bytes())
}

/// Turn HTML named entities (invalid in XML) into characters and escape
/// bare ampersands, so one sloppy title does not break the whole document.
/// The five XML entities and numeric references are left alone.
fn escape_html_entities_for_xml(s: &str) -> Cow<'_, str> {
    static RE_AMP: OnceCell<Regex> = OnceCell::new();
    let re = RE_AMP.get_or_init(|| {
        Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?").unwrap()
    });
    re.replace_all(s, |caps: &Captures| {
        let whole = &caps[0];
        let Some(reference) = caps.get(1) else {
            return "&amp;".to_string();
        };
        let reference = reference.as_str();
        if reference.starts_with('#')
            || matches!(reference, "amp;" | "lt;" | "gt;" | "quot;" | "apos;")
        {
            return whole.to_string();
        }
        let decoded = html_escape::decode_html_entities(whole);
        if decoded == whole {
            // unknown name: keep it as literal text
            format!("&amp;{reference}")
        } else {
            html_escape::encode_text(&decoded).into_owned()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Portal &amp; Co</title>
    <item>
      <title><![CDATA[Chuva forte atinge&nbsp;a capital]]></title>
      <link> https://portal.test/chuva </link>
      <pubDate>Mon, 06 Jan 2025 10:00:00 -0300</pubDate>
    </item>
    <item>
      <title>Sem data</title>
      <link>https://portal.test/sem-data</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Blog</title>
  <entry>
    <title type="html">Release &lt;b&gt;1.0&lt;/b&gt;</title>
    <link rel="self" href="https://blog.test/self"/>
    <link rel="alternate" href="https://blog.test/release"/>
    <updated>2025-01-06T13:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Portal & Co"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title, "Chuva forte atinge a capital");
        assert_eq!(feed.entries[0].link, "https://portal.test/chuva");
        assert_eq!(
            feed.entries[0].published.unwrap().to_rfc3339(),
            "2025-01-06T13:00:00+00:00"
        );
        assert!(feed.entries[1].published.is_none());
    }

    #[test]
    fn parses_atom_entries_prefers_alternate_link() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title, "Release 1.0");
        assert_eq!(feed.entries[0].link, "https://blog.test/release");
        assert!(feed.entries[0].published.is_some());
    }

    #[test]
    fn empty_and_garbage_bodies_fail() {
        let empty = r#"<rss version="2.0"><channel><title>x</title></channel></rss>"#;
        assert!(matches!(parse_feed(empty), Err(FetchError::Empty)));
        assert!(matches!(parse_feed("<html><body>oops</body></html>"), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_feed("not xml at all"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn timestamps_accept_both_formats() {
        assert!(parse_timestamp("Tue, 07 Jan 2025 08:30:00 GMT").is_some());
        assert!(parse_timestamp("2025-01-07T08:30:00-03:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("  ").is_none());
    }

    #[test]
    fn dc_date_counts_as_publish_time() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Agencia</title>
    <item>
      <title>So dc:date</title>
      <link>https://agencia.test/dc</link>
      <dc:date>2025-01-06T13:00:00Z</dc:date>
    </item>
  </channel>
</rss>"#;
        let feed = parse_feed(body).unwrap();
        assert_eq!(
            feed.entries[0].published.unwrap().to_rfc3339(),
            "2025-01-06T13:00:00+00:00"
        );
    }

    #[test]
    fn html_named_entities_do_not_break_the_feed() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Politica</title>
    <item>
      <title>Elei&ccedil;&atilde;o municipal &eacute; adiada</title>
      <link>https://portal.test/eleicao</link>
    </item>
    <item>
      <title>AT&T compra rival &bogus; &lt;hoje&gt;</title>
      <link>https://portal.test/att?a=1&b=2</link>
    </item>
  </channel>
</rss>"#;
        let feed = parse_feed(body).unwrap();
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title, "Eleição municipal é adiada");
        assert!(feed.entries[1].title.starts_with("AT&T compra rival &bogus;"));
        assert_eq!(feed.entries[1].link, "https://portal.test/att?a=1&b=2");
    }

    #[test]
    fn xml_declaration_selects_the_charset() {
        let mut body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<rss version=\"0.91\"><channel><title>Folha</title><item><title>Not\xEDcia</title><link>https://folha.test/n</link></item></channel></rss>".to_vec();
        let text = decode_feed_bytes(&body, None);
        let feed = parse_feed(&text).unwrap();
        assert_eq!(feed.entries[0].title, "Notícia");

        // a charset from the HTTP header wins over the declaration
        body = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><x>Notícia</x>".as_bytes().to_vec();
        assert!(decode_feed_bytes(&body, Some("utf-8")).contains("Notícia"));
        assert!(decode_feed_bytes("<x>ação</x>".as_bytes(), None).contains("ação"));
    }
}
