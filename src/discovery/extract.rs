//! Address and link extraction from fetched pages
//!
//! Regex based; pages on onion services are often malformed enough that a
//! strict HTML parser buys little.

use crate::models::OnionAddress;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

fn onion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b[a-z2-7]{56}\.onion\b").expect("valid regex"))
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#).expect("valid regex")
    })
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"))
}

fn meta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\b([^>]*)>").expect("valid regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
            .expect("valid regex")
    })
}

fn lang_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<html\b[^>]*\blang\s*=\s*["']?([a-z]{2,3}(?:[-_][a-z0-9]+)?)"#)
            .expect("valid regex")
    })
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

/// Every checksum-valid v3 address mentioned in `text`, first-seen order
pub fn extract_onion_addresses(text: &str) -> Vec<OnionAddress> {
    let mut seen = HashSet::new();
    onion_re()
        .find_iter(text)
        .filter_map(|m| OnionAddress::parse(m.as_str()).ok())
        .filter(|addr| seen.insert(addr.clone()))
        .collect()
}

/// Absolute http(s) links to onion services found in `html`
///
/// Relative links are resolved against `base`; fragments are dropped.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let mut seen = HashSet::new();
    href_re()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| base.join(&href).ok())
        .filter_map(|mut url| {
            url.set_fragment(None);
            let is_http = matches!(url.scheme(), "http" | "https");
            let is_onion = url.host_str().is_some_and(|h| h.ends_with(".onion"));
            (is_http && is_onion).then_some(url)
        })
        .filter(|url| seen.insert(url.to_string()))
        .collect()
}

/// Contents of `<title>`
pub fn extract_title(html: &str) -> Option<String> {
    title_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(&decode_entities(m.as_str())))
        .filter(|t| !t.is_empty())
}

/// `<meta name="description" content="...">`, in either attribute order
pub fn extract_meta_description(html: &str) -> Option<String> {
    meta_re().captures_iter(html).find_map(|caps| {
        let attrs = caps.get(1)?.as_str();
        let mut name = None;
        let mut content = None;
        for a in attr_re().captures_iter(attrs) {
            let key = a.get(1)?.as_str().to_ascii_lowercase();
            let value = a.get(2).or_else(|| a.get(3)).or_else(|| a.get(4))?.as_str();
            match key.as_str() {
                "name" | "property" => name = Some(value.to_ascii_lowercase()),
                "content" => content = Some(value.to_string()),
                _ => {},
            }
        }
        match name.as_deref() {
            Some("description") | Some("og:description") => content
                .map(|c| collapse_whitespace(&decode_entities(&c)))
                .filter(|c| !c.is_empty()),
            _ => None,
        }
    })
}

/// Primary language subtag from `<html lang>`
pub fn detect_language(html: &str) -> Option<String> {
    lang_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| {
            let tag = m.as_str().to_ascii_lowercase();
            tag.split(['-', '_']).next().unwrap_or(&tag).to_string()
        })
}

/// Readable text with scripts, styles, comments and tags removed
pub fn visible_text(html: &str) -> String {
    let without_blocks = block_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_blocks, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
