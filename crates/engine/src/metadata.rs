//! File metadata produced by the transport for a URL, and the filename
//! derivation/sanitization rules in §6.3–§6.4.

use percent_encoding::percent_decode_str;
use std::time::SystemTime;

/// Metadata describing a remote file, as produced by `head`/`get` (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub url: String,
    pub filename: String,
    pub content_length: u64,
    pub accept_ranges: bool,
    pub content_type: Option<String>,
    pub last_modified: Option<SystemTime>,
    pub etag: Option<String>,
    pub protocol: String,
}

const SANITIZE_TARGETS: [char; 6] = ['<', '>', ':', '"', '|', '?'];
const MAX_FILENAME_BYTES: usize = 255;
const MAX_EXTENSION_BYTES: usize = 50;

/// Sanitizes a raw filename per §6.3, bit-exact:
/// replace `/` and `\` with `_`; remove NUL; trim leading/trailing whitespace
/// and `.`; replace each of `< > : " | ? *` with `_`; truncate to 255 bytes,
/// preserving an extension of at most 50 bytes. An empty result becomes the
/// literal `"download"`.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let mut s: String = raw
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| match c {
            '/' | '\\' => '_',
            '*' => '_',
            c if SANITIZE_TARGETS.contains(&c) => '_',
            c => c,
        })
        .collect();

    s = s.trim_matches(|c: char| c.is_whitespace() || c == '.').to_string();

    if s.is_empty() {
        return "download".to_string();
    }

    truncate_preserving_extension(&s, MAX_FILENAME_BYTES, MAX_EXTENSION_BYTES)
}

fn truncate_preserving_extension(s: &str, max_bytes: usize, max_ext_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let (stem, ext) = match s.rfind('.') {
        Some(idx) if idx > 0 => (&s[..idx], &s[idx..]),
        _ => (s, ""),
    };

    let ext = if ext.len() > max_ext_bytes {
        &ext[..max_ext_bytes]
    } else {
        ext
    };

    let stem_budget = max_bytes.saturating_sub(ext.len());
    let mut stem_end = stem_budget.min(stem.len());
    while stem_end > 0 && !stem.is_char_boundary(stem_end) {
        stem_end -= 1;
    }

    format!("{}{}", &stem[..stem_end], ext)
}

/// Derives a filename from a URL's last path segment when no
/// `Content-Disposition` header is present (§4.1 step 2): strips the query
/// string, percent-decodes, then sanitizes.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = without_query.rsplit('/').find(|s| !s.is_empty()).unwrap_or("");
    let decoded = percent_decode_str(last_segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last_segment.to_string());
    sanitize_filename(&decoded)
}

/// Parses a `Content-Disposition` header value per §6.4 and returns the
/// sanitized filename it names, if any. `filename*` (RFC 5987/6266) takes
/// priority over plain `filename`.
#[must_use]
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain: Option<String> = None;
    let mut extended: Option<String> = None;

    for param in split_params(value) {
        let param = param.trim();
        if let Some(rest) = param.strip_prefix("filename*=") {
            extended = parse_ext_value(rest.trim());
        } else if let Some(rest) = ci_strip_prefix(param, "filename=") {
            plain = Some(unescape_quoted(rest.trim()));
        }
    }

    extended.or(plain).map(|raw| sanitize_filename(&raw))
}

fn ci_strip_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Splits on `;` but not inside double-quoted spans.
fn split_params(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Unescapes `\"` -> `"` and `\\` -> `\` inside a (possibly quoted) value,
/// stripping the surrounding quotes if present.
fn unescape_quoted(value: &str) -> String {
    let inner = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses the `<encoding>'<lang>'<percent-encoded>` grammar of `filename*`.
fn parse_ext_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let _encoding = parts.next()?;
    let _lang = parts.next()?;
    let encoded = parts.next()?;
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Parses an HTTP date header (`Last-Modified`) in any of the three
/// grammars the spec requires: RFC 1123, RFC 850, ANSI C asctime.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

/// Normalizes an `ETag` value: strips a leading weak marker (`W/`) and
/// surrounding single or double quotes.
#[must_use]
pub fn normalize_etag(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value).trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}
