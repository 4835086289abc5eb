//! `Link` header pagination
//!
//! Libraries.io marks truncated result sets with an RFC 8288 `Link`
//! header such as
//! `<https://libraries.io/api/Pypi/x/contributors?page=2&per_page=100>; rel="next"`.

use reqwest::header::{HeaderMap, LINK};

/// One `<target>; rel="..."` entry of a `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub target: String,
    pub rels: Vec<String>,
}

impl LinkEntry {
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

/// Parses a `Link` header value into its entries
pub fn parse_link_header(value: &str) -> Vec<LinkEntry> {
    let mut entries = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };

        let target = after[..end].trim().to_string();
        let tail = &after[end + 1..];
        let params_end = tail.find('<').unwrap_or(tail.len());
        let rels = parse_rels(&tail[..params_end]);

        entries.push(LinkEntry { target, rels });
        rest = &tail[params_end..];
    }

    entries
}

fn parse_rels(params: &str) -> Vec<String> {
    params
        .split(';')
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("rel") {
                return None;
            }
            let value = value.trim().trim_end_matches(',').trim().trim_matches('"');
            Some(value.to_string())
        })
        .flat_map(|value| {
            value
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// The `rel="next"` target across all `Link` headers, if present
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_link_header)
        .find(|entry| entry.has_rel("next"))
        .map(|entry| entry.target)
}
