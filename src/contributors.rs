//! Contributor payload model
//!
//! The fetcher stores response bodies verbatim. The export path joins a
//! project's pages and passes each entry through unchanged, checking only
//! that it reads as a [`Contributor`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One entry of the contributors endpoint's JSON array
///
/// Fields the endpoint adds later are ignored on decode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contributor {
    #[serde(default, deserialize_with = "string_or_number")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub github_id: Option<String>,
    pub login: Option<String>,
    pub name: Option<String>,
    pub host_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
}

/// Accepts `"123"`, `123` or `null`
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    }))
}

/// Decodes one stored page, keeping each entry exactly as sent
///
/// Fails when the page is not an array or an entry is not contributor-shaped.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    let entries: Vec<Value> = serde_json::from_slice(payload)?;
    for entry in &entries {
        Contributor::deserialize(entry)?;
    }
    Ok(entries)
}

/// Joins a project's pages, in the order given, into one list
pub fn stitch_pages<P: AsRef<[u8]>>(pages: &[P]) -> Result<Vec<Value>, serde_json::Error> {
    let mut contributors = Vec::new();
    for page in pages {
        contributors.extend(decode_payload(page.as_ref())?);
    }
    Ok(contributors)
}
