//! Finished artifacts and their display representations.

use crate::principal::PrincipalId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Number of random hex characters in a generated artifact name.
pub const ARTIFACT_NAME_ENTROPY_HEX: usize = 12;

/// Descriptor returned to the client after a successful merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub id: Uuid,
    pub url: String,
    pub markdown_snippet: String,
    pub html_snippet: String,
}

/// Embeddable snippets derived from a label and a public URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplaySnippets {
    pub markdown: String,
    pub html: String,
}

impl DisplaySnippets {
    /// Build escaped markdown and html snippets.
    ///
    /// Both the label and the URL are HTML-escaped, so a filename such as
    /// `"><script>` cannot break out of the attribute it lands in.
    pub fn build(label: &str, url: &str) -> Self {
        let label = escape_html(label);
        let url = escape_html(url);
        Self {
            markdown: format!("![{label}]({url})"),
            html: format!("<img src=\"{url}\" alt=\"{label}\">"),
        }
    }
}

/// Escape `& < > " '` for use in HTML text and attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Generate a collision-resistant artifact filename:
/// `<owner>_<unix seconds>_<12 hex>.<ext>`.
///
/// The original filename never appears on disk.
pub fn unique_artifact_name(owner: &PrincipalId, extension: &str, at: OffsetDateTime) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{owner}_{}_{}.{extension}",
        at.unix_timestamp(),
        &random[..ARTIFACT_NAME_ENTROPY_HEX]
    )
}

/// Relative location of an owner's artifacts below the artifact root.
pub fn owner_dir(owner: &PrincipalId) -> String {
    format!("{owner}/images")
}

/// Public URL of an artifact: `<base_url>/<prefix>/<owner>/images/<file>`.
pub fn artifact_url(base_url: &str, path_prefix: &str, owner: &PrincipalId, file_name: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let prefix = path_prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{base}/{}/{file_name}", owner_dir(owner))
    } else {
        format!("{base}/{prefix}/{}/{file_name}", owner_dir(owner))
    }
}
