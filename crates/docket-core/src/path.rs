//! Blob path contract for session artifacts.
//!
//! Every artifact a session owns lives under its deterministic prefix:
//!
//! ```text
//! users/{userId}/sessions/{sessionId}/
//!   originals/{timestamp}_{uniqueToken}_{origName}
//!   pages/{timestamp}_{uniqueToken}_{origStem}_page_{N}.pdf
//!   processed/{newFileName}
//!   exports/session_{sessionId}_{timestamp}.zip
//! ```
//!
//! The splitter, post-processor, packager and lifecycle manager all build
//! paths through this module only; deleting the prefix deletes the session.

use std::fmt;

use jiff::Timestamp;
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the collision-guard token embedded in stored names.
const UNIQUE_TOKEN_LEN: usize = 6;

/// The deterministic path root all artifacts of one session live under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionPrefix {
    user_id: String,
    session_id: Uuid,
}

impl SessionPrefix {
    /// Creates the prefix for a user/session pair.
    pub fn new(user_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
        }
    }

    /// The session root, always with a trailing slash.
    pub fn root(&self) -> String {
        format!("users/{}/sessions/{}/", self.user_id, self.session_id)
    }

    /// Directory holding the uploaded originals.
    pub fn originals_dir(&self) -> String {
        format!("{}originals/", self.root())
    }

    /// Directory holding the single-page payloads.
    pub fn pages_dir(&self) -> String {
        format!("{}pages/", self.root())
    }

    /// Directory holding renamed output pages.
    pub fn processed_dir(&self) -> String {
        format!("{}processed/", self.root())
    }

    /// Directory holding built archives.
    pub fn exports_dir(&self) -> String {
        format!("{}exports/", self.root())
    }

    /// Path of an uploaded original.
    pub fn original_path(&self, stamp: &UploadStamp, orig_name: &str) -> String {
        format!(
            "{}{}_{}_{}",
            self.originals_dir(),
            stamp.timestamp_ms,
            stamp.token,
            sanitize_file_name(orig_name)
        )
    }

    /// Path of the single-page payload for 1-based page `n`.
    pub fn page_path(&self, stamp: &UploadStamp, orig_stem: &str, n: u32) -> String {
        format!(
            "{}{}_{}_{}_page_{}.pdf",
            self.pages_dir(),
            stamp.timestamp_ms,
            stamp.token,
            sanitize_file_name(orig_stem),
            n
        )
    }

    /// Path of a renamed output page.
    pub fn processed_path(&self, new_file_name: &str) -> String {
        format!("{}{}", self.processed_dir(), new_file_name)
    }

    /// Path of the session archive built at `at`.
    pub fn export_path(&self, at: Timestamp) -> String {
        format!(
            "{}session_{}_{}.zip",
            self.exports_dir(),
            self.session_id,
            at.as_millisecond()
        )
    }

    /// Owning user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Owning session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl fmt::Display for SessionPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root())
    }
}

/// Upload timestamp plus collision-guard token, shared between the
/// original and every page payload derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStamp {
    /// Unix milliseconds at upload time.
    pub timestamp_ms: i64,
    /// 6-character alphanumeric collision guard.
    pub token: String,
}

impl UploadStamp {
    /// Creates a stamp for the current instant with a fresh token.
    pub fn now() -> Self {
        Self::at(Timestamp::now())
    }

    /// Creates a stamp for a given instant with a fresh token.
    pub fn at(at: Timestamp) -> Self {
        Self {
            timestamp_ms: at.as_millisecond(),
            token: unique_token(),
        }
    }
}

/// Generates a 6-character alphanumeric collision guard.
pub fn unique_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), UNIQUE_TOKEN_LEN)
}

/// Strips path separators and control characters from a stored name.
///
/// Stored names are embedded verbatim into blob paths, so anything that
/// could escape the session prefix is replaced.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(['.', ' ']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Splits a file name into (stem, extension-with-dot).
///
/// Defaults to `.pdf` when the name has no extension.
pub fn split_extension(name: &str) -> (&str, String) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, format!(".{}", ext.to_ascii_lowercase()))
        }
        _ => (name, ".pdf".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix() -> SessionPrefix {
        SessionPrefix::new("u-1", Uuid::nil())
    }

    #[test]
    fn root_has_trailing_slash() {
        assert_eq!(
            prefix().root(),
            "users/u-1/sessions/00000000-0000-0000-0000-000000000000/"
        );
    }

    #[test]
    fn page_path_matches_contract() {
        let stamp = UploadStamp {
            timestamp_ms: 1700000000000,
            token: "a1B2c3".into(),
        };
        let path = prefix().page_path(&stamp, "ticket", 3);
        assert_eq!(
            path,
            "users/u-1/sessions/00000000-0000-0000-0000-000000000000/pages/1700000000000_a1B2c3_ticket_page_3.pdf"
        );
    }

    #[test]
    fn export_path_embeds_session_and_timestamp() {
        let at = Timestamp::from_millisecond(42).unwrap();
        let path = prefix().export_path(at);
        assert!(path.ends_with("exports/session_00000000-0000-0000-0000-000000000000_42.zip"));
    }

    #[test]
    fn tokens_are_six_alphanumerics() {
        for _ in 0..32 {
            let token = unique_token();
            assert_eq!(token.len(), 6);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_file_name("..."), "unnamed");
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn split_extension_defaults_to_pdf() {
        assert_eq!(split_extension("scan.PNG"), ("scan", ".png".to_string()));
        assert_eq!(split_extension("scan"), ("scan", ".pdf".to_string()));
        assert_eq!(split_extension(".hidden"), (".hidden", ".pdf".to_string()));
    }
}
