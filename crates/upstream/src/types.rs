//! Wire types for the upstream content-listing API.

use serde::Deserialize;
use std::collections::HashMap;

/// Kind of a listed item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Dir,
    #[serde(other)]
    Unknown,
}

/// One item of a resource listing.
#[derive(Clone, Debug, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub path: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

/// Paginated listing of a resource's content.
///
/// The upstream answers 404 for unknown resources; the client maps that to
/// this type's default (empty) value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default)]
    pub count: u64,
}

/// A single named export of a listed item.
#[derive(Clone, Debug, Deserialize)]
pub struct ExportItem {
    pub url: String,
}

/// Export endpoints of a listed item, keyed by export name.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub export_items: HashMap<String, ExportItem>,
}

impl ExportResponse {
    /// The signed download URL, when the upstream offered one.
    pub fn download_url(&self) -> Option<&str> {
        self.export_items.get("download").map(|item| item.url.as_str())
    }
}

/// Error envelope the upstream returns on non-OK statuses.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An HTTP byte range: inclusive start, inclusive end, open-ended when the
/// end is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range covering `[start, end)` in exclusive-end terms.
    pub fn to_exclusive(start: u64, end_exclusive: u64) -> Self {
        Self {
            start,
            end: Some(end_exclusive.saturating_sub(1)),
        }
    }

    /// Open-ended range from `start` to the end of the object.
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// `Range` header value.
    pub fn to_header(self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_headers() {
        assert_eq!(ByteRange::to_exclusive(0, 512).to_header(), "bytes=0-511");
        assert_eq!(ByteRange::from_offset(1024).to_header(), "bytes=1024-");
    }

    #[test]
    fn list_item_parses_unknown_kinds() {
        let item: ListItem = serde_json::from_str(
            r#"{"id": "i1", "path": "/a", "size": 3, "type": "symlink"}"#,
        )
        .unwrap();
        assert_eq!(item.kind, ItemKind::Unknown);

        let item: ListItem =
            serde_json::from_str(r#"{"id": "i1", "path": "/a", "size": 3, "type": "file"}"#)
                .unwrap();
        assert_eq!(item.kind, ItemKind::File);
    }

    #[test]
    fn export_download_url() {
        let export: ExportResponse = serde_json::from_str(
            r#"{"export_items": {"download": {"url": "http://x/dl"}}}"#,
        )
        .unwrap();
        assert_eq!(export.download_url(), Some("http://x/dl"));
        assert_eq!(ExportResponse::default().download_url(), None);
    }
}
