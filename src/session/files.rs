use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;

use crate::core::{WebSocketError, WebSocketResult};

/// A file handed in by the operator for sending over the connection.
#[derive(Debug, Clone, Default)]
pub struct FileUpload {
    pub name: String,
    pub data: Bytes,
    /// Extra top-level fields merged into the outgoing message.
    pub metadata: BTreeMap<String, sonic_rs::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: usize,
    pub mime_type: String,
    /// Lowercased, including the leading dot; empty when the name has none.
    pub extension: String,
}

#[derive(Serialize)]
struct FilePayload<'a> {
    name: &'a str,
    size: usize,
    #[serde(rename = "type")]
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct FileMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    file: FilePayload<'a>,
    #[serde(flatten)]
    metadata: BTreeMap<&'a str, &'a sonic_rs::Value>,
}

pub fn mime_type_for(extension: &str) -> &'static str {
    match extension.trim_start_matches('.') {
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

pub fn file_info(name: &str, size: usize) -> FileInfo {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    FileInfo {
        name: name.to_string(),
        size,
        mime_type: mime_type_for(&extension).to_string(),
        extension,
    }
}

/// Check the upload against `max_bytes` and build the structured file message.
///
/// Metadata keys `type` and `file` are reserved and dropped.
pub fn build_file_message(
    upload: &FileUpload,
    max_bytes: usize,
) -> WebSocketResult<(sonic_rs::Value, FileInfo)> {
    let size = upload.data.len();
    if size == 0 {
        return Err(WebSocketError::InvalidState(format!(
            "file {} is empty",
            upload.name
        )));
    }
    if size > max_bytes {
        return Err(WebSocketError::CapacityExceeded {
            size,
            max: max_bytes,
        });
    }

    let info = file_info(&upload.name, size);
    let message = FileMessage {
        kind: "file",
        file: FilePayload {
            name: &info.name,
            size,
            mime_type: &info.mime_type,
            data: STANDARD.encode(&upload.data),
        },
        metadata: upload
            .metadata
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "type" | "file"))
            .map(|(key, value)| (key.as_str(), value))
            .collect(),
    };
    let value = sonic_rs::to_value(&message)?;
    Ok((value, info))
}
