//! MIME types for served configuration files.

/// Fallback for unknown or missing extensions.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// MIME type derived from the extension of `path` (case-insensitive).
pub fn from_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, extension)) = file_name.rsplit_once('.') else {
        return DEFAULT_MIME;
    };
    match extension.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "txt" | "properties" => "text/plain; charset=utf-8",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => DEFAULT_MIME,
    }
}
