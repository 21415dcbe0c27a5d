use uuid::Uuid;

/// Reduce a client-supplied path to a bare file name inside the storage root.
///
/// Directory components are discarded, so `../../etc/passwd` becomes `passwd`.
/// Returns `None` when nothing usable is left (`""`, `"."`, `".."`, a bare
/// separator) or the name contains a NUL byte.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).find(|part| !part.is_empty())?;
    match base {
        "." | ".." => None,
        name if name.contains('\0') => None,
        name => Some(name.to_string()),
    }
}

/// Generate a random unique ID for connections
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a file size in human-readable form
pub fn format_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, units[unit_index])
    } else {
        format!("{:.2} {}", size, units[unit_index])
    }
}
