//! Object path construction for published entities

/// Default root under which volume groups are published
pub const DEFAULT_OBJECT_ROOT: &str = "/org/freedesktop/UDisks2/lvm";

/// Escape a name into a valid object path element.
///
/// `[A-Za-z0-9]` pass through, every other byte becomes `_xx`.
pub fn escape_path_element(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02x}", byte));
        }
    }
    escaped
}

/// Object path of a volume group
pub fn group_object_path(root: &str, group: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), escape_path_element(group))
}

/// Object path of a logical volume within a volume group
pub fn volume_object_path(root: &str, group: &str, volume: &str) -> String {
    format!(
        "{}/{}",
        group_object_path(root, group),
        escape_path_element(volume)
    )
}
