//! Path codec: hash prefixes and synthesized paths.
//!
//! Kodi treats two entries whose names share a long enough prefix as the
//! same entry ("Disc 1" vs "Disc 2" of a box set), so every listed name is
//! preceded by a short digest of the title's root name.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Characters of encoded digest kept in a prefix
pub const PREFIX_LEN: usize = 7;

/// Separator between the prefix and the root name
pub const PREFIX_SEPARATOR: char = '-';

/// Derive the 7-character prefix for a root name.
pub fn prefix_for(root_name: &str) -> String {
    let digest = Sha256::digest(root_name.as_bytes());
    let mut encoded = URL_SAFE.encode(digest);
    encoded.truncate(PREFIX_LEN);
    encoded
}

/// Split a name into root and extension; the extension keeps its dot.
///
/// Only a dot in the final path element counts, so `a.b/c` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind(['.', '/']) {
        Some(i) if name[i..].starts_with('.') => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// Externally visible name of an object: `<prefix>-<root><ext>`
pub fn media_path(object_name: &str) -> String {
    let (root, _) = split_extension(object_name);
    format!("{}{}{}", prefix_for(root), PREFIX_SEPARATOR, object_name)
}

/// Externally visible name of a title's NFO document: `<prefix>-<root>.nfo`
pub fn nfo_path(root_name: &str) -> String {
    format!("{}{}{}.nfo", prefix_for(root_name), PREFIX_SEPARATOR, root_name)
}

/// Remove the prefix from a synthesized key, checking it belongs to the name.
pub fn strip_prefix(key: &str) -> Option<&str> {
    let name = key
        .get(PREFIX_LEN..)?
        .strip_prefix(PREFIX_SEPARATOR)?;
    let (root, _) = split_extension(name);
    if key[..PREFIX_LEN] == prefix_for(root) {
        Some(name)
    } else {
        None
    }
}

/// What a request path refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Subdirectory label; empty for the top level
    pub subdir: String,
    /// Synthesized key within the subdirectory; empty when the path names the
    /// subdirectory itself
    pub key: String,
}

impl Resolution {
    pub fn is_directory(&self) -> bool {
        self.key.is_empty()
    }
}

/// Resolve a request path (without leading or trailing slashes) against the
/// known `(root name, subdir)` pairs.
///
/// Unknown paths resolve to themselves at the top level.
pub fn resolve_path<'a, I>(path: &str, titles: I) -> Resolution
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let (path_root, _) = split_extension(path);

    for (root_name, subdir) in titles {
        if !subdir.is_empty() && path == subdir {
            return Resolution { subdir: path.to_string(), key: String::new() };
        }

        let prefixed = format!("{}{}{}", prefix_for(root_name), PREFIX_SEPARATOR, root_name);
        if !subdir.is_empty() {
            if let Some(rest) = path_root.strip_prefix(subdir).and_then(|r| r.strip_prefix('/')) {
                if rest == prefixed {
                    let key = &path[subdir.len() + 1..];
                    return Resolution { subdir: subdir.to_string(), key: key.to_string() };
                }
            }
        }
        if path_root == prefixed {
            return Resolution { subdir: String::new(), key: path.to_string() };
        }
    }

    Resolution { subdir: String::new(), key: path.to_string() }
}
