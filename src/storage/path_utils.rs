//! Path classification and backend-agnostic path utilities
//!
//! A path string is either a local OS path or a remote device path of the
//! form `remote:\<device name>\<device path>`. Nothing outside this module
//! should parse that convention; everything goes through [`classify`].

use std::path::{Path, PathBuf};

use crate::device::{DeviceInfo, DEVICE_SEPARATOR};

/// Reserved prefix marking a remote device path
pub const REMOTE_PREFIX: &str = "remote:\\";

const REMOTE_SCHEME: &str = "remote:";

/// Characters illegal in a file name on either backend
/// (Windows/NTFS rules, which device firmware generally enforces too)
const ILLEGAL_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A classified path. Re-derived from the string on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoragePath {
    Local(PathBuf),
    Remote {
        /// Device name as typed (matched case-insensitively by the registry)
        device: String,
        /// Device-relative path, `\`-separated, no leading separator; empty is the root
        path: String,
    },
}

impl StoragePath {
    pub fn is_remote(&self) -> bool {
        matches!(self, StoragePath::Remote { .. })
    }
}

/// Build a `remote:\Device\path` string
pub fn remote_path_string(device: &str, device_path: &str) -> String {
    let segments = device_segments(device_path);
    if segments.is_empty() {
        format!("{}{}", REMOTE_PREFIX, device)
    } else {
        format!(
            "{}{}{}{}",
            REMOTE_PREFIX,
            device,
            DEVICE_SEPARATOR,
            segments.join(&DEVICE_SEPARATOR.to_string())
        )
    }
}

fn device_segments(path: &str) -> Vec<&str> {
    crate::device::driver::device_segments(path)
}

/// Strip the reserved prefix, accepting either separator after the scheme
fn strip_remote_prefix(path: &str) -> Option<&str> {
    let head = path.get(..REMOTE_SCHEME.len())?;
    if !head.eq_ignore_ascii_case(REMOTE_SCHEME) {
        return None;
    }
    let rest = &path[REMOTE_SCHEME.len()..];
    rest.strip_prefix('\\').or_else(|| rest.strip_prefix('/'))
}

/// Classify a path string as local or remote
pub fn classify(path: &str) -> StoragePath {
    match strip_remote_prefix(path) {
        Some(rest) => {
            let rest = rest.trim_start_matches(['\\', '/']);
            let (device, device_path) = match rest.find(['\\', '/']) {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            StoragePath::Remote {
                device: device.to_string(),
                path: device_segments(device_path).join(&DEVICE_SEPARATOR.to_string()),
            }
        }
        None => StoragePath::Local(PathBuf::from(path)),
    }
}

/// Whether a path string uses the remote convention
pub fn is_remote(path: &str) -> bool {
    strip_remote_prefix(path).is_some()
}

/// Rewrite a user-typed path to remote form when its first segment names a
/// visible device. Returns `None` when no device matches.
pub fn resolve_candidate(candidate: &str, devices: &[DeviceInfo]) -> Option<String> {
    if is_remote(candidate) {
        return None;
    }
    let trimmed = candidate.trim_start_matches(['\\', '/']);
    let (first, rest) = match trimmed.find(['\\', '/']) {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => (trimmed, ""),
    };
    if first.is_empty() {
        return None;
    }
    devices
        .iter()
        .find(|d| d.friendly_name.eq_ignore_ascii_case(first))
        .map(|d| remote_path_string(&d.friendly_name, rest))
}

/// Join path segments, using device rules when the base is remote
pub fn combine_path(base: &str, segments: &[&str]) -> String {
    match classify(base) {
        StoragePath::Remote { device, path } => {
            let mut joined = path;
            for segment in segments {
                for part in device_segments(segment) {
                    joined = join_device_path(&joined, part);
                }
            }
            remote_path_string(&device, &joined)
        }
        StoragePath::Local(mut path) => {
            for segment in segments {
                path.push(segment);
            }
            path.to_string_lossy().to_string()
        }
    }
}

/// Join device path components using `\`
pub fn join_device_path(base: &str, component: &str) -> String {
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with(DEVICE_SEPARATOR) {
        format!("{}{}", base, component)
    } else {
        format!("{}{}{}", base, DEVICE_SEPARATOR, component)
    }
}

/// Check if a local path is absolute (cross-platform).
///
/// Handles Unix paths, Windows drive letters and UNC paths regardless of
/// the host OS.
pub fn is_absolute_local_path(path: &str) -> bool {
    if Path::new(path).is_absolute() || path.starts_with('/') {
        return true;
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return true;
    }

    path.starts_with("\\\\") || path.starts_with("//")
}

/// Last segment of a path, on either backend
pub fn file_name(path: &str) -> String {
    let body = strip_remote_prefix(path).unwrap_or(path);
    body.rsplit(['\\', '/'])
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Extension of the last segment without the dot, if any
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_string()),
        Some(_) => None,
    }
}

/// Last segment without its extension
pub fn file_stem(path: &str) -> String {
    let name = file_name(path);
    match extension(&name) {
        Some(ext) => name[..name.len() - ext.len() - 1].to_string(),
        None => name,
    }
}

/// Remove every character illegal on either backend.
///
/// Trailing dots and spaces (rejected by Windows and most device firmware)
/// are trimmed unless that would leave nothing.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !ILLEGAL_NAME_CHARS.contains(c))
        .collect();

    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        cleaned
    } else {
        trimmed.to_string()
    }
}

/// Parent folder of a path in the same convention
pub fn parent_path(path: &str) -> Option<String> {
    match classify(path) {
        StoragePath::Remote { device, path } => {
            if path.is_empty() {
                return None;
            }
            Some(remote_path_string(
                &device,
                &crate::device::driver::device_parent(&path),
            ))
        }
        StoragePath::Local(path) => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_remote() {
        assert_eq!(
            classify("remote:\\Pixel 7\\Games\\snes"),
            StoragePath::Remote {
                device: "Pixel 7".to_string(),
                path: "Games\\snes".to_string()
            }
        );
        assert_eq!(
            classify("REMOTE:/Pixel 7/Games/snes/"),
            StoragePath::Remote {
                device: "Pixel 7".to_string(),
                path: "Games\\snes".to_string()
            }
        );
    }

    #[test]
    fn test_classify_device_root() {
        assert_eq!(
            classify("remote:\\Pixel 7"),
            StoragePath::Remote {
                device: "Pixel 7".to_string(),
                path: String::new()
            }
        );
    }

    #[test]
    fn test_classify_local() {
        assert!(!classify("/home/user/roms").is_remote());
        assert!(!classify("C:\\Games").is_remote());
        assert!(!classify("remote-backup/file").is_remote());
        assert!(!is_remote("remote:"));
    }

    #[test]
    fn test_combine_round_trips_classification() {
        let bases = [
            "remote:\\DeviceA",
            "remote:\\DeviceA\\Games",
            "remote:/DeviceB/x/",
            "/home/user",
            "relative/dir",
            "C:\\Media",
        ];
        let segments = ["snes", "Super Metroid", "boxart.png"];

        for base in bases {
            let combined = combine_path(base, &segments);
            match (classify(base), classify(&combined)) {
                (
                    StoragePath::Remote { device: a, .. },
                    StoragePath::Remote { device: b, .. },
                ) => assert_eq!(a, b, "device changed for {}", base),
                (StoragePath::Local(_), StoragePath::Local(_)) => {}
                (before, after) => panic!("backend changed: {:?} -> {:?}", before, after),
            }
        }
    }

    #[test]
    fn test_combine_remote_uses_device_separator() {
        assert_eq!(
            combine_path("remote:\\DeviceA\\Games", &["snes/sub", "a.png"]),
            "remote:\\DeviceA\\Games\\snes\\sub\\a.png"
        );
        assert_eq!(
            combine_path("remote:\\DeviceA", &["a.png"]),
            "remote:\\DeviceA\\a.png"
        );
    }

    #[test]
    fn test_resolve_candidate() {
        let devices = vec![DeviceInfo {
            id: "1".to_string(),
            friendly_name: "Retroid Pocket".to_string(),
            description: "RP5".to_string(),
        }];
        assert_eq!(
            resolve_candidate("retroid pocket\\Games\\psx", &devices).as_deref(),
            Some("remote:\\Retroid Pocket\\Games\\psx")
        );
        assert_eq!(resolve_candidate("/home/user/Games", &devices), None);
        assert_eq!(resolve_candidate("remote:\\Retroid Pocket", &devices), None);
        assert_eq!(resolve_candidate("", &devices), None);
    }

    #[test]
    fn test_file_name_and_extension() {
        assert_eq!(file_name("remote:\\DeviceA\\Games\\box.PNG"), "box.PNG");
        assert_eq!(file_name("/tmp/x/video.mp4"), "video.mp4");
        assert_eq!(file_name("C:\\dir\\"), "dir");
        assert_eq!(extension("/tmp/x/video.mp4").as_deref(), Some("mp4"));
        assert_eq!(extension("/tmp/.hidden"), None);
        assert_eq!(extension("/tmp/noext"), None);
        assert_eq!(extension("/tmp/trailing."), None);
        assert_eq!(file_stem("remote:\\D\\a.b.png"), "a.b");
    }

    #[test]
    fn test_sanitize_file_name() {
        let sanitized = sanitize_file_name("a:b*c?.png");
        assert_eq!(sanitized, "abc.png");
        assert!(!sanitized.chars().any(|c| ILLEGAL_NAME_CHARS.contains(&c)));

        assert_eq!(
            sanitize_file_name("Zelda: Link's Awakening <DX>"),
            "Zelda Link's Awakening DX"
        );
        assert_eq!(sanitize_file_name("name. "), "name");
        assert_eq!(sanitize_file_name("..."), "...");
        assert_eq!(sanitize_file_name("\u{7}tab\tname"), "tabname");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(
            parent_path("remote:\\DeviceA\\Games\\a.png").as_deref(),
            Some("remote:\\DeviceA\\Games")
        );
        assert_eq!(
            parent_path("remote:\\DeviceA\\a.png").as_deref(),
            Some("remote:\\DeviceA")
        );
        assert_eq!(parent_path("remote:\\DeviceA"), None);
        assert_eq!(parent_path("/tmp/a.png").as_deref(), Some("/tmp"));
    }

    #[test]
    fn test_is_absolute_local_path() {
        assert!(is_absolute_local_path("/home/user"));
        assert!(is_absolute_local_path("C:\\Users"));
        assert!(is_absolute_local_path("d:/data"));
        assert!(is_absolute_local_path("\\\\server\\share"));
        assert!(!is_absolute_local_path("relative/path"));
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_device_path("", "Games"), "Games");
        assert_eq!(join_device_path("Games", "snes"), "Games\\snes");
    }
}
