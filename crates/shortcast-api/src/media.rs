//! Media URL resolution
//!
//! Artifacts live on the local filesystem; the API exposes everything under
//! the data root at `/media/...`. Paths outside the root get no URL.

use std::path::Path;

/// Map a local artifact path to its `/media/...` URL
pub fn media_url(data_root: &Path, local_path: &str) -> Option<String> {
    if local_path.is_empty() {
        return None;
    }
    let path = Path::new(local_path);
    // Canonical comparison when both sides exist, lexical otherwise
    let rel = match (path.canonicalize(), data_root.canonicalize()) {
        (Ok(path), Ok(root)) => path.strip_prefix(root).ok()?.to_path_buf(),
        _ => path.strip_prefix(data_root).ok()?.to_path_buf(),
    };

    let mut url = String::from("/media");
    for component in rel.components() {
        url.push('/');
        url.push_str(&component.as_os_str().to_string_lossy());
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_under_root_maps() {
        let url = media_url(Path::new("data"), "data/output/short_final.mp4");
        assert_eq!(url.as_deref(), Some("/media/output/short_final.mp4"));
    }

    #[test]
    fn test_path_outside_root_is_rejected() {
        assert!(media_url(Path::new("data"), "/etc/passwd").is_none());
        assert!(media_url(Path::new("data"), "elsewhere/file.mp4").is_none());
    }

    #[test]
    fn test_empty_path_is_rejected() {
        assert!(media_url(Path::new("data"), "").is_none());
    }

    #[test]
    fn test_canonicalized_paths_map() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("output");
        std::fs::create_dir_all(&out).unwrap();
        let file = out.join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();

        let url = media_url(dir.path(), &file.display().to_string());
        assert_eq!(url.as_deref(), Some("/media/output/clip.mp4"));
    }
}
