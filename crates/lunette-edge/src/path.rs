use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::{EdgeError, EdgeResult};

/// Document served for `/` and for directories.
pub const DEFAULT_INDEX: &str = "index.html";

/// A request target mapped onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    /// Raw target as received on the request line.
    pub request_path: String,
    /// Absolute path, always a descendant of the resolver's root.
    pub filesystem_path: PathBuf,
    /// Lowercase extension including the dot, empty when the file has none.
    pub extension: String,
}

/// Maps request targets to paths confined to a root directory.
pub trait PathResolver: Send + Sync {
    fn root(&self) -> &Path;

    fn resolve(&self, request_path: &str) -> EdgeResult<ResolvedRequest>;
}

#[derive(Debug, Clone)]
pub struct RootedPathResolver {
    root: PathBuf,
    index: String,
}

impl RootedPathResolver {
    pub fn new(root: impl Into<PathBuf>, index: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }
}

impl PathResolver for RootedPathResolver {
    fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, request_path: &str) -> EdgeResult<ResolvedRequest> {
        let invalid = || EdgeError::InvalidPath(request_path.to_string());

        let decoded = percent_decode_str(strip_query_and_fragment(request_path))
            .decode_utf8()
            .map_err(|_| invalid())?;
        if decoded.contains('\0') || decoded.contains('\\') {
            return Err(invalid());
        }

        let mut segments = normalize_segments(&decoded).ok_or_else(invalid)?;
        if segments.is_empty() {
            segments.push(self.index.as_str());
        }

        let mut relative = PathBuf::new();
        for segment in segments {
            relative.push(segment);
        }
        // Drive prefixes or a root smuggled inside a segment would let `join`
        // replace the root entirely.
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(invalid());
        }

        let filesystem_path = self.root.join(&relative);
        if !is_descendant(&filesystem_path, &self.root) {
            return Err(invalid());
        }

        let extension = extension_of(&filesystem_path);
        Ok(ResolvedRequest {
            request_path: request_path.to_string(),
            filesystem_path,
            extension,
        })
    }
}

/// Lowercase extension of `path` with a leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn strip_query_and_fragment(target: &str) -> &str {
    match target.find(['?', '#']) {
        Some(idx) => &target[..idx],
        None => target,
    }
}

/// Collapse `.`, `..` and empty segments. `None` when `..` climbs above the root.
fn normalize_segments(path: &str) -> Option<Vec<&str>> {
    let mut stack = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }
    Some(stack)
}

fn is_descendant(candidate: &Path, root: &Path) -> bool {
    candidate != root && candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> RootedPathResolver {
        RootedPathResolver::new("/srv/site", DEFAULT_INDEX)
    }

    #[test]
    fn root_and_empty_map_to_index() {
        let resolver = resolver();
        for target in ["/", "", "/?v=3", "/#camera", "/./"] {
            let resolved = resolver.resolve(target).expect("resolves");
            assert_eq!(
                resolved.filesystem_path,
                PathBuf::from("/srv/site/index.html"),
                "target {target:?}"
            );
            assert_eq!(resolved.extension, ".html");
        }
    }

    #[test]
    fn strips_query_and_fragment() {
        let resolved = resolver()
            .resolve("/models/a.glb?cache=1#frag")
            .expect("resolves");
        assert_eq!(
            resolved.filesystem_path,
            PathBuf::from("/srv/site/models/a.glb")
        );
        assert_eq!(resolved.extension, ".glb");
        assert_eq!(resolved.request_path, "/models/a.glb?cache=1#frag");
    }

    #[test]
    fn collapses_dot_segments_and_duplicate_separators() {
        let resolved = resolver()
            .resolve("//assets/./js/../css//main.css")
            .expect("resolves");
        assert_eq!(
            resolved.filesystem_path,
            PathBuf::from("/srv/site/assets/css/main.css")
        );
    }

    #[test]
    fn parent_segments_never_escape_root() {
        let resolver = resolver();
        for depth in 0..12 {
            for tail in ["etc/passwd", "", "site/index.html", "srv/site/x"] {
                let target = format!("/{}{}", "../".repeat(depth), tail);
                match resolver.resolve(&target) {
                    Ok(resolved) => {
                        assert!(resolved.filesystem_path.starts_with("/srv/site"));
                        assert_ne!(resolved.filesystem_path, PathBuf::from("/srv/site"));
                    }
                    Err(err) => assert!(matches!(err, EdgeError::InvalidPath(_))),
                }
            }
        }
    }

    #[test]
    fn rejects_traversal_above_root() {
        let err = resolver().resolve("/../../etc/passwd").unwrap_err();
        assert!(matches!(err, EdgeError::InvalidPath(_)));

        let err = resolver().resolve("/models/../../secret").unwrap_err();
        assert!(matches!(err, EdgeError::InvalidPath(_)));
    }

    #[test]
    fn rejects_encoded_traversal() {
        for target in ["/%2e%2e/%2e%2e/etc/passwd", "/..%2f..%2fetc/passwd", "/%2E%2E/x"] {
            let err = resolver().resolve(target).unwrap_err();
            assert!(matches!(err, EdgeError::InvalidPath(_)), "target {target:?}");
        }
    }

    #[test]
    fn rejects_backslashes_nul_and_bad_utf8() {
        for target in ["/..\\..\\windows", "/a%00.html", "/%FF"] {
            let err = resolver().resolve(target).unwrap_err();
            assert!(matches!(err, EdgeError::InvalidPath(_)), "target {target:?}");
        }
    }

    #[test]
    fn parent_segments_inside_root_are_allowed() {
        let resolved = resolver().resolve("/models/../index.html").expect("resolves");
        assert_eq!(
            resolved.filesystem_path,
            PathBuf::from("/srv/site/index.html")
        );
    }

    #[test]
    fn decodes_percent_escapes() {
        let resolved = resolver().resolve("/models/my%20glasses.GLB").expect("resolves");
        assert_eq!(
            resolved.filesystem_path,
            PathBuf::from("/srv/site/models/my glasses.GLB")
        );
        assert_eq!(resolved.extension, ".glb");
    }

    #[test]
    fn extension_is_empty_without_suffix() {
        assert_eq!(extension_of(Path::new("/srv/site/LICENSE")), "");
    }
}
