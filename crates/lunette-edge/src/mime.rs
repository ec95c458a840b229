use std::path::Path;

use crate::path::extension_of;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Types generic guessers get wrong or do not know. Checked before `mime_guess`.
static OVERRIDES: &[(&str, &str)] = &[
    (".glb", "model/gltf-binary"),
    (".gltf", "model/gltf+json"),
    (".js", "application/javascript"),
    (".mjs", "application/javascript"),
    (".wasm", "application/wasm"),
    (".usdz", "model/vnd.usdz+zip"),
    (".ktx2", "image/ktx2"),
    (".bin", OCTET_STREAM),
];

/// Maps a path to the media type sent in `Content-Type`.
pub trait ContentTypeResolver: Send + Sync {
    /// Total: never empty, never fails.
    fn mime_type_for(&self, path: &Path) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct ContentTypeTable {
    overrides: &'static [(&'static str, &'static str)],
}

impl Default for ContentTypeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ContentTypeTable {
    pub const fn builtin() -> Self {
        Self {
            overrides: OVERRIDES,
        }
    }

    pub fn override_for(&self, extension: &str) -> Option<&'static str> {
        self.overrides
            .iter()
            .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
            .map(|(_, mime)| *mime)
    }
}

impl ContentTypeResolver for ContentTypeTable {
    fn mime_type_for(&self, path: &Path) -> String {
        let extension = extension_of(path);
        if let Some(mime) = self.override_for(&extension) {
            return mime.to_string();
        }
        let guessed = extension
            .strip_prefix('.')
            .and_then(|ext| mime_guess::from_ext(ext).first());
        match guessed {
            Some(mime) => mime.essence_str().to_string(),
            None => OCTET_STREAM.to_string(),
        }
    }
}
