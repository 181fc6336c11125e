//! Track catalogs.
//!
//! A catalog supplies the ordered track list the coordinator builds its playlist
//! from. [`DirectoryCatalog`] scans a folder of audio files; [`StaticCatalog`]
//! holds a fixed list.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use smartplayer_audio::decode;

/// A playlist entry: where the audio lives and what to show for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub locator: PathBuf,
    pub title: String,
}

/// One item reported by a catalog. `title` is `None` when the source has none.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub locator: PathBuf,
    pub title: Option<String>,
}

impl CatalogEntry {
    pub fn new(locator: impl Into<PathBuf>, title: Option<&str>) -> Self {
        Self {
            locator: locator.into(),
            title: title.map(str::to_string),
        }
    }
}

/// Source of the playlist, queried in catalog order.
pub trait TrackCatalog {
    fn ordered_tracks(&self) -> Result<Vec<CatalogEntry>>;
}

/// A fixed, in-memory catalog.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

impl TrackCatalog for StaticCatalog {
    fn ordered_tracks(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }
}

/// Audio files under a directory, scanned recursively.
///
/// Within a directory, files come first sorted case-insensitively by name, then
/// each subdirectory in the same order. Titles come from container tags and fall
/// back to the file stem.
#[derive(Clone, Debug)]
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TrackCatalog for DirectoryCatalog {
    fn ordered_tracks(&self) -> Result<Vec<CatalogEntry>> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("canonicalize library root {:?}", self.root))?;
        if !root.is_dir() {
            return Err(anyhow!("library root is not a directory: {:?}", root));
        }
        tracing::info!(root = %root.display(), "scanning library");
        let mut entries = Vec::new();
        scan_dir(&root, &root, &mut entries)?;
        tracing::info!(root = %root.display(), tracks = entries.len(), "library scan complete");
        Ok(entries)
    }
}

fn scan_dir(root: &Path, dir: &Path, out: &mut Vec<CatalogEntry>) -> Result<()> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let entry = entry.context("read_dir entry")?;
        let path = entry.path();
        let sort_key = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("")
            .to_lowercase();
        if path.is_dir() {
            dirs.push((sort_key, path));
        } else if path.is_file() && has_supported_extension(&path) {
            files.push((sort_key, path));
        }
    }

    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, path) in files {
        let title = read_title(&path);
        out.push(CatalogEntry {
            locator: path,
            title,
        });
    }

    for (_, path) in dirs {
        let canon = path
            .canonicalize()
            .with_context(|| format!("canonicalize {:?}", path))?;
        // Symlinks may point outside the library or back up the tree.
        if canon.starts_with(root) && canon != dir {
            scan_dir(root, &canon, out)?;
        }
    }
    Ok(())
}

fn read_title(path: &Path) -> Option<String> {
    match decode::read_track_tags(path) {
        Ok(tags) if tags.title.is_some() => tags.title,
        Ok(_) => file_stem(path),
        Err(e) => {
            tracing::debug!(path = ?path, "tag read failed: {e:#}");
            file_stem(path)
        }
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(OsStr::to_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn has_supported_extension(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    is_supported_extension(&ext)
}

fn is_supported_extension(ext: &str) -> bool {
    matches!(
        ext,
        "flac" | "wav" | "aiff" | "aif" | "mp3" | "m4a" | "aac" | "alac" | "ogg" | "oga"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "smartplayer-catalog-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn is_supported_extension_accepts_known() {
        assert!(is_supported_extension("flac"));
        assert!(is_supported_extension("mp3"));
        assert!(!is_supported_extension("txt"));
        assert!(!is_supported_extension(""));
    }

    #[test]
    fn static_catalog_preserves_order() {
        let catalog = StaticCatalog::new(vec![
            CatalogEntry::new("/music/b.mp3", Some("B")),
            CatalogEntry::new("/music/a.mp3", None),
        ]);
        let tracks = catalog.ordered_tracks().unwrap();
        assert_eq!(tracks[0].locator, PathBuf::from("/music/b.mp3"));
        assert_eq!(tracks[1].title, None);
    }

    #[test]
    fn directory_catalog_orders_files_before_subdirs() {
        let root = temp_root("order");
        let sub = root.join("Album");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(root.join("b song.mp3"), b"not audio").unwrap();
        std::fs::write(root.join("A Song.flac"), b"not audio").unwrap();
        std::fs::write(root.join("notes.txt"), b"skip").unwrap();
        std::fs::write(sub.join("c.wav"), b"not audio").unwrap();

        let entries = DirectoryCatalog::new(&root).ordered_tracks().unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["A Song", "b song", "c"]);
    }

    #[test]
    fn directory_catalog_rejects_missing_root() {
        let missing = std::env::temp_dir().join("smartplayer-catalog-missing-root");
        assert!(DirectoryCatalog::new(missing).ordered_tracks().is_err());
    }

    #[test]
    fn directory_catalog_may_be_empty() {
        let root = temp_root("empty");
        assert!(DirectoryCatalog::new(&root).ordered_tracks().unwrap().is_empty());
    }
}
