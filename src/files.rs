//! Input file enumeration.
//!
//! Lists the files of one folder (non-recursive) matching the configured
//! extension, in a stable natural order: digit runs compare numerically,
//! everything else case-insensitively, so `img2.tif` sorts before
//! `img10.tif`.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BactquantError;

/// Lists matching files in `dir`, naturally sorted by file name.
///
/// A file matches when its name ends with `.<extension>`, compared case
/// insensitively, so multi-part extensions like `ome.tif` work. A leading
/// dot in `extension` is tolerated. Non-matching entries and
/// subdirectories are skipped silently. An empty result is not an error.
pub fn list_image_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, BactquantError> {
    if !dir.is_dir() {
        return Err(BactquantError::Config(format!(
            "input folder {} does not exist or is not a directory",
            dir.display()
        )));
    }
    let wanted = extension.trim().trim_start_matches('.');

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| matches_extension(name, wanted))
        })
        .collect();

    files.sort_by(|a, b| natural_cmp(&name_of(a), &name_of(b)));
    Ok(files)
}

/// True when `name` ends with `.<wanted>`, case-insensitively, and has at
/// least one character of stem before the dot.
fn matches_extension(name: &str, wanted: &str) -> bool {
    let name = name.to_lowercase();
    let suffix = format!(".{}", wanted.to_lowercase());
    name.len() > suffix.len() && name.ends_with(&suffix)
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compares two names alphanumerically: runs of digits compare as numbers,
/// other runs compare case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a).into_iter();
    let mut right = chunks(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => match l.cmp(&r) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    // Number before Text so "2" sorts before "a" like plain byte order.
    Number(u128),
    Text(String),
}

fn chunks(s: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut digits = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() == digits {
            buf.push(ch);
        } else {
            push_chunk(&mut out, &buf, digits);
            buf.clear();
            buf.push(ch);
            digits = ch.is_ascii_digit();
        }
    }
    push_chunk(&mut out, &buf, digits);
    out
}

fn push_chunk(out: &mut Vec<Chunk>, buf: &str, digits: bool) {
    if buf.is_empty() {
        return;
    }
    if digits {
        // Saturate absurdly long digit runs instead of failing.
        let n = buf.parse::<u128>().unwrap_or(u128::MAX);
        out.push(Chunk::Number(n));
    } else {
        out.push(Chunk::Text(buf.to_lowercase()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn numbers_sort_numerically() {
        let mut names = vec!["img10.tif", "img2.tif", "img1.tif"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["img1.tif", "img2.tif", "img10.tif"]);
    }

    #[test]
    fn text_sorts_case_insensitively() {
        assert_eq!(natural_cmp("Plate_A", "plate_a"), Ordering::Equal);
        assert_eq!(natural_cmp("alpha", "Beta"), Ordering::Less);
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        assert_eq!(natural_cmp("well1", "well1b"), Ordering::Less);
    }

    #[test]
    fn listing_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b10.tif", "b2.TIF", "a.tif", "x.ome.tif", "notes.txt", "c.tiff"] {
            File::create(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.tif")).unwrap();

        let files = list_image_files(dir.path(), "tif").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tif", "b2.TIF", "b10.tif", "x.ome.tif"]);
    }

    #[test]
    fn multi_part_extensions_match_as_name_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.ome.tif", "b.tif"] {
            File::create(dir.path().join(name)).unwrap();
        }

        let files = list_image_files(dir.path(), "ome.tif").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.ome.tif"]);
    }

    #[test]
    fn extension_must_follow_a_dot_and_a_stem() {
        assert!(matches_extension("stack.tif", "tif"));
        assert!(matches_extension("stack.OME.TIF", "ome.tif"));
        assert!(!matches_extension("stack.tiff", "tif"));
        assert!(!matches_extension("stacktif", "tif"));
        assert!(!matches_extension(".tif", "tif"));
    }

    #[test]
    fn listing_accepts_dotted_extension() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("x.tif")).unwrap();
        let files = list_image_files(dir.path(), ".tif").unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_folder_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_image_files(dir.path(), "tif").unwrap().is_empty());
    }

    #[test]
    fn missing_folder_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(
            list_image_files(&missing, "tif"),
            Err(BactquantError::Config(_))
        ));
    }
}
