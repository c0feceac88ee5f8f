//! Before/after directory listings used to discover what a fetch produced.
//!
//! The fetch engine's own idea of its output filename is unreliable (it may
//! be reported before container negotiation settles), so the filesystem is
//! the source of truth.

use std::collections::BTreeSet;
use std::path::Path;

/// Names of the regular files directly inside `dir`.
///
/// A missing or unreadable directory yields an empty set.
pub fn snapshot(dir: &Path) -> BTreeSet<String> {
    let entries = match fs_err::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Snapshot of {} is empty: {}", dir.display(), e);
            return BTreeSet::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

/// Files present in `after` but not in `before`, in lexicographic order
pub fn diff(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<String> {
    after.difference(before).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_snapshot_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("b.mp4"), b"x").unwrap();
        fs_err::write(dir.path().join("a.mp3"), b"x").unwrap();
        fs_err::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(snapshot(dir.path()), set(&["a.mp3", "b.mp4"]));
    }

    #[test]
    fn test_snapshot_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(snapshot(&dir.path().join("does-not-exist")).is_empty());
    }

    #[test]
    fn test_diff_is_sorted_set_difference() {
        let before = set(&["old.mp4", "keep.mkv"]);
        let after = set(&["zeta.mp4", "old.mp4", "alpha.webm", "keep.mkv"]);
        assert_eq!(diff(&before, &after), vec!["alpha.webm", "zeta.mp4"]);
    }

    #[test]
    fn test_diff_independent_of_insertion_order() {
        let before = set(&["c", "a"]);
        let forward: BTreeSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let backward: BTreeSet<String> = ["d", "c", "b", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(diff(&before, &forward), diff(&before, &backward));
        assert_eq!(diff(&before, &forward), vec!["b", "d"]);
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let snap = set(&["x.mp4"]);
        assert!(diff(&snap, &snap).is_empty());
    }
}
