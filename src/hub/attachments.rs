//! Binds export-declared attachment names to files actually on disk.
//!
//! Exports keep files of deleted messages while dropping their metadata, so
//! there can be more `name(k).ext` files than references. Surplus files are
//! attributed to the oldest end: with `n` candidates and `r` references the
//! i-th reference binds to candidate `n - r + i`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Split `name` into stem and extension (extension keeps its dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(dot) => (&name[..dot], &name[dot..]),
    }
}

/// `photo(3).jpg` -> (`photo.jpg`, 3); `photo.jpg` -> (`photo.jpg`, 0).
fn logical_name(file_name: &str) -> (String, u32) {
    let (stem, ext) = split_extension(file_name);
    if let Some(inner) = stem.strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            let digits = &inner[open + 1..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(k) = digits.parse::<u32>() {
                    return (format!("{}{}", &inner[..open], ext), k);
                }
            }
        }
    }
    (file_name.to_string(), 0)
}

fn sanitized(name: &str) -> String {
    name.replace('?', "_")
}

/// Disk files grouped by logical name, each group ordered by suffix index.
#[derive(Debug, Clone, Default)]
pub struct DiskCandidates {
    by_logical: BTreeMap<String, Vec<(u32, String)>>,
}

impl DiskCandidates {
    pub fn from_names(names: impl IntoIterator<Item = String>) -> Self {
        let mut by_logical: BTreeMap<String, Vec<(u32, String)>> = BTreeMap::new();
        for name in names {
            let (logical, k) = logical_name(&name);
            by_logical.entry(logical).or_default().push((k, name));
        }
        for group in by_logical.values_mut() {
            group.sort();
        }
        Self { by_logical }
    }

    /// Regular files directly inside `dir`, minus those `skip` rejects.
    pub fn scan_dir(dir: &Path, skip: impl Fn(&str) -> bool) -> io::Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !skip(&name) {
                names.push(name);
            }
        }
        Ok(Self::from_names(names))
    }

    fn candidates_for(&self, reference: &str) -> &[(u32, String)] {
        if let Some(found) = self.by_logical.get(reference) {
            return found;
        }
        if reference.contains('?') {
            if let Some(found) = self.by_logical.get(&sanitized(reference)) {
                return found;
            }
        }
        &[]
    }
}

/// Resolve every reference, in encounter order, to a file name. Output has
/// the same length and order as `references`.
pub fn reconcile(disk: &DiskCandidates, references: &[String]) -> Vec<String> {
    let mut positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (pos, reference) in references.iter().enumerate() {
        positions.entry(reference.as_str()).or_default().push(pos);
    }

    let mut resolved = references.to_vec();
    for (reference, slots) in positions {
        let candidates = disk.candidates_for(reference);
        let offset = candidates.len().saturating_sub(slots.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let disk_idx = offset + i;
            resolved[slot] = match candidates.get(disk_idx) {
                Some((_, file_name)) => file_name.clone(),
                None => synthesize(reference, disk_idx),
            };
        }
    }
    resolved
}

fn synthesize(reference: &str, disk_idx: usize) -> String {
    if disk_idx > 0 {
        let (stem, ext) = split_extension(reference);
        return format!("{stem}({disk_idx}){ext}");
    }
    if reference.contains('?') {
        return sanitized(reference);
    }
    reference.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn surplus_files_are_attributed_to_oldest_end() {
        let disk = DiskCandidates::from_names(names(&["a.jpg", "a(1).jpg", "a(2).jpg", "a(3).jpg"]));
        let got = reconcile(&disk, &names(&["a.jpg", "a.jpg"]));
        assert_eq!(got, names(&["a(2).jpg", "a(3).jpg"]));
    }

    #[test]
    fn candidates_sort_numerically_not_lexically() {
        let disk = DiskCandidates::from_names(names(&["a(10).png", "a(2).png", "a.png"]));
        let got = reconcile(&disk, &names(&["a.png", "a.png", "a.png"]));
        assert_eq!(got, names(&["a.png", "a(2).png", "a(10).png"]));
    }

    #[test]
    fn references_keep_their_positions_across_names() {
        let disk = DiskCandidates::from_names(names(&["x.pdf", "y.pdf", "y(1).pdf"]));
        let got = reconcile(&disk, &names(&["y.pdf", "x.pdf", "y.pdf"]));
        assert_eq!(got, names(&["y.pdf", "x.pdf", "y(1).pdf"]));
    }

    #[test]
    fn missing_candidates_synthesize_suffixed_names() {
        let disk = DiskCandidates::from_names(names(&["b.txt"]));
        let got = reconcile(&disk, &names(&["b.txt", "b.txt", "b.txt"]));
        assert_eq!(got, names(&["b.txt", "b(1).txt", "b(2).txt"]));
    }

    #[test]
    fn question_marks_fall_back_to_sanitized_name() {
        let disk = DiskCandidates::from_names(names(&["what_.jpg"]));
        assert_eq!(reconcile(&disk, &names(&["what?.jpg"])), names(&["what_.jpg"]));

        let empty = DiskCandidates::default();
        assert_eq!(reconcile(&empty, &names(&["why?.gif"])), names(&["why_.gif"]));
    }

    #[test]
    fn reconciliation_is_reproducible() {
        let disk = DiskCandidates::from_names(names(&["a(3).jpg", "a.jpg", "a(1).jpg"]));
        let refs = names(&["a.jpg", "a.jpg"]);
        assert_eq!(reconcile(&disk, &refs), reconcile(&disk, &refs));
    }

    #[test]
    fn logical_name_ignores_non_numeric_parentheses() {
        assert_eq!(logical_name("notes (draft).txt"), ("notes (draft).txt".to_string(), 0));
        assert_eq!(logical_name("clip(4)"), ("clip".to_string(), 4));
    }
}
