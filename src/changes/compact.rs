//! Compaction of raw stream changes into the canonical change set.
//!
//! Records are grouped by path and four passes run over each group, in
//! order:
//!
//! 1. add followed by delete is a no-op (modifies in between go with it)
//! 2. delete followed by add is a single modify
//! 3. a run of modifies is one modify
//! 4. add followed by modifies is just the add
//!
//! Per path a send stream only produces `Add, Modify*, Delete?` or
//! `Delete, Modify*, Add?` (repeated). Anything else means a corrupt stream
//! and fails the whole normalization.
//!
//! Survivors are emitted in the stream position of the surviving record.

use crate::changes::{Change, ChangeKind};
use crate::error::{DiffError, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Index in the raw change list.
    pos: usize,
    kind: ChangeKind,
}

pub fn normalize(changes: Vec<Change>) -> Result<Vec<Change>> {
    let raw_len = changes.len();

    // Groups in first-occurrence order so errors are reported deterministically.
    // Keyed on the raw name bytes: `Path` equality would fold `a/` into `a`.
    let mut index: HashMap<OsString, usize> = HashMap::new();
    let mut groups: Vec<(PathBuf, Vec<Entry>)> = Vec::new();

    for (pos, change) in changes.into_iter().enumerate() {
        let entry = Entry {
            pos,
            kind: change.kind,
        };
        match index.get(change.path.as_os_str()) {
            Some(&g) => groups[g].1.push(entry),
            None => {
                index.insert(change.path.clone().into_os_string(), groups.len());
                groups.push((change.path, vec![entry]));
            }
        }
    }
    drop(index);

    let mut survivors: Vec<(usize, Change)> = Vec::with_capacity(groups.len());
    for (path, mut entries) in groups {
        compact(&path, &mut entries)?;
        debug_assert!(entries.len() <= 1, "{:?} left {} entries", path, entries.len());
        if let Some(entry) = entries.pop() {
            survivors.push((entry.pos, Change::new(path, entry.kind)));
        }
    }
    survivors.sort_unstable_by_key(|(pos, _)| *pos);

    debug!(raw = raw_len, normalized = survivors.len(), "normalized changes");
    Ok(survivors.into_iter().map(|(_, change)| change).collect())
}

fn compact(path: &Path, entries: &mut Vec<Entry>) -> Result<()> {
    elide_add_delete(path, entries)?;
    fold_delete_add(path, entries)?;
    fold_trailing_modifies(path, entries, ChangeKind::Modify)?;
    fold_trailing_modifies(path, entries, ChangeKind::Add)?;
    Ok(())
}

fn elide_add_delete(path: &Path, entries: &mut Vec<Entry>) -> Result<()> {
    let mut i = 0;
    while i < entries.len() {
        if entries[i].kind != ChangeKind::Add {
            i += 1;
            continue;
        }

        let mut delete_at = None;
        for (j, entry) in entries.iter().enumerate().skip(i + 1) {
            match entry.kind {
                ChangeKind::Modify => {}
                ChangeKind::Add => return Err(DiffError::sequence(path, "unexpected add")),
                ChangeKind::Delete => {
                    delete_at = Some(j);
                    break;
                }
            }
        }

        match delete_at {
            Some(j) => {
                entries.drain(i..=j);
            }
            None => i += 1,
        }
    }
    Ok(())
}

fn fold_delete_add(path: &Path, entries: &mut Vec<Entry>) -> Result<()> {
    let mut i = 0;
    while i < entries.len() {
        if entries[i].kind != ChangeKind::Delete {
            i += 1;
            continue;
        }

        let mut add_at = None;
        for (j, entry) in entries.iter().enumerate().skip(i + 1) {
            match entry.kind {
                ChangeKind::Modify => {}
                ChangeKind::Delete => {
                    return Err(DiffError::sequence(path, "unexpected delete"))
                }
                ChangeKind::Add => {
                    add_at = Some(j);
                    break;
                }
            }
        }

        match add_at {
            Some(j) => {
                entries[i].kind = ChangeKind::Modify;
                entries.drain(i + 1..=j);
            }
            // Only modifies follow; the path is gone at the end of the stream.
            None => entries.truncate(i + 1),
        }
        i += 1;
    }
    Ok(())
}

/// Keep the first `lead` entry and drop the modifies after it. Anything
/// other than a modify after the lead entry is an error.
fn fold_trailing_modifies(path: &Path, entries: &mut Vec<Entry>, lead: ChangeKind) -> Result<()> {
    let Some(i) = entries.iter().position(|e| e.kind == lead) else {
        return Ok(());
    };

    if entries[i + 1..].iter().any(|e| e.kind != ChangeKind::Modify) {
        let reason = match lead {
            ChangeKind::Add => "unexpected add/delete after add",
            _ => "unexpected add/delete after modify",
        };
        return Err(DiffError::sequence(path, reason));
    }
    entries.truncate(i + 1);
    Ok(())
}
