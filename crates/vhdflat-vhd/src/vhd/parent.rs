//! Parent resolution for differencing disks
//!
//! Candidate paths come from the W2ru and W2ku locators and the Unicode
//! parent name, in that order. The first candidate whose footer carries the
//! expected unique ID wins.

use super::footer::VhdFooter;
use super::header::{VhdDynamicHeader, PLATFORM_W2KU, PLATFORM_W2RU};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use vhdflat_core::{AttemptOutcome, Error, ParentAttempt, Result};
use vhdflat_pipeline::read_exact_at;

/// Replace Windows separators so locator paths resolve on any host
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Candidate parent paths for the child at `child`, in resolution order
pub fn candidate_paths(child: &Path, header: &VhdDynamicHeader) -> Vec<PathBuf> {
    let dir = child.parent().unwrap_or_else(|| Path::new(""));
    let mut candidates: Vec<PathBuf> = Vec::new();

    let relative = header
        .locator_texts(PLATFORM_W2RU)
        .map(|text| dir.join(normalize_separators(text)));
    let absolute = header
        .locator_texts(PLATFORM_W2KU)
        .map(|text| PathBuf::from(normalize_separators(text)));

    let mut named = Vec::new();
    if !header.parent_unicode_name.is_empty() {
        let name = PathBuf::from(normalize_separators(&header.parent_unicode_name));
        let basename = name.file_name().map(|base| dir.join(base));
        named.push(name);
        named.extend(basename);
    }

    for path in relative.chain(absolute).chain(named) {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    candidates
}

/// Read just enough of `path` to learn its unique ID
fn peek_unique_id(path: &Path) -> std::result::Result<Uuid, AttemptOutcome> {
    if !path.is_file() {
        return Err(AttemptOutcome::Missing);
    }

    let peek = || -> Result<Uuid> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < VhdFooter::SIZE as u64 {
            return Err(Error::format("File too small to be a VHD"));
        }
        let mut raw = [0u8; VhdFooter::SIZE];
        read_exact_at(&file, len - VhdFooter::SIZE as u64, &mut raw, "footer")?;
        Ok(VhdFooter::parse(&raw)?.unique_id)
    };

    peek().map_err(|e| AttemptOutcome::Unreadable(e.to_string()))
}

/// Find the parent of the differencing disk at `child`
///
/// Returns the accepted candidate and every attempt made on the way, the
/// last one being the accepted candidate. Opening the parent is left to the
/// caller, and its errors are not retried with later candidates.
pub(crate) fn resolve_parent(
    child: &Path,
    header: &VhdDynamicHeader,
) -> Result<(PathBuf, Vec<ParentAttempt>)> {
    let expected = header.parent_unique_id;
    let mut attempts = Vec::new();

    for candidate in candidate_paths(child, header) {
        let outcome = match peek_unique_id(&candidate) {
            Ok(found) if found == expected => AttemptOutcome::Accepted,
            Ok(found) => AttemptOutcome::UuidMismatch(found),
            Err(outcome) => outcome,
        };
        debug!(
            child = %child.display(),
            candidate = %candidate.display(),
            ?outcome,
            "parent candidate"
        );

        let accepted = outcome == AttemptOutcome::Accepted;
        attempts.push(ParentAttempt::new(&candidate, outcome));
        if accepted {
            return Ok((candidate, attempts));
        }
    }

    Err(Error::ParentNotFound {
        child: child.to_path_buf(),
        attempts,
    })
}
