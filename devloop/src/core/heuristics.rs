//! Cheap string heuristics that settle a dependency question without the oracle.

use crate::core::types::PackageManager;

/// Error names that always point at the code itself.
const CODE_ERROR_MARKERS: [&str; 3] = ["AttributeError", "NameError", "AssertionError"];

/// Signatures of a language package that was never installed.
const MODULE_NOT_FOUND_MARKERS: [&str; 3] =
    ["ModuleNotFoundError", "No module named", "ImportError"];

/// Signatures of a missing shared library. These surface as import failures
/// but are fixed with OS packages.
const SHARED_LIBRARY_MARKERS: [&str; 2] = [
    "cannot open shared object file",
    "error while loading shared libraries",
];

/// Settle "is this a `manager` installation failure?" from `text` alone.
///
/// Returns `None` when the heuristics cannot decide and the oracle must be
/// asked. Code-error names win over every other signature.
pub fn dependency_verdict(text: &str, manager: PackageManager) -> Option<bool> {
    if contains_any(text, &CODE_ERROR_MARKERS) {
        return Some(false);
    }
    let shared_library = contains_any(text, &SHARED_LIBRARY_MARKERS);
    let module_missing = contains_any(text, &MODULE_NOT_FOUND_MARKERS);
    match manager {
        PackageManager::Os if shared_library => Some(true),
        PackageManager::Os if module_missing => Some(false),
        PackageManager::Language if shared_library => Some(false),
        PackageManager::Language if module_missing => Some(true),
        _ => None,
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| text.contains(marker))
}
