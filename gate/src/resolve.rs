//! Resolve which checks apply to a set of changed files.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::core::paths::ancestor_directories;
use crate::core::pattern::matches_anywhere_under;
use crate::core::rule::{CheckSet, Rule};
use crate::error::GateError;
use crate::io::manifest::ManifestSource;

/// Find all checks that apply to `changed_files`.
///
/// Every ancestor directory of a changed file (including the root) is asked
/// for a manifest. Each rule of a manifest found in directory `d` is matched
/// against every changed file relative to `d`. A malformed manifest fails the
/// whole resolution.
#[instrument(skip_all, fields(files = changed_files.len()))]
pub fn resolve_checks<M: ManifestSource + ?Sized>(
    changed_files: &[String],
    manifests: &M,
) -> Result<CheckSet, GateError> {
    let directories: BTreeSet<String> = changed_files
        .iter()
        .flat_map(|file| ancestor_directories(file))
        .collect();

    let mut pairs: BTreeSet<(Rule, String)> = BTreeSet::new();
    for dir in &directories {
        let Some(manifest) = manifests.load(dir)? else {
            continue;
        };
        debug!(dir = %dir, rules = manifest.rules.len(), "applying manifest");
        for rule in &manifest.rules {
            for file in changed_files {
                if matches_anywhere_under(dir, &rule.pattern, file) {
                    pairs.insert((rule.clone(), file.clone()));
                }
            }
        }
    }

    let checks = CheckSet::from_pairs(pairs);
    debug!(checks = checks.len(), "resolved checks");
    Ok(checks)
}
