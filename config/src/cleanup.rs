//! Cleanup passes over a namespace's documents
//!
//! Each pass only touches what it changes: documents it leaves alone are
//! not marked as modified. [`Cleanup::ALL`] lists the passes in the order
//! they should run, so that dropping happens before sorting.

use crate::loader::TokenType;
use crate::mangle::Resolver;
use crate::matcher::{is_wildcard_flag, is_wildcard_package};
use crate::metadata::{PackageMetadata, SpecParts};
use crate::package_file::{Document, FlagSlot};
use std::collections::HashSet;
use tracing::debug;

/// A cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cleanup {
    /// Delete entries for packages missing from the repository
    DropUnmatchedPackages,
    /// Delete flags the package does not know
    DropUnmatchedFlags,
    /// Delete flags overridden by a later declaration for the same package
    DropIneffective,
    /// Sort entries by package
    SortEntries,
    /// Sort flags by name
    SortFlags,
}

impl Cleanup {
    /// All passes, in application order
    pub const ALL: [Cleanup; 5] = [
        Cleanup::DropUnmatchedPackages,
        Cleanup::DropUnmatchedFlags,
        Cleanup::DropIneffective,
        Cleanup::SortEntries,
        Cleanup::SortFlags,
    ];
}

impl Resolver {
    /// Run one cleanup pass, returning the number of changes
    pub fn cleanup(
        &self,
        documents: &mut [Document],
        token_type: TokenType,
        metadata: &dyn PackageMetadata,
        pass: Cleanup,
    ) -> usize {
        let changes = match pass {
            Cleanup::DropUnmatchedPackages => self.drop_unmatched_packages(documents, metadata),
            Cleanup::DropUnmatchedFlags => {
                self.drop_unmatched_flags(documents, token_type, metadata)
            }
            Cleanup::DropIneffective => self.drop_ineffective(documents),
            Cleanup::SortEntries => self.sort_entries(documents),
            Cleanup::SortFlags => self.sort_flags(documents),
        };
        debug!("{:?} on {}: {} change(s)", pass, token_type.file_name(), changes);
        changes
    }

    /// Delete flags overridden by a later declaration of the same flag for
    /// the same package spec. Emptied entries are deleted.
    ///
    /// Returns the number of removed flags.
    pub fn drop_ineffective(&self, documents: &mut [Document]) -> usize {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut removed = 0;

        for document in documents.iter_mut().rev() {
            let mut emptied = Vec::new();

            for idx in (0..document.len()).rev() {
                let Some(entry) = document.entry_mut(idx) else {
                    continue;
                };
                let package = entry.package().to_string();
                let overridden: Vec<FlagSlot> = entry
                    .flags_by_precedence()
                    .into_iter()
                    .filter(|(_, full, _)| !seen.insert((package.clone(), full.clone())))
                    .map(|(slot, _, _)| slot)
                    .collect();
                if overridden.is_empty() {
                    continue;
                }

                removed += entry.remove_slots(&overridden);
                if entry.is_empty() {
                    emptied.push(idx);
                }
            }

            remove_lines(document, emptied);
        }

        removed
    }

    /// Delete entries whose package is not in the repository.
    ///
    /// Wildcard specs and packages the metadata cannot tell about are kept.
    /// Returns the number of deleted entries.
    pub fn drop_unmatched_packages(
        &self,
        documents: &mut [Document],
        metadata: &dyn PackageMetadata,
    ) -> usize {
        let mut removed = 0;
        for document in documents.iter_mut() {
            let unmatched: Vec<usize> = document
                .entries()
                .filter(|(_, entry)| metadata.has_package(entry.package()) == Some(false))
                .map(|(idx, _)| idx)
                .collect();
            removed += unmatched.len();
            remove_lines(document, unmatched);
        }
        removed
    }

    /// Delete flags that are not valid for their package.
    ///
    /// Wildcard flags stay, as do flags of packages whose valid values are
    /// unknown. Emptied entries are deleted. Returns the number of removed
    /// flags.
    pub fn drop_unmatched_flags(
        &self,
        documents: &mut [Document],
        token_type: TokenType,
        metadata: &dyn PackageMetadata,
    ) -> usize {
        let mut removed = 0;

        for document in documents.iter_mut() {
            let mut emptied = Vec::new();

            for idx in 0..document.len() {
                let Some(entry) = document.entry_mut(idx) else {
                    continue;
                };
                let package = entry.package().to_string();
                let count = entry.retain_flags(|group, _, flag| {
                    if is_wildcard_flag(&flag.name) {
                        return true;
                    }
                    let (group, name) = match group {
                        Some(group) => (Some(group.to_string()), flag.name.clone()),
                        None if token_type == TokenType::UseFlag => {
                            metadata.split_use_expand(&flag.name)
                        }
                        None => (None, flag.name.clone()),
                    };
                    metadata
                        .valid_values(&package, token_type, group.as_deref())
                        .map_or(true, |values| values.contains(&name))
                });
                if count > 0 {
                    debug!("Dropped {} unknown flag(s) for {}", count, package);
                    removed += count;
                    if entry.is_empty() {
                        emptied.push(idx);
                    }
                }
            }

            remove_lines(document, emptied);
        }

        removed
    }

    /// Sort entries by package name.
    ///
    /// Only runs of consecutive entries are sorted; comments and blank lines
    /// stay in place. Wildcard entries split the runs and entries for the
    /// same package keep their order, so no declaration changes meaning.
    /// Returns the number of documents changed.
    pub fn sort_entries(&self, documents: &mut [Document]) -> usize {
        documents
            .iter_mut()
            .map(|document| {
                document.sort_entries_by(|entry| {
                    let spec = entry.package();
                    if is_wildcard_package(spec) {
                        return None;
                    }
                    let parts = SpecParts::parse(spec);
                    Some((parts.category.unwrap_or_default().to_string(), parts.name.to_string()))
                })
            })
            .filter(|&changed| changed)
            .count()
    }

    /// Sort the flags of every entry by name, keeping wildcard flags in
    /// place. Returns the number of entries changed.
    pub fn sort_flags(&self, documents: &mut [Document]) -> usize {
        let mut changed = 0;
        for document in documents.iter_mut() {
            for idx in 0..document.len() {
                if let Some(entry) = document.entry_mut(idx) {
                    if entry.sort_flags() {
                        changed += 1;
                    }
                }
            }
        }
        changed
    }
}

fn remove_lines(document: &mut Document, mut indices: Vec<usize>) {
    indices.sort_unstable();
    for idx in indices.into_iter().rev() {
        debug!("Removing entry at {}, line {}", document.path().display(), idx + 1);
        document.remove_line(idx);
    }
}
