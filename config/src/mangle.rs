//! Flag directive resolution
//!
//! Applies "set flag", "remove flag" and "query flag" directives to a set
//! of [`Document`]s. Documents are ordered by effectiveness: later files,
//! and later lines within a file, override earlier ones. Edits always go
//! where they will be the effective declaration, touching as little as
//! possible:
//!
//! 1. flip the effective flag in place if it is declared exactly for the
//!    package,
//! 2. otherwise add the flag to an existing entry for the package,
//! 3. otherwise add a new entry after the last entry for the package,
//! 4. otherwise add a new entry at the end (or, for `*/*`, the start).
//!
//! A wildcard declaration found while looking for an in-place candidate
//! (e.g. `dev-foo/* -foo` when setting `foo` on `dev-foo/bar`) blocks the
//! in-place search, and nothing is inserted before it.

use crate::matcher::{is_wildcard_package, PatternMatcher};
use crate::ordering::insertion_index;
use crate::package_file::{full_name, Document, Entry, Flag, FlagSlot, Line};
use crate::{ConfigError, Result};
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::debug;

/// The universal wildcard package
pub const ALL_PACKAGES: &str = "*/*";

/// Line position across a document set, ordered by effectiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Position {
    doc: usize,
    line: usize,
}

/// First flag found by the most-effective-first scan
#[derive(Debug)]
struct Candidate {
    pos: Position,
    slot: FlagSlot,
    stored: String,
    exact: bool,
}

/// Where a flag can be added to an existing entry
#[derive(Debug, Clone, Copy)]
enum Target {
    Flat,
    Group(usize),
}

/// The declaration currently governing a (package, flag) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFlag {
    /// File holding the declaration
    pub path: PathBuf,
    /// Line number (1-based)
    pub line: usize,
    /// Package spec of the declaring entry
    pub package: String,
    /// Full name of the declared flag (may be a wildcard)
    pub flag: String,
    /// Declared state
    pub enabled: bool,
    /// Whether both package and flag match the query verbatim
    pub exact: bool,
}

/// Flag resolution engine
///
/// Owns the wildcard cache for one run.
#[derive(Debug, Default)]
pub struct Resolver {
    matcher: PatternMatcher,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    /// Make `name` (in `group`, if any) resolve to `new_state` for `package`
    pub fn mangle_flag(
        &self,
        documents: &mut [Document],
        package: &str,
        group: Option<&str>,
        name: &str,
        new_state: bool,
    ) -> Result<()> {
        let full = full_name(group, name);
        let flag = Flag::new(name, new_state);

        // 1. in-place update
        let blocker = match self.find_candidate(documents, package, &full) {
            Some(candidate) if candidate.exact => {
                let path = documents[candidate.pos.doc].path().display().to_string();
                let entry = entry_at(documents, candidate.pos)?;
                if entry.set_flag_state(candidate.slot, new_state) {
                    debug!(
                        "Match found: {}, line {}, {} {}, updating in place",
                        path,
                        candidate.pos.line + 1,
                        package,
                        candidate.stored
                    );
                } else {
                    debug!(
                        "Match found: {}, line {}, {} {}, already in requested state",
                        path,
                        candidate.pos.line + 1,
                        package,
                        candidate.stored
                    );
                }
                return Ok(());
            }
            Some(candidate) => {
                debug!(
                    "Match found: {}, line {}, {} {}, cannot update in place",
                    documents[candidate.pos.doc].path().display(),
                    candidate.pos.line + 1,
                    entry_at_ref(documents, candidate.pos)
                        .map(Entry::package)
                        .unwrap_or_default(),
                    candidate.stored
                );
                Some(candidate.pos)
            }
            None => None,
        };

        // 2. append to an existing entry
        let (found, last_match) = self.find_insert_target(documents, package, group, blocker);
        if let Some((pos, target)) = found {
            let entry = entry_at(documents, pos)?;
            match target {
                Target::Flat => {
                    let index = insertion_index(entry.flat_flags(), &flag);
                    entry.insert_flat(index, flag);
                }
                Target::Group(group_idx) => {
                    let index = insertion_index(&entry.grouped_flags()[group_idx].flags, &flag);
                    entry.insert_grouped(group_idx, index, flag);
                }
            }
            debug!(
                "Appended {} to {}, line {}",
                full,
                documents[pos.doc].path().display(),
                pos.line + 1
            );
            return Ok(());
        }

        let line = Line::Entry(Entry::new(package, group, flag));

        // 3. new entry after the last one for the package
        if let Some(pos) = last_match {
            documents[pos.doc].insert_line(pos.line + 1, line);
            debug!(
                "Added new entry for {} to {}, after line {}",
                package,
                documents[pos.doc].path().display(),
                pos.line + 1
            );
            return Ok(());
        }

        // 4. new entry at a file boundary
        if package == ALL_PACKAGES {
            let first = documents
                .first_mut()
                .ok_or_else(|| ConfigError::Invalid("no configuration files".to_string()))?;
            first.insert_line(0, line);
            debug!("Prepended new entry for {} to {}", package, first.path().display());
        } else if is_wildcard_package(package) {
            return Err(ConfigError::WildcardEntry(package.to_string()));
        } else {
            let last = documents
                .last_mut()
                .ok_or_else(|| ConfigError::Invalid("no configuration files".to_string()))?;
            last.push_line(line);
            debug!("Appended new entry for {} to {}", package, last.path().display());
        }
        Ok(())
    }

    /// Remove flags from every entry declared exactly for `package`.
    ///
    /// - `name` given: every flag with that (group-qualified) full name,
    /// - only `group` given: every flag inside groups of that name,
    /// - neither: all flags.
    ///
    /// Emptied groups are dropped and emptied entries deleted. Returns the
    /// number of entries changed or deleted.
    pub fn remove_flag(
        &self,
        documents: &mut [Document],
        package: &str,
        group: Option<&str>,
        name: Option<&str>,
    ) -> Result<usize> {
        let query = name.map(|name| full_name(group, name));
        let mut touched = 0;

        for document in documents.iter_mut() {
            let mut emptied = Vec::new();

            for idx in 0..document.len() {
                let Some(entry) = document.entry_mut(idx) else {
                    continue;
                };
                if entry.package() != package {
                    continue;
                }

                let removed = match (&query, group) {
                    (Some(query), _) => entry
                        .retain_flags(|_, full, _| !self.matcher.flag_selects(query, full)),
                    (None, Some(group)) => entry.retain_flags(|flag_group, _, _| {
                        !flag_group
                            .map(|g| g.eq_ignore_ascii_case(group))
                            .unwrap_or(false)
                    }),
                    (None, None) => entry.clear_flags(),
                };

                let clear_all = query.is_none() && group.is_none();
                if entry.is_empty() && (removed > 0 || clear_all) {
                    emptied.push(idx);
                } else if removed > 0 {
                    touched += 1;
                }
            }

            for idx in emptied.into_iter().rev() {
                debug!("Removing empty entry at {}, line {}", document.path().display(), idx + 1);
                document.remove_line(idx);
                touched += 1;
            }
        }

        Ok(touched)
    }

    /// Find the declaration governing `name` (in `group`) for `package`
    pub fn effective_flag(
        &self,
        documents: &[Document],
        package: &str,
        group: Option<&str>,
        name: &str,
    ) -> Option<EffectiveFlag> {
        let full = full_name(group, name);
        let candidate = self.find_candidate(documents, package, &full)?;
        let entry = entry_at_ref(documents, candidate.pos)?;
        let flag = entry.flag(candidate.slot)?;

        Some(EffectiveFlag {
            path: documents[candidate.pos.doc].path().to_path_buf(),
            line: candidate.pos.line + 1,
            package: entry.package().to_string(),
            flag: candidate.stored,
            enabled: flag.is_enabled(),
            exact: candidate.exact,
        })
    }

    /// Every flag declared for `package` with its effective state, by name
    pub fn effective_flags(&self, documents: &[Document], package: &str) -> Vec<(String, bool)> {
        let exact_package = is_wildcard_package(package);
        let mut flags: IndexMap<String, bool> = IndexMap::new();

        for document in documents.iter().rev() {
            for (_, entry) in document.entries().rev() {
                if !self
                    .matcher
                    .package_matches(entry.package(), package, exact_package)
                {
                    continue;
                }
                for (_, full, flag) in entry.flags_by_precedence() {
                    flags.entry(full).or_insert_with(|| flag.is_enabled());
                }
            }
        }

        flags.sort_keys();
        flags.into_iter().collect()
    }

    /// Scan entries most effective first for a flag matching `full`
    fn find_candidate(&self, documents: &[Document], package: &str, full: &str) -> Option<Candidate> {
        // a wildcard query only ever edits that very wildcard
        let exact_package = is_wildcard_package(package);

        for (doc_idx, document) in documents.iter().enumerate().rev() {
            for (line_idx, entry) in document.entries().rev() {
                if !self
                    .matcher
                    .package_matches(entry.package(), package, exact_package)
                {
                    continue;
                }

                for (slot, stored, _) in entry.flags_by_precedence() {
                    if self.matcher.flag_matches(&stored, full) {
                        let exact = entry.package() == package && stored == full;
                        return Some(Candidate {
                            pos: Position {
                                doc: doc_idx,
                                line: line_idx,
                            },
                            slot,
                            stored,
                            exact,
                        });
                    }
                }
            }
        }
        None
    }

    /// Find an entry for exactly `package` able to take the flag, never
    /// looking past `blocker`. Also returns the most effective entry for
    /// the package seen on the way.
    fn find_insert_target(
        &self,
        documents: &[Document],
        package: &str,
        group: Option<&str>,
        blocker: Option<Position>,
    ) -> (Option<(Position, Target)>, Option<Position>) {
        let mut last_match = None;

        for (doc_idx, document) in documents.iter().enumerate().rev() {
            for (line_idx, entry) in document.entries().rev() {
                let pos = Position {
                    doc: doc_idx,
                    line: line_idx,
                };
                if blocker.map(|b| pos < b).unwrap_or(false) {
                    return (None, last_match);
                }
                if entry.package() != package {
                    continue;
                }
                last_match.get_or_insert(pos);

                let target = match group {
                    None if entry.grouped_flags().is_empty() => Some(Target::Flat),
                    None => None,
                    Some(group) => entry.find_group(group).map(Target::Group),
                };
                if let Some(target) = target {
                    return (Some((pos, target)), last_match);
                }
            }
        }
        (None, last_match)
    }
}

fn entry_at(documents: &mut [Document], pos: Position) -> Result<&mut Entry> {
    documents
        .get_mut(pos.doc)
        .and_then(|d| d.entry_mut(pos.line))
        .ok_or_else(|| ConfigError::Invalid(format!("no entry at line {}", pos.line + 1)))
}

fn entry_at_ref(documents: &[Document], pos: Position) -> Option<&Entry> {
    documents.get(pos.doc).and_then(|d| d.entry(pos.line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn config(lines: &[&str]) -> Vec<Document> {
        vec![Document::parse("test.conf", &lines.join("\n"))]
    }

    fn rendered(documents: &[Document]) -> Vec<Vec<String>> {
        documents
            .iter()
            .map(|d| d.lines().iter().map(Line::to_string).collect())
            .collect()
    }

    #[test]
    fn test_toggle_flag() {
        for old in ["-foo", "foo"] {
            for new in ["-foo", "foo"] {
                let mut docs = config(&[
                    "*/* foo",
                    "",
                    &format!("dev-foo/foo {} bar", old),
                    "dev-foo/bar foo",
                    "dev-foo/foo baz",
                ]);
                let state = !new.starts_with('-');
                Resolver::new()
                    .mangle_flag(&mut docs, "dev-foo/foo", None, "foo", state)
                    .unwrap();

                let expected_dirty: Vec<usize> = if old == new { vec![] } else { vec![2] };
                assert_eq!(docs[0].dirty_lines(), expected_dirty);
                assert_eq!(docs[0].modified(), old != new);
                assert_eq!(
                    rendered(&docs)[0],
                    vec![
                        "*/* foo".to_string(),
                        "".to_string(),
                        format!("dev-foo/foo {} bar", new),
                        "dev-foo/bar foo".to_string(),
                        "dev-foo/foo baz".to_string(),
                    ]
                );
            }
        }
    }

    #[test]
    fn test_toggle_flag_in_group() {
        let mut docs = config(&[
            "*/* foo",
            "",
            "dev-foo/foo -group_foo group_bar",
            "dev-foo/bar foo",
            "dev-foo/foo GROUP: baz",
        ]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/foo", Some("group"), "foo", true)
            .unwrap();
        assert_eq!(docs[0].dirty_lines(), vec![2]);
        assert_eq!(rendered(&docs)[0][2], "dev-foo/foo group_foo group_bar");
    }

    #[test]
    fn test_toggle_flag_in_group_verbose() {
        for group in ["Group", "GROUP"] {
            let mut docs = config(&[
                "*/* foo",
                "",
                &format!("dev-foo/foo {}: foo bar", group),
                "dev-foo/bar foo",
                "dev-foo/foo group_baz",
            ]);
            Resolver::new()
                .mangle_flag(&mut docs, "dev-foo/foo", Some("group"), "foo", false)
                .unwrap();
            assert_eq!(docs[0].dirty_lines(), vec![2]);
            assert_eq!(rendered(&docs)[0][2], format!("dev-foo/foo {}: -foo bar", group));
        }
    }

    #[test]
    fn test_end_to_end_in_place() {
        let mut docs = config(&["*/* foo", "dev-foo/bar -foo bar"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "foo", true)
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["*/* foo", "dev-foo/bar foo bar"]);
        assert_eq!(docs[0].dirty_lines(), vec![1]);
        assert!(docs[0].modified());
    }

    #[test]
    fn test_idempotent_toggle() {
        let resolver = Resolver::new();
        let mut once = config(&["*/* foo", "dev-foo/bar baz"]);
        resolver
            .mangle_flag(&mut once, "dev-foo/bar", None, "foo", false)
            .unwrap();
        let mut twice = once.clone();
        resolver
            .mangle_flag(&mut twice, "dev-foo/bar", None, "foo", false)
            .unwrap();
        assert_eq!(rendered(&once), rendered(&twice));
        assert_eq!(rendered(&once)[0], vec!["*/* foo", "dev-foo/bar baz -foo"]);
    }

    #[test]
    fn test_precedence() {
        let docs = config(&["*/* foo", "dev-foo/bar -foo"]);
        let effective = Resolver::new()
            .effective_flag(&docs, "dev-foo/bar", None, "foo")
            .unwrap();
        assert!(!effective.enabled);
        assert!(effective.exact);
        assert_eq!(effective.line, 2);

        let effective = Resolver::new()
            .effective_flag(&docs, "dev-foo/baz", None, "foo")
            .unwrap();
        assert!(effective.enabled);
        assert!(!effective.exact);
        assert_eq!(effective.package, "*/*");
    }

    #[test]
    fn test_wildcard_package_blocks_in_place() {
        let mut docs = config(&["*/* foo", "dev-bar/* -foo bar", "dev-bar/* baz"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-bar/baz", None, "foo", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["*/* foo", "dev-bar/* -foo bar", "dev-bar/* baz", "dev-bar/baz foo"]
        );
    }

    #[test]
    fn test_no_insertion_before_blocker() {
        let mut docs = config(&["dev-foo/bar baz", "*/* -foo"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "foo", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/bar baz", "*/* -foo", "dev-foo/bar foo"]
        );
    }

    #[test]
    fn test_wildcard_flag_in_same_entry() {
        let mut docs = config(&["dev-foo/bar a -foo_* z"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "foo_x", true)
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar a -foo_* foo_x z"]);
    }

    #[test]
    fn test_insert_into_existing_entry_sorted() {
        let mut docs = config(&["dev-foo/bar a c e", "dev-foo/baz x"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "b", false)
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar a -b c e", "dev-foo/baz x"]);
    }

    #[test]
    fn test_ungrouped_flag_skips_entries_with_groups() {
        let mut docs = config(&[
            "dev-foo/bar a",
            "dev-foo/bar GROUP: x",
            "dev-foo/baz y",
        ]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "b", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/bar a b", "dev-foo/bar GROUP: x", "dev-foo/baz y"]
        );
    }

    #[test]
    fn test_grouped_flag_into_matching_group() {
        let mut docs = config(&["dev-foo/bar a Group: x z", "dev-foo/bar b"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", Some("GROUP"), "y", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/bar a Group: x y z", "dev-foo/bar b"]
        );
    }

    #[test]
    fn test_new_entry_after_last_match() {
        let mut docs = config(&["dev-foo/bar GROUP: x", "dev-foo/baz y"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", None, "b", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/bar GROUP: x", "dev-foo/bar b", "dev-foo/baz y"]
        );
    }

    #[test]
    fn test_new_grouped_entry() {
        let mut docs = config(&["dev-foo/baz y"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/bar", Some("PYTHON_TARGETS"), "python3_12", true)
            .unwrap();
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/baz y", "dev-foo/bar PYTHON_TARGETS: python3_12"]
        );
    }

    #[test]
    fn test_wildcard_entry_rejected() {
        let mut docs = config(&["dev-bar/* foo"]);
        let err = Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/*", None, "foo", true)
            .unwrap_err();
        assert_matches!(err, ConfigError::WildcardEntry(pkg) if pkg == "dev-foo/*");
        assert!(!docs[0].modified());
    }

    #[test]
    fn test_all_packages_prepended_to_first_document() {
        let mut docs = vec![
            Document::parse("a.conf", "dev-foo/bar x\n"),
            Document::parse("b.conf", "dev-foo/baz y\n"),
        ];
        Resolver::new()
            .mangle_flag(&mut docs, ALL_PACKAGES, None, "foo", false)
            .unwrap();
        assert_eq!(docs[0].to_string(), "*/* -foo\ndev-foo/bar x\n");
        assert!(!docs[1].modified());
    }

    #[test]
    fn test_new_entry_goes_to_last_document() {
        let mut docs = vec![
            Document::parse("a.conf", "dev-foo/bar x\n"),
            Document::parse("b.conf", "dev-foo/baz y"),
        ];
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/qux", None, "foo", true)
            .unwrap();
        assert!(!docs[0].modified());
        assert_eq!(docs[1].to_string(), "dev-foo/baz y\ndev-foo/qux foo\n");
    }

    #[test]
    fn test_no_documents() {
        let err = Resolver::new()
            .mangle_flag(&mut [], "dev-foo/bar", None, "foo", true)
            .unwrap_err();
        assert_matches!(err, ConfigError::Invalid(_));
    }

    #[test]
    fn test_wildcard_query_edits_only_itself() {
        let mut docs = config(&["dev-foo/* foo", "dev-foo/bar -foo"]);
        Resolver::new()
            .mangle_flag(&mut docs, "dev-foo/*", None, "foo", false)
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/* -foo", "dev-foo/bar -foo"]);
    }

    #[test]
    fn test_remove_flag_everywhere() {
        let mut docs = config(&[
            "dev-foo/bar foo bar",
            "*/* foo",
            "dev-foo/bar -foo",
            "dev-foo/bar GROUP: foo",
        ]);
        let touched = Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", None, Some("foo"))
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(
            rendered(&docs)[0],
            vec!["dev-foo/bar bar", "*/* foo", "dev-foo/bar GROUP: foo"]
        );
    }

    #[test]
    fn test_remove_grouped_by_full_name() {
        let mut docs = config(&["dev-foo/bar group_foo GROUP: foo bar"]);
        Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", Some("group"), Some("foo"))
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar GROUP: bar"]);
    }

    #[test]
    fn test_remove_does_not_drop_wildcard_flags() {
        let mut docs = config(&["dev-foo/bar foo_* foo_bar"]);
        Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", None, Some("foo_bar"))
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar foo_*"]);
    }

    #[test]
    fn test_remove_group_cascade() {
        let mut docs = config(&["dev-foo/bar a GROUP: x OTHER: y"]);
        Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", Some("group"), None)
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar a OTHER: y"]);

        Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", Some("OTHER"), Some("y"))
            .unwrap();
        assert_eq!(rendered(&docs)[0], vec!["dev-foo/bar a"]);

        Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", None, Some("a"))
            .unwrap();
        assert!(docs[0].is_empty());
        assert!(docs[0].modified());
    }

    #[test]
    fn test_remove_all() {
        let mut docs = config(&["# head", "dev-foo/bar a", "dev-foo/baz b", "dev-foo/bar"]);
        let touched = Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", None, None)
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(rendered(&docs)[0], vec!["# head", "dev-foo/baz b"]);
    }

    #[test]
    fn test_remove_is_exact_package_only() {
        let mut docs = config(&["dev-foo/* a", "dev-foo/bar b"]);
        let touched = Resolver::new()
            .remove_flag(&mut docs, "dev-foo/bar", None, Some("a"))
            .unwrap();
        assert_eq!(touched, 0);
        assert!(!docs[0].modified());
    }

    #[test]
    fn test_effective_flags() {
        let docs = config(&["*/* a -b", "dev-foo/bar b GROUP: c", "dev-foo/baz d"]);
        let flags = Resolver::new().effective_flags(&docs, "dev-foo/bar");
        assert_eq!(
            flags,
            vec![
                ("a".to_string(), true),
                ("b".to_string(), true),
                ("group_c".to_string(), true),
            ]
        );
    }
}
