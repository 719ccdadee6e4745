//! Directive file model
//!
//! A directive file (`package.use`, `package.accept_keywords`, ...) is read
//! into a [`Document`], an ordered list of [`Line`]s. Entries keep the raw
//! text they were parsed from and only re-serialize after a mutation, so
//! untouched lines are written back byte for byte.
//!
//! Line syntax:
//!
//! ```text
//! <package-spec> [<flag>|<GROUP>: <flag>...]... [# comment]
//! ```

use crate::matcher::is_wildcard_flag;
use crate::{ConfigError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefix attached to a flag token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modifier {
    /// No prefix (enabled)
    #[default]
    None,
    /// Explicit `+` prefix (enabled)
    Plus,
    /// `-` prefix (disabled)
    Minus,
}

impl Modifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::None => "",
            Modifier::Plus => "+",
            Modifier::Minus => "-",
        }
    }
}

/// A single flag token with its modifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Flag {
    /// The flag name, without modifier
    pub name: String,
    /// The modifier as written
    pub modifier: Modifier,
}

impl Flag {
    /// Create a flag in the given state
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            modifier: if enabled {
                Modifier::None
            } else {
                Modifier::Minus
            },
        }
    }

    /// Create a new enabled flag
    pub fn enabled(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// Create a new disabled flag
    pub fn disabled(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    /// Parse a flag token (e.g., "-gtk", "+X" or "systemd")
    pub fn parse(token: &str) -> Result<Self> {
        let (modifier, name) = if let Some(name) = token.strip_prefix('-') {
            (Modifier::Minus, name)
        } else if let Some(name) = token.strip_prefix('+') {
            (Modifier::Plus, name)
        } else {
            (Modifier::None, token)
        };

        if name.is_empty() {
            return Err(ConfigError::InvalidLine {
                line: token.to_string(),
                reason: "flag modifier without a flag name".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            modifier,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.modifier != Modifier::Minus
    }

    /// Set the state, returning whether anything changed.
    ///
    /// An explicit `+` survives when the flag is already enabled.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.is_enabled() == enabled {
            return false;
        }
        self.modifier = if enabled {
            Modifier::None
        } else {
            Modifier::Minus
        };
        true
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.modifier.as_str(), self.name)
    }
}

/// Flag name qualified with its (lowercased) group, e.g. `python_targets_python3_12`
pub fn full_name(group: Option<&str>, name: &str) -> String {
    match group {
        Some(group) => format!("{}_{}", group.to_lowercase(), name),
        None => name.to_string(),
    }
}

/// A `GROUP: flag...` section of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagGroup {
    /// Group name, case preserved
    pub name: String,
    /// Flags scoped to the group
    pub flags: Vec<Flag>,
}

impl FlagGroup {
    pub fn new(name: impl Into<String>, flags: Vec<Flag>) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }

    /// Group names compare case-insensitively
    pub fn is_named(&self, group: &str) -> bool {
        self.name.eq_ignore_ascii_case(group)
    }

    /// Full name of a flag within this group
    pub fn full_name(&self, flag: &Flag) -> String {
        full_name(Some(&self.name), &flag.name)
    }
}

/// Position of a flag inside an [`Entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSlot {
    /// Index into the flat flags
    Flat(usize),
    /// Group index and index within that group
    Grouped(usize, usize),
}

/// A package line: package spec, flags and optional comment
#[derive(Debug, Clone)]
pub struct Entry {
    package: String,
    flat_flags: Vec<Flag>,
    grouped_flags: Vec<FlagGroup>,
    trailing_comment: Option<String>,
    /// Text the entry was parsed from; `None` once mutated.
    raw: Option<String>,
    /// Line ends with `\r\n`
    crlf: bool,
}

impl Entry {
    /// Create a fresh entry holding a single flag
    pub fn new(package: impl Into<String>, group: Option<&str>, flag: Flag) -> Self {
        let mut entry = Self {
            package: package.into(),
            flat_flags: Vec::new(),
            grouped_flags: Vec::new(),
            trailing_comment: None,
            raw: None,
            crlf: false,
        };
        match group {
            Some(group) => entry.grouped_flags.push(FlagGroup::new(group, vec![flag])),
            None => entry.flat_flags.push(flag),
        }
        entry
    }

    /// Build an entry from parts, as if it had been edited
    pub fn from_parts(
        package: impl Into<String>,
        flat_flags: Vec<Flag>,
        grouped_flags: Vec<FlagGroup>,
    ) -> Self {
        Self {
            package: package.into(),
            flat_flags,
            grouped_flags,
            trailing_comment: None,
            raw: None,
            crlf: false,
        }
    }

    /// Parse a non-blank, non-comment line
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidLine {
            line: raw.to_string(),
            reason: reason.to_string(),
        };

        let spans = token_spans(raw);
        let mut tokens = spans.into_iter();
        let package = match tokens.next() {
            Some((_, token)) if token.starts_with('#') => {
                return Err(invalid("comment where a package was expected"))
            }
            Some((_, token)) if token.ends_with(':') => {
                return Err(invalid("group marker where a package was expected"))
            }
            Some((_, token)) => token,
            None => return Err(invalid("empty line")),
        };

        let mut flat_flags = Vec::new();
        let mut grouped_flags: Vec<FlagGroup> = Vec::new();
        let mut trailing_comment = None;

        for (offset, token) in tokens {
            if token.starts_with('#') {
                trailing_comment = Some(raw[offset..].to_string());
                break;
            }

            if let Some(group) = token.strip_suffix(':') {
                if group.is_empty() {
                    return Err(invalid("group marker without a name"));
                }
                grouped_flags.push(FlagGroup::new(group, Vec::new()));
                continue;
            }

            let flag = Flag::parse(token).map_err(|_| invalid("flag modifier without a name"))?;
            match grouped_flags.last_mut() {
                Some(group) => group.flags.push(flag),
                None => flat_flags.push(flag),
            }
        }

        Ok(Self {
            package: package.to_string(),
            flat_flags,
            grouped_flags,
            trailing_comment,
            raw: Some(raw.to_string()),
            crlf: raw.ends_with('\r'),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn flat_flags(&self) -> &[Flag] {
        &self.flat_flags
    }

    pub fn grouped_flags(&self) -> &[FlagGroup] {
        &self.grouped_flags
    }

    pub fn trailing_comment(&self) -> Option<&str> {
        self.trailing_comment.as_deref()
    }

    /// Whether the entry needs to be re-serialized
    pub fn is_dirty(&self) -> bool {
        self.raw.is_none()
    }

    /// No flat and no grouped flags
    pub fn is_empty(&self) -> bool {
        self.flat_flags.is_empty() && self.grouped_flags.iter().all(|g| g.flags.is_empty())
    }

    /// Index of the last group with the given name
    pub fn find_group(&self, group: &str) -> Option<usize> {
        self.grouped_flags.iter().rposition(|g| g.is_named(group))
    }

    /// Flags with their full names, most specific first: groups from last
    /// to first, then flat flags, each scanned from the end.
    pub fn flags_by_precedence(&self) -> Vec<(FlagSlot, String, &Flag)> {
        let mut result = Vec::new();
        for (group_idx, group) in self.grouped_flags.iter().enumerate().rev() {
            for (idx, flag) in group.flags.iter().enumerate().rev() {
                result.push((FlagSlot::Grouped(group_idx, idx), group.full_name(flag), flag));
            }
        }
        for (idx, flag) in self.flat_flags.iter().enumerate().rev() {
            result.push((FlagSlot::Flat(idx), flag.name.clone(), flag));
        }
        result
    }

    /// Get the flag at a slot
    pub fn flag(&self, slot: FlagSlot) -> Option<&Flag> {
        match slot {
            FlagSlot::Flat(idx) => self.flat_flags.get(idx),
            FlagSlot::Grouped(group, idx) => self.grouped_flags.get(group)?.flags.get(idx),
        }
    }

    /// Set the state of the flag at a slot, returning whether it changed
    pub fn set_flag_state(&mut self, slot: FlagSlot, enabled: bool) -> bool {
        let flag = match slot {
            FlagSlot::Flat(idx) => self.flat_flags.get_mut(idx),
            FlagSlot::Grouped(group, idx) => self
                .grouped_flags
                .get_mut(group)
                .and_then(|g| g.flags.get_mut(idx)),
        };
        let changed = flag.map(|f| f.set_enabled(enabled)).unwrap_or(false);
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Insert a flat flag at the given position
    pub fn insert_flat(&mut self, index: usize, flag: Flag) {
        self.flat_flags.insert(index, flag);
        self.invalidate();
    }

    /// Insert a flag into an existing group
    pub fn insert_grouped(&mut self, group: usize, index: usize, flag: Flag) {
        if let Some(group) = self.grouped_flags.get_mut(group) {
            group.flags.insert(index, flag);
            self.invalidate();
        }
    }

    /// Keep only the flags for which `keep(group, full_name, flag)` holds.
    ///
    /// Groups emptied by the removal are dropped. Returns the number of
    /// removed flags.
    pub fn retain_flags<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(Option<&str>, &str, &Flag) -> bool,
    {
        let before = self.flag_count();

        self.flat_flags.retain(|flag| keep(None, &flag.name, flag));
        let mut emptied = Vec::new();
        for (idx, group) in self.grouped_flags.iter_mut().enumerate() {
            let had_flags = !group.flags.is_empty();
            let name = group.name.clone();
            group
                .flags
                .retain(|flag| keep(Some(&name), &full_name(Some(&name), &flag.name), flag));
            if had_flags && group.flags.is_empty() {
                emptied.push(idx);
            }
        }

        let removed = before - self.flag_count();
        if removed > 0 {
            for idx in emptied.into_iter().rev() {
                self.grouped_flags.remove(idx);
            }
            self.invalidate();
        }
        removed
    }

    /// Remove the flags at the given slots, dropping emptied groups
    pub fn remove_slots(&mut self, slots: &[FlagSlot]) -> usize {
        let flat = (0..self.flat_flags.len()).map(FlagSlot::Flat);
        let grouped = self
            .grouped_flags
            .iter()
            .enumerate()
            .flat_map(|(group, g)| (0..g.flags.len()).map(move |idx| FlagSlot::Grouped(group, idx)));
        // retain_flags visits flags in this same order
        let mut order: Vec<FlagSlot> = flat.chain(grouped).collect();
        order.reverse();
        self.retain_flags(|_, _, _| order.pop().map_or(true, |slot| !slots.contains(&slot)))
    }

    /// Sort flags by name, within each group and between wildcard flags.
    ///
    /// Returns whether the order changed.
    pub fn sort_flags(&mut self) -> bool {
        let mut changed = sort_flag_runs(&mut self.flat_flags);
        for group in &mut self.grouped_flags {
            changed |= sort_flag_runs(&mut group.flags);
        }
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Remove every flag
    pub fn clear_flags(&mut self) -> usize {
        let removed = self.flag_count();
        if removed > 0 || !self.grouped_flags.is_empty() {
            self.flat_flags.clear();
            self.grouped_flags.clear();
            self.invalidate();
        }
        removed
    }

    fn flag_count(&self) -> usize {
        self.flat_flags.len() + self.grouped_flags.iter().map(|g| g.flags.len()).sum::<usize>()
    }

    fn invalidate(&mut self) {
        self.raw = None;
    }

    /// Cache the current rendering as the raw text
    fn mark_clean(&mut self) {
        if self.raw.is_none() {
            self.raw = Some(self.render());
        }
    }

    fn render(&self) -> String {
        let mut parts = vec![self.package.clone()];
        parts.extend(self.flat_flags.iter().map(Flag::to_string));
        for group in &self.grouped_flags {
            parts.push(format!("{}:", group.name));
            parts.extend(group.flags.iter().map(Flag::to_string));
        }
        if let Some(comment) = &self.trailing_comment {
            parts.push(comment.trim_end().to_string());
        }
        let mut line = parts.join(" ");
        if self.crlf {
            line.push('\r');
        }
        line
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.package == other.package
            && self.flat_flags == other.flat_flags
            && self.grouped_flags == other.grouped_flags
            && self.trailing_comment == other.trailing_comment
    }
}

impl Eq for Entry {}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Some(raw) => f.write_str(raw),
            None => f.write_str(&self.render()),
        }
    }
}

/// Stable sort of each run of flags between wildcard flags
fn sort_flag_runs(flags: &mut [Flag]) -> bool {
    let mut changed = false;
    for run in flags.split_mut(|flag| is_wildcard_flag(&flag.name)) {
        if run.windows(2).any(|pair| pair[0].name > pair[1].name) {
            run.sort_by(|a, b| a.name.cmp(&b.name));
            changed = true;
        }
    }
    changed
}

/// Whitespace-delimited tokens with their byte offsets
fn token_spans(line: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if let Some(begin) = start.take() {
                spans.push((begin, &line[begin..idx]));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(begin) = start {
        spans.push((begin, &line[begin..]));
    }
    spans
}

/// One line of a directive file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Blank line, comment, or unparseable text kept verbatim
    Blank(String),
    /// Package entry
    Entry(Entry),
}

impl Line {
    /// Parse a raw line (without its line terminator)
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(Line::Blank(raw.to_string()));
        }
        Entry::parse(raw).map(Line::Entry)
    }

    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Line::Entry(entry) => Some(entry),
            Line::Blank(_) => None,
        }
    }

    pub fn as_entry_mut(&mut self) -> Option<&mut Entry> {
        match self {
            Line::Entry(entry) => Some(entry),
            Line::Blank(_) => None,
        }
    }

    fn is_dirty(&self) -> bool {
        self.as_entry().map(Entry::is_dirty).unwrap_or(false)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Blank(text) => f.write_str(text),
            Line::Entry(entry) => entry.fmt(f),
        }
    }
}

/// A directive file loaded into memory
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    lines: Vec<Line>,
    trailing_newline: bool,
    /// Lines end with `\r\n`; new entries follow suit
    crlf: bool,
    /// Set when lines are inserted or removed
    structure_modified: bool,
}

impl Document {
    /// Create an empty document for a (possibly missing) file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            trailing_newline: true,
            crlf: false,
            structure_modified: false,
        }
    }

    /// Parse file content. Lines that fail to parse are kept verbatim.
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        let path = path.into();
        let trailing_newline = content.is_empty() || content.ends_with('\n');
        let crlf = content.contains("\r\n");
        let body = content.strip_suffix('\n').unwrap_or(content);

        let mut lines = Vec::new();
        if !content.is_empty() {
            for (line_no, raw) in body.split('\n').enumerate() {
                let line = match Line::parse(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("{}, line {}: {}, keeping it verbatim", path.display(), line_no + 1, e);
                        Line::Blank(raw.to_string())
                    }
                };
                lines.push(line);
            }
        }

        Self {
            path,
            lines,
            trailing_newline,
            crlf,
            structure_modified: false,
        }
    }

    /// Load a document from disk; a missing file is an empty document
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(path, &content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(path)),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Entry at a line index
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.lines.get(index).and_then(Line::as_entry)
    }

    /// Mutable entry at a line index
    pub fn entry_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.lines.get_mut(index).and_then(Line::as_entry_mut)
    }

    /// Entries with their line indices, in file order
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = (usize, &Entry)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| line.as_entry().map(|e| (idx, e)))
    }

    /// Insert a line before `index`
    pub fn insert_line(&mut self, index: usize, line: Line) {
        if index >= self.lines.len() {
            self.push_line(line);
            return;
        }
        let line = self.adopt_line_ending(line);
        self.lines.insert(index, line);
        self.structure_modified = true;
    }

    /// Append a line; the document ends with a newline afterwards
    pub fn push_line(&mut self, line: Line) {
        let line = self.adopt_line_ending(line);
        self.lines.push(line);
        self.trailing_newline = true;
        self.structure_modified = true;
    }

    fn adopt_line_ending(&self, mut line: Line) -> Line {
        if let Line::Entry(entry) = &mut line {
            if entry.raw.is_none() {
                entry.crlf = self.crlf;
            }
        }
        line
    }

    /// Remove the line at `index`
    pub fn remove_line(&mut self, index: usize) -> Line {
        self.structure_modified = true;
        self.lines.remove(index)
    }

    /// Stable sort of each run of consecutive entries by `key`.
    ///
    /// Blank and comment lines stay in place, as do entries for which `key`
    /// returns `None`; both split the runs. Returns whether anything moved.
    pub fn sort_entries_by<K, F>(&mut self, mut key: F) -> bool
    where
        K: Ord,
        F: FnMut(&Entry) -> Option<K>,
    {
        let keys: Vec<Option<K>> = self
            .lines
            .iter()
            .map(|line| line.as_entry().and_then(&mut key))
            .collect();

        let mut changed = false;
        let mut start = 0;
        while start < keys.len() {
            if keys[start].is_none() {
                start += 1;
                continue;
            }
            let end = keys[start..]
                .iter()
                .position(Option::is_none)
                .map_or(keys.len(), |len| start + len);
            if keys[start..end].windows(2).any(|pair| pair[0] > pair[1]) {
                let mut order: Vec<usize> = (start..end).collect();
                order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
                let sorted: Vec<Line> = order.iter().map(|&idx| self.lines[idx].clone()).collect();
                self.lines.splice(start..end, sorted);
                changed = true;
            }
            start = end;
        }
        if changed {
            self.structure_modified = true;
        }
        changed
    }

    /// Whether anything needs to be written back
    pub fn modified(&self) -> bool {
        self.structure_modified || self.lines.iter().any(Line::is_dirty)
    }

    /// Line numbers (0-based) of entries that were edited or added
    pub fn dirty_lines(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_dirty())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Forget all modifications after a successful write
    pub fn mark_clean(&mut self) {
        for line in &mut self.lines {
            if let Line::Entry(entry) = line {
                entry.mark_clean();
            }
        }
        self.structure_modified = false;
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            line.fmt(f)?;
        }
        if self.trailing_newline && !self.lines.is_empty() {
            f.write_str("\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(raw: &str) -> Entry {
        Entry::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_flag() {
        let flag = Flag::parse("systemd").unwrap();
        assert_eq!(flag.name, "systemd");
        assert!(flag.is_enabled());

        let flag = Flag::parse("-gtk").unwrap();
        assert_eq!(flag.name, "gtk");
        assert!(!flag.is_enabled());

        let flag = Flag::parse("+X").unwrap();
        assert_eq!(flag.modifier, Modifier::Plus);
        assert_eq!(flag.to_string(), "+X");

        assert!(Flag::parse("-").is_err());
    }

    #[test]
    fn test_set_enabled_keeps_plus() {
        let mut flag = Flag::parse("+X").unwrap();
        assert!(!flag.set_enabled(true));
        assert_eq!(flag.to_string(), "+X");
        assert!(flag.set_enabled(false));
        assert_eq!(flag.to_string(), "-X");
        assert!(flag.set_enabled(true));
        assert_eq!(flag.to_string(), "X");
    }

    #[test]
    fn test_parse_entry() {
        let e = entry("dev-foo/bar foo -bar PYTHON_TARGETS: python3_12 -python3_11 # keep");
        assert_eq!(e.package(), "dev-foo/bar");
        assert_eq!(e.flat_flags(), &[Flag::enabled("foo"), Flag::disabled("bar")]);
        assert_eq!(
            e.grouped_flags(),
            &[FlagGroup::new(
                "PYTHON_TARGETS",
                vec![Flag::enabled("python3_12"), Flag::disabled("python3_11")]
            )]
        );
        assert_eq!(e.trailing_comment(), Some("# keep"));
        assert!(!e.is_dirty());
    }

    #[test]
    fn test_hash_inside_token_is_not_a_comment() {
        let e = entry("dev-foo/bar foo#bar");
        assert_eq!(e.flat_flags(), &[Flag::enabled("foo#bar")]);
        assert_eq!(e.trailing_comment(), None);
    }

    #[test]
    fn test_invalid_lines() {
        assert!(Line::parse("GROUP: foo").is_err());
        assert!(Line::parse("dev-foo/bar : foo").is_err());
        assert!(Line::parse("dev-foo/bar - foo").is_err());
    }

    #[test]
    fn test_round_trip_identity() {
        let content = "# comment\n\n  \t\ndev-foo/bar  foo\t-bar   # spaced  \n*/* GROUP:  a  Other: -b\ndev-foo/baz +x\n  # indented comment\nno-newline/at-end";
        let doc = Document::parse("test.conf", content);
        assert_eq!(doc.to_string(), content);
        assert!(!doc.modified());
    }

    #[test]
    fn test_round_trip_invalid_line_kept_verbatim() {
        let content = "dev-foo/bar : oops\ndev-foo/baz foo\n";
        let doc = Document::parse("test.conf", content);
        assert_eq!(doc.lines()[0], Line::Blank("dev-foo/bar : oops".to_string()));
        assert_eq!(doc.to_string(), content);
    }

    #[test]
    fn test_dirty_serialization() {
        let mut e = entry("dev-foo/bar   foo  GROUP:  a   # note  ");
        assert!(e.set_flag_state(FlagSlot::Flat(0), false));
        assert_eq!(e.to_string(), "dev-foo/bar -foo GROUP: a # note");
    }

    #[test]
    fn test_unchanged_state_stays_clean() {
        let mut e = entry("dev-foo/bar   foo");
        assert!(!e.set_flag_state(FlagSlot::Flat(0), true));
        assert!(!e.is_dirty());
        assert_eq!(e.to_string(), "dev-foo/bar   foo");
    }

    #[test]
    fn test_flags_by_precedence() {
        let e = entry("dev-foo/bar a b G1: c H2: d e");
        let names: Vec<String> = e
            .flags_by_precedence()
            .into_iter()
            .map(|(_, full, _)| full)
            .collect();
        assert_eq!(names, vec!["h2_e", "h2_d", "g1_c", "b", "a"]);
    }

    #[test]
    fn test_retain_drops_empty_groups() {
        let mut e = entry("dev-foo/bar a G: b H: c");
        let removed = e.retain_flags(|_, full, _| full != "g_b");
        assert_eq!(removed, 1);
        assert_eq!(e.to_string(), "dev-foo/bar a H: c");

        let removed = e.retain_flags(|_, full, _| full == "nothing");
        assert_eq!(removed, 2);
        assert!(e.is_empty());
    }

    #[test]
    fn test_remove_slots() {
        let mut e = entry("dev-foo/bar a b G: c d H: e");
        let removed = e.remove_slots(&[FlagSlot::Flat(0), FlagSlot::Grouped(1, 0)]);
        assert_eq!(removed, 2);
        assert_eq!(e.to_string(), "dev-foo/bar b G: c d");

        assert_eq!(e.remove_slots(&[FlagSlot::Flat(5)]), 0);
    }

    #[test]
    fn test_sort_flags_keeps_wildcards_in_place() {
        let mut e = entry("dev-foo/bar c a -* z -b G: y x # note");
        assert!(e.sort_flags());
        assert_eq!(e.to_string(), "dev-foo/bar a c -* -b z G: x y # note");

        let mut sorted = entry("dev-foo/bar  a   b");
        assert!(!sorted.sort_flags());
        assert!(!sorted.is_dirty());
        assert_eq!(sorted.to_string(), "dev-foo/bar  a   b");
    }

    #[test]
    fn test_sort_flags_keeps_duplicate_order() {
        let mut e = entry("dev-foo/bar b a -b");
        assert!(e.sort_flags());
        assert_eq!(e.to_string(), "dev-foo/bar a b -b");
    }

    #[test]
    fn test_sort_entries_by_package() {
        let mut doc = Document::parse(
            "test.conf",
            "# head\nc/c  x\na/a y\n\nz/z 1\nb/b 2\ndev-foo/* 3\na/a 4\n",
        );
        let key = |entry: &Entry| {
            (!entry.package().contains('*')).then(|| entry.package().to_string())
        };
        let changed = doc.sort_entries_by(key);
        assert!(changed);
        assert!(doc.modified());
        assert_eq!(
            doc.to_string(),
            "# head\na/a y\nc/c  x\n\nb/b 2\nz/z 1\ndev-foo/* 3\na/a 4\n"
        );

        doc.mark_clean();
        assert!(!doc.sort_entries_by(key));
        assert!(!doc.modified());
    }

    #[test]
    fn test_document_modifications() {
        let mut doc = Document::parse("test.conf", "a/b foo");
        doc.push_line(Line::Entry(Entry::new("c/d", None, Flag::enabled("x"))));
        assert!(doc.modified());
        assert_eq!(doc.to_string(), "a/b foo\nc/d x\n");

        doc.mark_clean();
        assert!(!doc.modified());
        assert_eq!(doc.to_string(), "a/b foo\nc/d x\n");

        doc.remove_line(0);
        assert!(doc.modified());
        assert_eq!(doc.to_string(), "c/d x\n");
    }

    #[test]
    fn test_crlf_kept_on_edited_lines() {
        let mut doc = Document::parse("test.conf", "dev-foo/bar a # note\r\ndev-foo/baz b\r\n");
        let entry = doc.entry_mut(0).unwrap();
        assert!(entry.set_flag_state(FlagSlot::Flat(0), false));
        assert_eq!(doc.to_string(), "dev-foo/bar -a # note\r\ndev-foo/baz b\r\n");

        doc.push_line(Line::Entry(Entry::new("dev-foo/qux", None, Flag::enabled("c"))));
        assert_eq!(
            doc.to_string(),
            "dev-foo/bar -a # note\r\ndev-foo/baz b\r\ndev-foo/qux c\r\n"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let doc = Document::load(Path::new("/nonexistent/package.use")).unwrap();
        assert!(doc.is_empty());
        assert!(!doc.modified());
        assert_eq!(doc.to_string(), "");
    }
}
