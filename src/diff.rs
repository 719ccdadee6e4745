//! Showing pending changes to directive files

use console::style;
use std::io;
use std::path::Path;

/// Differences between the original file and its replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Lines only in the original, with their 1-based line numbers
    pub removed: Vec<(usize, String)>,
    /// Lines only in the new file, with their 1-based line numbers
    pub added: Vec<(usize, String)>,
}

impl ConfigDiff {
    pub fn identical(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Largest LCS table built for the changed region of a file
const MAX_TABLE_CELLS: usize = 4 * 1024 * 1024;

/// Compute the line difference between two texts
///
/// Lines shared at the start and end are skipped; the rest is matched by a
/// longest common subsequence, so moved or duplicated lines are reported in
/// place. A changed region too large for the table is reported as replaced.
pub fn diff_text(original: &str, new: &str) -> ConfigDiff {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = new.lines().collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut diff = ConfigDiff::default();
    let cells = (old_mid.len() + 1).saturating_mul(new_mid.len() + 1);
    if cells > MAX_TABLE_CELLS {
        diff.removed = numbered(old_mid, prefix);
        diff.added = numbered(new_mid, prefix);
        return diff;
    }

    // lcs[i][j]: common lines of old_mid[i..] and new_mid[j..]
    let mut lcs = vec![vec![0usize; new_mid.len() + 1]; old_mid.len() + 1];
    for i in (0..old_mid.len()).rev() {
        for j in (0..new_mid.len()).rev() {
            lcs[i][j] = if old_mid[i] == new_mid[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old_mid.len() || j < new_mid.len() {
        if i < old_mid.len() && j < new_mid.len() && old_mid[i] == new_mid[j] {
            i += 1;
            j += 1;
        } else if j < new_mid.len() && (i == old_mid.len() || lcs[i][j + 1] >= lcs[i + 1][j]) {
            diff.added.push((prefix + j + 1, new_mid[j].to_string()));
            j += 1;
        } else {
            diff.removed.push((prefix + i + 1, old_mid[i].to_string()));
            i += 1;
        }
    }
    diff
}

fn numbered(lines: &[&str], offset: usize) -> Vec<(usize, String)> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| (offset + idx + 1, line.to_string()))
        .collect()
}

/// Compute the difference between a file and its replacement
pub fn diff_files(original: &Path, new: &Path) -> io::Result<ConfigDiff> {
    let original_content = if original.exists() {
        std::fs::read_to_string(original)?
    } else {
        String::new()
    };
    let new_content = std::fs::read_to_string(new)?;
    Ok(diff_text(&original_content, &new_content))
}

/// Print the pending change to a file
pub fn print_diff(original: &Path, new: &Path) -> io::Result<()> {
    let diff = diff_files(original, new)?;
    if diff.identical() {
        return Ok(());
    }

    println!("{} {}", style(">>>").green().bold(), style(original.display()).bold());
    for (line, text) in &diff.removed {
        println!("{}", style(format!("{:>5} - {}", line, text)).red());
    }
    for (line, text) in &diff.added {
        println!("{}", style(format!("{:>5} + {}", line, text)).green());
    }
    Ok(())
}
