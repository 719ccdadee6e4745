//! Package metadata lookups
//!
//! The resolution engine itself never needs package metadata. The command
//! line uses it to expand short package names (`bar` into `app-foo/bar`),
//! to split USE_EXPAND flags into groups and to warn about flags a package
//! does not know. The cleanup passes use it to drop entries for packages
//! and flags the repository does not have.

use crate::loader::{paths, TokenType};
use crate::matcher::is_wildcard_package;
use crate::{ConfigError, Result};
use regex::Regex;
use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// PMS-defined PROPERTIES values
const PROPERTIES: &[&str] = &["interactive", "live", "test_network"];

/// PMS- and Portage-defined RESTRICT values
const RESTRICTIONS: &[&str] = &[
    "fetch",
    "mirror",
    "strip",
    "test",
    "userpriv",
    "binchecks",
    "bindist",
    "installsources",
    "network-sandbox",
    "preserve-libs",
    "primaryuri",
    "splitdebug",
];

/// Source of package information
pub trait PackageMetadata {
    /// Expand a package spec to a fully qualified one.
    ///
    /// Wildcards and qualified specs pass through; a bare name gets its
    /// category.
    fn resolve(&self, spec: &str) -> Result<String>;

    /// Values valid for (package, namespace, group), `None` if unknown
    fn valid_values(
        &self,
        spec: &str,
        token_type: TokenType,
        group: Option<&str>,
    ) -> Option<HashSet<String>>;

    /// Split a USE flag into its USE_EXPAND group and name
    fn split_use_expand(&self, flag: &str) -> (Option<String>, String) {
        (None, flag.to_string())
    }

    /// Whether any package matches `spec`, `None` if it cannot be told
    fn has_package(&self, _spec: &str) -> Option<bool> {
        None
    }
}

/// Parts of a package spec, e.g. `>=` `app-foo` `bar` `-1.0:2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecParts<'a> {
    pub operator: &'a str,
    pub category: Option<&'a str>,
    pub name: &'a str,
    /// Version, slot and repository, as written
    pub suffix: &'a str,
}

impl<'a> SpecParts<'a> {
    pub fn parse(spec: &'a str) -> Self {
        let op_len = spec
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~'))
            .unwrap_or(spec.len());
        let operator = &spec[..op_len];
        let rest = &spec[op_len..];
        let key_len = rest.find(':').unwrap_or(rest.len());
        let key = &rest[..key_len];

        let (category, name_start) = match key.find('/') {
            Some(slash) => (Some(&key[..slash]), slash + 1),
            None => (None, 0),
        };
        let name_and_version = &key[name_start..];
        let name_len = if operator.is_empty() {
            name_and_version.len()
        } else {
            version_start(name_and_version).unwrap_or(name_and_version.len())
        };

        let name_end = op_len + name_start + name_len;
        Self {
            operator,
            category,
            name: &spec[op_len + name_start..name_end],
            suffix: &spec[name_end..],
        }
    }

    /// Number of `/` in the category/name part
    fn slashes(spec: &str) -> usize {
        let key_end = spec.find(':').unwrap_or(spec.len());
        spec[..key_end].matches('/').count()
    }
}

/// Index of the `-` starting the version in `name-1.0-r1`
fn version_start(s: &str) -> Option<usize> {
    s.match_indices('-')
        .map(|(idx, _)| idx)
        .find(|&idx| s[idx + 1..].starts_with(|c: char| c.is_ascii_digit()))
}

/// Validate a spec without any package information
fn validate_spec(spec: &str) -> Result<String> {
    if SpecParts::slashes(spec) != 1 {
        return Err(ConfigError::InvalidAtom(format!(
            "{}: not a valid category/package spec",
            spec
        )));
    }
    Ok(spec.to_string())
}

/// Metadata service used when no repository is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetadata;

impl PackageMetadata for NullMetadata {
    fn resolve(&self, spec: &str) -> Result<String> {
        validate_spec(spec)
    }

    fn valid_values(&self, _: &str, _: TokenType, _: Option<&str>) -> Option<HashSet<String>> {
        None
    }
}

type ValuesKey = (String, TokenType, Option<String>);

/// Metadata read from an ebuild repository tree
#[derive(Debug)]
pub struct RepositoryMetadata {
    repo: PathBuf,
    config_root: Option<PathBuf>,
    categories: OnceCell<Vec<String>>,
    use_expand: OnceCell<Vec<String>>,
    values: RefCell<HashMap<ValuesKey, Option<HashSet<String>>>>,
    variable_re: Regex,
}

impl RepositoryMetadata {
    /// Create metadata for a repository
    pub fn new(repo: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            repo: repo.into(),
            config_root: None,
            categories: OnceCell::new(),
            use_expand: OnceCell::new(),
            values: RefCell::new(HashMap::new()),
            variable_re: Regex::new(
                r#"(?m)^\s*(IUSE|KEYWORDS|LICENSE|PROPERTIES|RESTRICT)="([^"]*)""#,
            )?,
        })
    }

    /// Configuration root holding `etc/portage/env`
    pub fn with_config_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config_root = Some(root.into());
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Package categories of the repository
    pub fn categories(&self) -> &[String] {
        self.categories.get_or_init(|| {
            let listed = read_lines(&self.repo.join("profiles/categories"));
            if !listed.is_empty() {
                return listed;
            }
            let mut found: Vec<String> = list_dir(&self.repo, |p| p.is_dir())
                .into_iter()
                .filter(|name| name.contains('-') || name == "virtual")
                .collect();
            found.sort();
            found
        })
    }

    /// Prefixed USE_EXPAND group names, longest first
    pub fn use_expand_groups(&self) -> &[String] {
        self.use_expand.get_or_init(|| {
            let mut groups: Vec<String> = list_dir(&self.repo.join("profiles/desc"), |p| p.is_file())
                .into_iter()
                .filter_map(|name| name.strip_suffix(".desc").map(str::to_uppercase))
                .collect();
            groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            groups
        })
    }

    fn package_exists(&self, category: &str, name: &str) -> bool {
        self.repo.join(category).join(name).is_dir()
    }

    /// Values of ebuild variables across all ebuilds of a package
    fn ebuild_tokens(&self, category: &str, name: &str, variable: &str) -> Option<Vec<String>> {
        let pattern = self.repo.join(category).join(name).join("*.ebuild");
        let ebuilds: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .ok()?
            .filter_map(|p| p.ok())
            .collect();
        if ebuilds.is_empty() {
            return None;
        }

        let mut tokens = Vec::new();
        for ebuild in ebuilds {
            let Ok(content) = std::fs::read_to_string(&ebuild) else {
                continue;
            };
            for caps in self.variable_re.captures_iter(&content) {
                if &caps[1] == variable {
                    tokens.extend(caps[2].split_whitespace().map(str::to_string));
                }
            }
        }
        Some(tokens)
    }

    fn compute_values(
        &self,
        spec: &str,
        token_type: TokenType,
        group: Option<&str>,
    ) -> Option<HashSet<String>> {
        // env files are global
        if token_type == TokenType::EnvFile {
            let env_dir = paths::portage_dir(self.config_root.as_deref()?).join("env");
            return Some(list_dir(&env_dir, |p| p.is_file()).into_iter().collect());
        }

        if spec != "*/*" && is_wildcard_package(spec) {
            return None;
        }

        let mut values = HashSet::new();
        let all = if token_type == TokenType::Keyword { "**" } else { "*" };
        values.insert(all.to_string());
        if token_type == TokenType::License {
            values.extend(
                read_lines(&self.repo.join("profiles/license_groups"))
                    .iter()
                    .filter_map(|l| l.split_whitespace().next())
                    .map(|g| format!("@{}", g)),
            );
        }

        if spec == "*/*" {
            match token_type {
                TokenType::UseFlag => {
                    let desc = match group {
                        Some(group) => {
                            let path = self
                                .repo
                                .join("profiles/desc")
                                .join(format!("{}.desc", group.to_lowercase()));
                            if !path.is_file() {
                                debug!("USE_EXPAND group {} is not valid", group);
                                return Some(HashSet::new());
                            }
                            path
                        }
                        None => self.repo.join("profiles/use.desc"),
                    };
                    values.extend(read_desc(&desc));
                }
                TokenType::Keyword => {
                    values.extend(["*".to_string(), "~*".to_string()]);
                    for arch in read_lines(&self.repo.join("profiles/arch.list")) {
                        values.insert(format!("~{}", arch));
                        values.insert(arch);
                    }
                }
                TokenType::License => {
                    values.extend(list_dir(&self.repo.join("licenses"), |p| p.is_file()));
                }
                TokenType::Property => values.extend(PROPERTIES.iter().map(|s| s.to_string())),
                TokenType::Restrict => values.extend(RESTRICTIONS.iter().map(|s| s.to_string())),
                TokenType::EnvFile => {}
            }
            return Some(values);
        }

        let parts = SpecParts::parse(spec);
        let category = parts.category?;
        let variable = match token_type {
            TokenType::UseFlag => "IUSE",
            TokenType::Keyword => "KEYWORDS",
            TokenType::License => "LICENSE",
            TokenType::Property => "PROPERTIES",
            TokenType::Restrict => "RESTRICT",
            TokenType::EnvFile => return None,
        };
        let tokens = self.ebuild_tokens(category, parts.name, variable)?;

        match token_type {
            TokenType::UseFlag => {
                let prefix = group.map(|g| format!("{}_", g)).unwrap_or_default();
                for flag in tokens {
                    let flag = flag.trim_start_matches(['+', '-']);
                    if let Some(value) = strip_prefix_ignore_case(flag, &prefix) {
                        values.insert(value.to_string());
                    }
                }
            }
            TokenType::Keyword => {
                for keyword in tokens.into_iter().filter(|k| !k.starts_with('-')) {
                    let stability = if keyword.starts_with('~') { "~*" } else { "*" };
                    values.insert(stability.to_string());
                    values.insert(keyword);
                }
            }
            _ => {
                // collapse dependency-style syntax: ( ) || flag?
                values.extend(
                    tokens
                        .into_iter()
                        .filter(|t| !matches!(t.as_str(), "(" | ")" | "||") && !t.ends_with('?')),
                );
            }
        }
        Some(values)
    }
}

impl PackageMetadata for RepositoryMetadata {
    fn resolve(&self, spec: &str) -> Result<String> {
        if is_wildcard_package(spec) {
            return validate_spec(spec);
        }

        let parts = SpecParts::parse(spec);
        if parts.name.is_empty() {
            return Err(ConfigError::InvalidAtom(spec.to_string()));
        }

        match parts.category {
            Some(category) => {
                validate_spec(spec)?;
                if !self.package_exists(category, parts.name) {
                    return Err(ConfigError::UnknownPackage(spec.to_string()));
                }
                Ok(spec.to_string())
            }
            None => {
                let matches: Vec<String> = self
                    .categories()
                    .iter()
                    .filter(|c| self.package_exists(c, parts.name))
                    .map(|c| format!("{}/{}", c, parts.name))
                    .collect();
                match matches.as_slice() {
                    [] => Err(ConfigError::UnknownPackage(spec.to_string())),
                    [only] => {
                        let resolved = format!("{}{}{}", parts.operator, only, parts.suffix);
                        debug!("Resolved {} to {}", spec, resolved);
                        Ok(resolved)
                    }
                    _ => Err(ConfigError::AmbiguousPackage {
                        spec: spec.to_string(),
                        matches,
                    }),
                }
            }
        }
    }

    fn valid_values(
        &self,
        spec: &str,
        token_type: TokenType,
        group: Option<&str>,
    ) -> Option<HashSet<String>> {
        let key = (spec.to_string(), token_type, group.map(str::to_string));
        if let Some(cached) = self.values.borrow().get(&key) {
            return cached.clone();
        }
        let values = self.compute_values(spec, token_type, group);
        debug!(
            "Valid values for {} {} group: {:?}: {:?}",
            spec, token_type, group, values
        );
        self.values.borrow_mut().insert(key, values.clone());
        values
    }

    fn has_package(&self, spec: &str) -> Option<bool> {
        if is_wildcard_package(spec) {
            return None;
        }
        let parts = SpecParts::parse(spec);
        Some(self.package_exists(parts.category?, parts.name))
    }

    fn split_use_expand(&self, flag: &str) -> (Option<String>, String) {
        for group in self.use_expand_groups() {
            if let Some(value) = strip_prefix_ignore_case(flag, &format!("{}_", group)) {
                return (Some(group.clone()), value.to_string());
            }
        }
        (None, flag.to_string())
    }
}

/// `text` without `prefix`, compared ASCII case-insensitively
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// Non-empty, non-comment lines of a file (empty if unreadable)
fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Flag names from a `name - description` file
fn read_desc(path: &Path) -> Vec<String> {
    read_lines(path)
        .iter()
        .filter_map(|l| l.split(" - ").next())
        .map(|name| name.trim().to_string())
        .collect()
}

fn list_dir<F>(dir: &Path, keep: F) -> Vec<String>
where
    F: Fn(&Path) -> bool,
{
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| keep(&e.path()))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}
