//! Command-line directives
//!
//! Arguments are grouped into requests: one or more package specs followed
//! by one or more operations such as `+flag`, `-kw::~amd64` or `%`.

use anyhow::{anyhow, bail, Result};
use config::{
    namespace_into_token_group, Cleanup, ConfigLoader, Document, PackageMetadata, Resolver,
    TokenType, ALL_PACKAGES,
};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, warn};

/// Kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `+flag`
    Enable,
    /// `-flag`
    Disable,
    /// `%flag`, remove declarations
    Reset,
    /// `?flag`, print the effective state
    Query,
}

/// Operation prefixes
pub const ACTIONS: &[(char, Action)] = &[
    ('+', Action::Enable),
    ('-', Action::Disable),
    ('%', Action::Reset),
    ('?', Action::Query),
];

impl Action {
    pub fn from_prefix(c: char) -> Option<Self> {
        ACTIONS
            .iter()
            .find(|(prefix, _)| *prefix == c)
            .map(|(_, action)| *action)
    }

    /// Whether the operation needs a flag name
    pub fn requires_name(self) -> bool {
        matches!(self, Action::Enable | Action::Disable)
    }
}

/// A single operation such as `-python_targets::python3_11`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub action: Action,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

/// Packages and the operations applied to each of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub packages: Vec<String>,
    pub operations: Vec<Operation>,
}

fn is_operation(arg: &str) -> bool {
    arg.chars()
        .next()
        .and_then(Action::from_prefix)
        .is_some()
}

/// Parse an operation argument
pub fn split_op(arg: &str) -> Result<Operation> {
    let mut chars = arg.chars();
    let action = chars
        .next()
        .and_then(Action::from_prefix)
        .ok_or_else(|| anyhow!("{}: not an operation", arg))?;
    let rest = chars.as_str();

    let (namespace, name) = match rest.split_once("::") {
        Some(("", _)) => bail!("{}: empty namespace", arg),
        Some((namespace, name)) => (Some(namespace.to_string()), name),
        None => (None, rest),
    };
    let name = (!name.is_empty()).then(|| name.to_string());

    if name.is_none() && action.requires_name() {
        bail!("{}: flag name required", arg);
    }

    Ok(Operation {
        action,
        namespace,
        name,
    })
}

/// Group arguments into requests
///
/// Operations given before any package apply to `*/*`.
pub fn split_arg_sets<S: AsRef<str>>(args: &[S]) -> Result<Vec<Request>> {
    if args.is_empty() {
        bail!("no packages or operations given");
    }

    let mut requests = Vec::new();
    let mut packages: Vec<String> = Vec::new();
    let mut operations = Vec::new();

    for arg in args.iter().map(AsRef::as_ref) {
        if arg.is_empty() {
            bail!("empty argument");
        }
        if is_operation(arg) {
            operations.push(split_op(arg)?);
            continue;
        }
        if !operations.is_empty() {
            requests.push(finish_request(
                std::mem::take(&mut packages),
                std::mem::take(&mut operations),
            ));
        }
        packages.push(arg.to_string());
    }

    if operations.is_empty() {
        bail!("no operations given for {}", packages.join(" "));
    }
    requests.push(finish_request(packages, operations));
    Ok(requests)
}

fn finish_request(mut packages: Vec<String>, operations: Vec<Operation>) -> Request {
    if packages.is_empty() {
        packages.push(ALL_PACKAGES.to_string());
    }
    Request {
        packages,
        operations,
    }
}

/// Loaded documents of every namespace plus the services working on them
pub struct Session<'a> {
    resolver: Resolver,
    metadata: &'a dyn PackageMetadata,
    documents: BTreeMap<TokenType, Vec<Document>>,
}

impl<'a> Session<'a> {
    /// Load the documents of every namespace
    pub fn load(loader: &ConfigLoader, metadata: &'a dyn PackageMetadata) -> Result<Self> {
        let mut documents = BTreeMap::new();
        for token_type in TokenType::ALL {
            documents.insert(token_type, loader.load(token_type)?);
        }
        Ok(Self::with_documents(documents, metadata))
    }

    pub fn with_documents(
        documents: BTreeMap<TokenType, Vec<Document>>,
        metadata: &'a dyn PackageMetadata,
    ) -> Self {
        Self {
            resolver: Resolver::new(),
            metadata,
            documents,
        }
    }

    pub fn documents(&self, token_type: TokenType) -> &[Document] {
        self.documents
            .get(&token_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All documents, in namespace order
    pub fn documents_mut(&mut self) -> impl Iterator<Item = &mut Vec<Document>> + '_ {
        self.documents.values_mut()
    }

    /// Apply one operation to an already resolved package
    pub fn apply(&mut self, package: &str, op: &Operation, out: &mut dyn Write) -> Result<()> {
        let (token_type, mut group) = match &op.namespace {
            Some(namespace) => namespace_into_token_group(namespace)?,
            None => (TokenType::UseFlag, None),
        };
        let mut name = op.name.clone();

        if token_type == TokenType::UseFlag && group.is_none() {
            if let Some(flag) = &name {
                let (split_group, split_name) = self.metadata.split_use_expand(flag);
                if split_group.is_some() {
                    debug!("{} is in USE_EXPAND group {:?}", flag, split_group);
                    group = split_group;
                    name = Some(split_name);
                }
            }
        }

        let target = Target {
            package,
            token_type,
            group: group.as_deref(),
            name: name.as_deref(),
        };
        match op.action {
            Action::Enable => self.set_flag(&target, true),
            Action::Disable => self.set_flag(&target, false),
            Action::Reset => self.reset_flag(&target),
            Action::Query => self.query_flag(&target, out),
        }
    }

    /// Run the requested cleanup passes over every namespace, in
    /// [`Cleanup::ALL`] order. Returns the number of changes.
    pub fn cleanup(&mut self, passes: &[Cleanup]) -> usize {
        let mut changes = 0;
        for pass in Cleanup::ALL.into_iter().filter(|pass| passes.contains(pass)) {
            for (token_type, documents) in &mut self.documents {
                changes += self
                    .resolver
                    .cleanup(documents, *token_type, self.metadata, pass);
            }
        }
        changes
    }

    fn set_flag(&mut self, target: &Target<'_>, state: bool) -> Result<()> {
        let name = target
            .name
            .ok_or_else(|| anyhow!("flag name required"))?;
        self.check_flag(target, name);

        let documents = self.documents.entry(target.token_type).or_default();
        self.resolver
            .mangle_flag(documents, target.package, target.group, name, state)?;
        Ok(())
    }

    fn reset_flag(&mut self, target: &Target<'_>) -> Result<()> {
        let documents = self.documents.entry(target.token_type).or_default();
        let touched =
            self.resolver
                .remove_flag(documents, target.package, target.group, target.name)?;
        debug!(
            "Removed {} {:?} from {} entries for {}",
            target.token_type,
            target.name.unwrap_or("*"),
            touched,
            target.package
        );
        Ok(())
    }

    fn query_flag(&self, target: &Target<'_>, out: &mut dyn Write) -> Result<()> {
        let documents = self.documents(target.token_type);

        let Some(name) = target.name else {
            let prefix = target
                .group
                .map(|g| format!("{}_", g.to_lowercase()))
                .unwrap_or_default();
            for (flag, enabled) in self.resolver.effective_flags(documents, target.package) {
                if flag.starts_with(&prefix) {
                    writeln!(out, "{} {}{}", target.package, if enabled { "" } else { "-" }, flag)?;
                }
            }
            return Ok(());
        };

        let full = config::package_file::full_name(target.group, name);
        match self
            .resolver
            .effective_flag(documents, target.package, target.group, name)
        {
            Some(found) => writeln!(
                out,
                "{} {}: {} ({}:{}: {} {})",
                target.package,
                full,
                if found.enabled { "enabled" } else { "disabled" },
                found.path.display(),
                found.line,
                found.package,
                found.flag
            )?,
            None => writeln!(out, "{} {}: not set", target.package, full)?,
        }
        Ok(())
    }

    /// Warn about flags the package does not know
    fn check_flag(&self, target: &Target<'_>, name: &str) {
        let Some(values) =
            self.metadata
                .valid_values(target.package, target.token_type, target.group)
        else {
            return;
        };
        if !values.contains(name) {
            let full = config::package_file::full_name(target.group, name);
            warn!(
                "{} seems to be an incorrect {} flag for {}",
                full, target.token_type, target.package
            );
        }
    }
}

struct Target<'a> {
    package: &'a str,
    token_type: TokenType,
    group: Option<&'a str>,
    name: Option<&'a str>,
}
