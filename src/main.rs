mod diff;
mod directive;
mod repository;

use anyhow::{Context, Result};
use clap::Parser;
use config::{
    get_config_root, write_documents, Cleanup, ConfigLoader, NullMetadata, PackageMetadata,
    RepositoryMetadata, Settings, WriteReport,
};
use console::style;
use dialoguer::Confirm;
use directive::Session;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Edit per-package flag files (package.use, package.accept_keywords, ...)
///
/// Each request is one or more package specs followed by operations:
/// `+flag` enables, `-flag` disables, `%flag` removes declarations and
/// `?flag` shows the effective state. Prefix a flag with `kw::`, `lic::`,
/// `prop::`, `restrict::`, `env::` or a USE_EXPAND group such as
/// `python_targets::` to pick the file. Operations before any package apply
/// to `*/*`. Use `--` before requests starting with `-`. The cleanup options
/// run after all requests and need no request of their own.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Configuration root holding etc/portage
    #[arg(long = "config-root", env = "FLAGEDIT_CONFIG_ROOT")]
    config_root: Option<PathBuf>,

    /// Ebuild repository used to resolve package names (auto-detected if not specified)
    #[arg(long = "repo-path", env = "FLAGEDIT_REPO_PATH")]
    repo_path: Option<PathBuf>,

    /// Settings file path
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet output
    #[arg(short, long)]
    quiet: bool,

    /// Show the changes without writing anything
    #[arg(short, long)]
    pretend: bool,

    /// Ask for confirmation before replacing each file
    #[arg(short, long)]
    ask: bool,

    /// Show the changes made to each file
    #[arg(short, long)]
    diff: bool,

    /// Use package specs as given when they cannot be resolved
    #[arg(short, long)]
    force: bool,

    /// Remove entries for packages missing from the repository
    #[arg(long = "drop-unmatched-pkgs")]
    drop_unmatched_pkgs: bool,

    /// Remove flags their package does not know
    #[arg(long = "drop-unmatched-flags")]
    drop_unmatched_flags: bool,

    /// Remove flags overridden by a later declaration
    #[arg(long = "drop-ineffective")]
    drop_ineffective: bool,

    /// Sort entries by package name
    #[arg(long = "sort-entries")]
    sort_entries: bool,

    /// Sort flags by name
    #[arg(long = "sort-flags")]
    sort_flags: bool,

    /// Packages and operations, e.g. `dev-lang/python +sqlite -tk`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    requests: Vec<String>,
}

impl Cli {
    /// Cleanup passes selected on the command line
    fn cleanup_passes(&self) -> Vec<Cleanup> {
        [
            (self.drop_unmatched_pkgs, Cleanup::DropUnmatchedPackages),
            (self.drop_unmatched_flags, Cleanup::DropUnmatchedFlags),
            (self.drop_ineffective, Cleanup::DropIneffective),
            (self.sort_entries, Cleanup::SortEntries),
            (self.sort_flags, Cleanup::SortFlags),
        ]
        .into_iter()
        .filter_map(|(selected, pass)| selected.then_some(pass))
        .collect()
    }
}

/// How modified files are written
#[derive(Debug, Clone, Copy)]
struct WriteOptions {
    pretend: bool,
    ask: bool,
    diff: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Apply all requests and write the result; `Ok(false)` if anything failed
fn run(cli: Cli) -> Result<bool> {
    let passes = cli.cleanup_passes();
    let requests = if cli.requests.is_empty() && !passes.is_empty() {
        Vec::new()
    } else {
        directive::split_arg_sets(cli.requests.as_slice())?
    };

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::discover()?,
    };

    let config_root = cli
        .config_root
        .or(settings.config_root)
        .unwrap_or_else(get_config_root);
    debug!("Using configuration root: {}", config_root.display());

    let repo_path = cli.repo_path.or(settings.repository);
    let metadata: Box<dyn PackageMetadata> =
        match repository::detect_repository_path(repo_path.as_deref())? {
            Some(repo) => {
                debug!("Using repository: {}", repo.display());
                Box::new(RepositoryMetadata::new(repo)?.with_config_root(&config_root))
            }
            None => {
                debug!("No repository found, package names must be fully qualified");
                Box::new(NullMetadata)
            }
        };

    let loader = ConfigLoader::new(&config_root);
    let mut session = Session::load(&loader, metadata.as_ref())?;

    let mut success = true;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for request in &requests {
        for spec in &request.packages {
            let package = match metadata.resolve(spec) {
                Ok(package) => package,
                Err(e) if cli.force => {
                    warn!("{}, using {} as given", e, spec);
                    spec.clone()
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to resolve {}", spec)),
            };

            for operation in &request.operations {
                if let Err(e) = session.apply(&package, operation, &mut out) {
                    error!("{}: {:#}", package, e);
                    success = false;
                }
            }
        }
    }
    drop(out);

    if !passes.is_empty() {
        let changes = session.cleanup(&passes);
        info!("Cleanup made {} change(s)", changes);
    }

    let options = WriteOptions {
        pretend: cli.pretend,
        ask: cli.ask || settings.ask,
        diff: cli.diff || cli.pretend || cli.ask || settings.diff,
    };

    let mut report = WriteReport::default();
    for documents in session.documents_mut() {
        let written = write_documents(documents, |original, temp| {
            confirm_write(original, temp, options)
        });
        report.written.extend(written.written);
        report.declined.extend(written.declined);
        report.failed.extend(written.failed);
    }

    if options.pretend && !report.declined.is_empty() {
        println!(
            "{} Pretend mode, {} file(s) not written",
            style(">>>").yellow().bold(),
            report.declined.len()
        );
    }

    Ok(success && report.is_success())
}

/// Decide whether `original` is replaced by `temp`
fn confirm_write(original: &Path, temp: &Path, options: WriteOptions) -> bool {
    if options.diff {
        if let Err(e) = diff::print_diff(original, temp) {
            warn!("Failed to compare {}: {}", original.display(), e);
        }
    }

    if options.pretend {
        return false;
    }
    if !options.ask {
        return true;
    }

    match Confirm::new()
        .with_prompt(format!("Update {}?", original.display()))
        .default(true)
        .interact()
    {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Failed to read answer: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_options_keep_application_order() {
        let cli = Cli::parse_from(["flagedit", "--sort-flags", "--drop-ineffective"]);
        assert!(cli.requests.is_empty());
        assert_eq!(
            cli.cleanup_passes(),
            vec![Cleanup::DropIneffective, Cleanup::SortFlags]
        );
    }

    #[test]
    fn test_requests_after_options() {
        let cli = Cli::parse_from(["flagedit", "--sort-entries", "dev-foo/bar", "-doc"]);
        assert_eq!(cli.cleanup_passes(), vec![Cleanup::SortEntries]);
        assert_eq!(cli.requests, vec!["dev-foo/bar", "-doc"]);
    }
}
