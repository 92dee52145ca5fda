use anyhow::{Context, Error, Result};
use binrel::{
    parse_config, Binrel, BinrelBuilder, ChmodMode, DirCacheStore, GitHubPathFile, InstallRequest,
};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use log::{error, info};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
enum BinrelError {
    #[error("{0:}")]
    InvalidArgsError(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let status = match make_run(&matches) {
        Ok((run, requests)) => install_all(&run, &requests).await,
        Err(e) => {
            print_err(&e);
            127
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

// These only make sense for a single `--repo`. With `--config` they are set per entry.
const ENTRY_ARGS: &[&str] = &[
    "tag",
    "prerelease",
    "platform",
    "arch",
    "asset-name",
    "no-extension-matching",
    "extension",
    "rename-to",
    "chmod",
    "binaries-location",
];

#[allow(clippy::too_many_lines)]
fn cmd() -> Command {
    Command::new("binrel")
        .version(env!("CARGO_PKG_VERSION"))
        .author("binrel Contributors")
        .about("Installs pre-built binaries from GitHub releases")
        .arg(Arg::new("config").long("config").short('c').help(concat!(
            "A YAML file that maps owner/repo names to the release to install for each. Every",
            " entry is installed in order. You must pass this or --repo, but not both.",
        )))
        .arg(Arg::new("repo").long("repo").short('r').help(concat!(
            "The repository to install a release from, like aquasecurity/tfsec. You must pass",
            " this or --config, but not both.",
        )))
        .arg(
            Arg::new("tag")
                .long("tag")
                .short('t')
                .help("The tag to install. Defaults to the latest release."),
        )
        .arg(
            Arg::new("prerelease")
                .long("prerelease")
                .action(ArgAction::SetTrue)
                .help(concat!(
                    "Install the newest prerelease instead of the newest full release. This is",
                    " ignored when --tag is passed.",
                )),
        )
        .arg(Arg::new("platform").long("platform").help(concat!(
            "The platform to install for, one of linux, darwin, or windows. Defaults to the",
            " platform binrel is running on.",
        )))
        .arg(Arg::new("arch").long("arch").help(concat!(
            "The CPU architecture to install for, like x64 or arm64. Defaults to the architecture",
            " binrel is running on.",
        )))
        .arg(
            Arg::new("asset-name")
                .long("asset-name")
                .short('m')
                .help(concat!(
                    "A string that the release asset name must contain. Only files whose names",
                    " contain it are installed from an archive.",
                )),
        )
        .arg(
            Arg::new("no-extension-matching")
                .long("no-extension-matching")
                .action(ArgAction::SetTrue)
                .help(concat!(
                    "Accept release assets with any extension. By default only .tar.gz, .tar.xz,",
                    " .tgz, and .zip assets are considered.",
                )),
        )
        .arg(Arg::new("extension").long("extension").help(concat!(
            "A regex that the release asset name must end with, used instead of the default",
            " extensions.",
        )))
        .arg(Arg::new("rename-to").long("rename-to").help(concat!(
            "The name to install the binary as. This is ignored when an archive contains more",
            " than one file.",
        )))
        .arg(
            Arg::new("chmod")
                .long("chmod")
                .help("An octal file mode to set on every installed binary, like 755."),
        )
        .arg(
            Arg::new("binaries-location")
                .long("binaries-location")
                .help("The directory inside the release archive that holds the binaries."),
        )
        .arg(Arg::new("tool-root").long("tool-root").help(concat!(
            "The directory that releases are installed under. Defaults to $RUNNER_TOOL_CACHE",
            " if that is set and ./.binrel/tools otherwise.",
        )))
        .arg(Arg::new("cache-dir").long("cache-dir").help(concat!(
            "A directory in which to cache installed releases. Releases installed by tag are",
            " restored from here instead of being downloaded again.",
        )))
        .arg(
            Arg::new("no-cache")
                .long("no-cache")
                .action(ArgAction::SetTrue)
                .help("Do not read from or write to the cache directory."),
        )
        .arg(Arg::new("api-base-url").long("api-base-url").help(concat!(
            "The the base URL for the GitHub API. This is useful for testing or if you want",
            " to operate against GitHub Enterprise. This should be something like",
            " `https://github.my-corp.example.com/api/v3`.",
        )))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .after_help(concat!(
            "The GITHUB_TOKEN environment variable is used to authenticate API requests and",
            " downloads. When GITHUB_PATH is set, each directory holding installed binaries is",
            " appended to that file. Otherwise it is printed.",
        ))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };

    binrel::init_logger(level)
}

/// The settings shared by every installation in one run.
#[derive(Debug)]
struct Run {
    tool_root: PathBuf,
    cache_dir: Option<PathBuf>,
    token: Option<String>,
    api_base_url: Option<String>,
    github_path: Option<PathBuf>,
}

fn make_run(matches: &ArgMatches) -> Result<(Run, Vec<InstallRequest>)> {
    validate_args(matches)?;

    let requests = if let Some(config) = matches.get_one::<String>("config") {
        let text = fs::read_to_string(config)
            .with_context(|| format!("could not read config file {config}"))?;
        parse_config(&text).with_context(|| format!("invalid config file {config}"))?
    } else {
        vec![request_from_args(matches)?]
    };

    let tool_root = match matches.get_one::<String>("tool-root") {
        Some(r) => PathBuf::from(r),
        None => non_empty_env("RUNNER_TOOL_CACHE")
            .map_or_else(|| Path::new(".binrel").join("tools"), PathBuf::from),
    };
    let cache_dir = if matches.get_flag("no-cache") {
        None
    } else {
        matches.get_one::<String>("cache-dir").map(PathBuf::from)
    };

    Ok((
        Run {
            tool_root,
            cache_dir,
            token: non_empty_env("GITHUB_TOKEN"),
            api_base_url: matches.get_one::<String>("api-base-url").cloned(),
            github_path: non_empty_env("GITHUB_PATH").map(PathBuf::from),
        },
        requests,
    ))
}

fn validate_args(matches: &ArgMatches) -> Result<()> {
    match (matches.contains_id("config"), matches.contains_id("repo")) {
        (true, true) => {
            return Err(BinrelError::InvalidArgsError(
                "You cannot combine the --config and --repo options".to_string(),
            )
            .into());
        }
        (false, false) => {
            return Err(BinrelError::InvalidArgsError(
                "You must pass a --config or --repo.".to_string(),
            )
            .into());
        }
        (true, false) | (false, true) => (),
    }

    if matches.contains_id("config") {
        for a in ENTRY_ARGS {
            if is_present(matches, a) {
                return Err(BinrelError::InvalidArgsError(format!(
                    "You cannot combine the --config and --{a} options"
                ))
                .into());
            }
        }
    }

    if matches.get_flag("no-extension-matching") && matches.contains_id("extension") {
        return Err(BinrelError::InvalidArgsError(
            "You cannot combine the --no-extension-matching and --extension options".to_string(),
        )
        .into());
    }

    Ok(())
}

fn request_from_args(matches: &ArgMatches) -> Result<InstallRequest> {
    // validate_args already checked that this is present.
    let repo = matches
        .get_one::<String>("repo")
        .map_or("", String::as_str);
    let mut req = InstallRequest::new(repo)?;

    if let Some(t) = matches.get_one::<String>("tag") {
        req.tag.clone_from(t);
    }
    req.prerelease = matches.get_flag("prerelease");
    req.platform = matches.get_one::<String>("platform").cloned();
    req.arch = matches.get_one::<String>("arch").cloned();
    req.asset_name = matches.get_one::<String>("asset-name").cloned();
    req.extension_matching = !matches.get_flag("no-extension-matching");
    req.extension = matches.get_one::<String>("extension").cloned();
    req.rename_to = matches.get_one::<String>("rename-to").cloned();
    req.chmod = matches
        .get_one::<String>("chmod")
        .map(|m| m.parse::<ChmodMode>())
        .transpose()?;
    req.binaries_location = matches
        .get_one::<String>("binaries-location")
        .map(PathBuf::from);

    Ok(req)
}

async fn install_all(run: &Run, requests: &[InstallRequest]) -> i32 {
    for req in requests {
        let binrel = match make_binrel(run, req) {
            Ok(b) => b,
            Err(e) => {
                print_err(&e);
                return 1;
            }
        };
        match binrel.install().await {
            Ok(report) => {
                let source = if report.cache_hit {
                    "the cache".to_string()
                } else {
                    report.asset.unwrap_or_default()
                };
                info!(
                    "{} is installed in {} from {source} with {} warnings",
                    req.full_name(),
                    report.bin_dir.display(),
                    report.warnings.len(),
                );
            }
            Err(e) => {
                print_err(&e.into());
                return 1;
            }
        }
    }
    0
}

fn make_binrel(run: &Run, req: &InstallRequest) -> Result<Binrel> {
    let mut builder = BinrelBuilder::from_request(req).tool_root(&run.tool_root);
    if let Some(dir) = &run.cache_dir {
        builder = builder.cache_store(Box::new(DirCacheStore::new(dir)));
    }
    if let Some(t) = &run.token {
        builder = builder.token(t);
    }
    if let Some(url) = &run.api_base_url {
        builder = builder.api_base_url(url);
    }
    if let Some(p) = &run.github_path {
        builder = builder.path_registry(Box::new(GitHubPathFile::new(p)));
    }
    builder.build()
}

// `contains_id` is always true for flags, so those need to be checked by value.
fn is_present(matches: &ArgMatches, id: &str) -> bool {
    match matches.try_get_one::<bool>(id) {
        Ok(Some(flag)) => *flag,
        Ok(None) | Err(_) => matches.contains_id(id),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn print_err(e: &Error) {
    error!("{e:#}");
    if let Some(be) = e.downcast_ref::<BinrelError>() {
        match be {
            BinrelError::InvalidArgsError(_) => {
                println!();
                if let Err(e) = cmd().print_help() {
                    eprintln!("could not print help: {e}");
                }
            }
        }
    }
}
