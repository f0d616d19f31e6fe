// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pkglog::config::{Config, DEFAULT_CONFIG_PATH};
use pkglog::db::{Database, PackageStatus, RemoveOptions, StdinConfirm};
use pkglog::install::{Destination, InstallOptions, InstallSession, locate_shim};
use pkglog::output::{self, FileColumns, ListColumns, SizeUnit};
use pkglog::packages::SortKey;
use pkglog::paths::{PathList, clear_path, current_dir_name};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pkglog")]
#[command(author, version, about = "Track the files installed from source and remove them safely", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "PKGLOG_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding the package logs (overrides LOGDIR)
    #[arg(short = 'L', long, global = true, value_name = "DIR")]
    logdir: Option<PathBuf>,

    /// Verbose output (-vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Apply to every logged package
    #[arg(short, long, global = true)]
    all: bool,

    /// Match package names exactly, version included
    #[arg(short = 'x', long, global = true)]
    exact: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by listing commands
#[derive(Args)]
struct SortArgs {
    /// Sort by name, size, files or date (any prefix works)
    #[arg(short = 'S', long, value_name = "KEY", default_value = "name")]
    sort: SortKey,

    /// Reverse the sort order
    #[arg(short = 'R', long)]
    reverse: bool,

    /// Print a TOTAL line
    #[arg(short = 't', long)]
    total: bool,

    /// Print sizes
    #[arg(short = 's', long)]
    size: bool,

    /// Print sizes in units of SIZE bytes (e.g. 1, 4k, 1M)
    #[arg(short = 'b', long, value_name = "SIZE", conflicts_with = "kilobytes")]
    block_size: Option<SizeUnit>,

    /// Print sizes in kilobytes
    #[arg(short = 'k', long)]
    kilobytes: bool,
}

impl SortArgs {
    fn unit(&self) -> SizeUnit {
        match (self.block_size, self.kilobytes) {
            (Some(unit), _) => unit,
            (None, true) => SizeUnit::Blocks(1024),
            (None, false) => SizeUnit::Human,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List logged packages
    List {
        /// Packages to list (all of them if omitted)
        packages: Vec<String>,
        #[command(flatten)]
        sort: SortArgs,
        /// Print the number of files
        #[arg(short = 'F', long)]
        nfiles: bool,
        /// Print the install date (-dd adds the hour)
        #[arg(short = 'd', long, action = clap::ArgAction::Count)]
        date: u8,
        /// Print JSON instead of columns
        #[arg(long)]
        json: bool,
    },
    /// List the files of packages
    Files {
        packages: Vec<String>,
        #[command(flatten)]
        sort: SortArgs,
        /// Print symlink targets
        #[arg(short = 'y', long)]
        symlinks: bool,
        /// Do not print the package name above its files
        #[arg(short = 'z', long)]
        no_package_name: bool,
    },
    /// Print package information
    Info {
        packages: Vec<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the configure options used to build packages
    ConfOpts { packages: Vec<String> },
    /// Print the packages owning the given files
    Query {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove packages and their files
    Remove {
        packages: Vec<String>,
        /// Do not ask for confirmation
        #[arg(short = 'B', long)]
        batch: bool,
        /// Colon-separated paths never removed (overrides REMOVE_SKIP)
        #[arg(short = 'e', long, value_name = "LIST")]
        skip: Option<String>,
        /// Only delete the logs, leave the files in place
        #[arg(short = 'U', long)]
        unlog: bool,
    },
    /// Delete package logs without removing any file
    Unlog {
        packages: Vec<String>,
        /// Do not ask for confirmation
        #[arg(short = 'B', long)]
        batch: bool,
    },
    /// Log the files installed by a command, or listed on stdin
    Log {
        /// Name of the package to log
        #[arg(short = 'p', long, value_name = "NAME", conflicts_with = "dirname")]
        package: Option<String>,
        /// Use the name of the current directory as package name
        #[arg(short = 'D', long)]
        dirname: bool,
        /// Add the files to an already logged package
        #[arg(short = '+', long)]
        append: bool,
        /// Keep going if the command fails
        #[arg(short = 'g', long)]
        ignore_errors: bool,
        /// Log files that no longer exist
        #[arg(short = 'm', long)]
        log_missing: bool,
        /// Colon-separated paths to log (overrides INCLUDE)
        #[arg(short = 'I', long, value_name = "LIST")]
        include: Option<String>,
        /// Colon-separated paths to skip (overrides EXCLUDE)
        #[arg(short = 'E', long, value_name = "LIST")]
        exclude: Option<String>,
        /// Interception library to preload (overrides SHIM)
        #[arg(long, value_name = "PATH")]
        shim: Option<PathBuf>,
        /// Install command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Generate shell completion scripts
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("pkglog: {:#}", err);
            err.downcast_ref::<pkglog::Error>()
                .map(pkglog::Error::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

/// Load the database with the packages named on the command line
///
/// Returns false if some name matched nothing.
fn select(db: &mut Database, names: &[String], all: bool, exact: bool) -> Result<bool> {
    if all || names.is_empty() {
        db.scan_all()?;
        return Ok(true);
    }

    let mut found_all = true;
    for result in db.match_by_name(names, exact)? {
        if !result.found() {
            eprintln!("pkglog: {}: Package not logged", result.query);
            found_all = false;
        }
    }
    Ok(found_all)
}

fn require_names(names: &[String], all: bool) -> Result<()> {
    if names.is_empty() && !all {
        return Err(pkglog::Error::InvalidArgument(
            "no packages specified (use -a for all)".to_string(),
        )
        .into());
    }
    Ok(())
}

fn status(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let Cli {
        config: config_path,
        logdir,
        verbose,
        all,
        exact,
        command,
    } = cli;

    let mut config = Config::load(&config_path)?;
    if let Some(logdir) = logdir {
        config.logdir = logdir;
    }
    debug!("Log directory: {}", config.logdir.display());

    let mut db = Database::new(&config.logdir);

    match command {
        Commands::List {
            packages,
            sort,
            nfiles,
            date,
            json,
        } => {
            let found = select(&mut db, &packages, all, exact)?;
            db.sort(sort.sort, sort.reverse);

            let mut out = io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, db.packages())?;
                writeln!(out)?;
            } else {
                let cols = ListColumns {
                    sizes: sort.size,
                    nfiles,
                    date: date > 0,
                    hour: date > 1,
                    totals: sort.total,
                    unit: sort.unit(),
                };
                output::write_package_list(&mut out, db.packages(), (db.total_size(), db.total_files()), &cols)?;
            }
            Ok(status(found))
        }
        Commands::Files {
            packages,
            sort,
            symlinks,
            no_package_name,
        } => {
            require_names(&packages, all)?;
            let found = select(&mut db, &packages, all, exact)?;
            db.sort(SortKey::Name, false);
            db.sort_files(sort.sort, sort.reverse)?;

            let cols = FileColumns {
                sizes: sort.size,
                symlinks,
                no_name: no_package_name,
                totals: sort.total,
                unit: sort.unit(),
            };
            output::write_file_list(&mut io::stdout().lock(), db.packages(), &cols)?;
            Ok(status(found))
        }
        Commands::Info { packages, json } => {
            require_names(&packages, all)?;
            let found = select(&mut db, &packages, all, exact)?;
            db.sort(SortKey::Name, false);

            let mut out = io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, db.packages())?;
                writeln!(out)?;
            } else {
                for (i, pkg) in db.packages().iter().enumerate() {
                    if i > 0 {
                        writeln!(out)?;
                    }
                    output::write_info(&mut out, pkg)?;
                }
            }
            Ok(status(found))
        }
        Commands::ConfOpts { packages } => {
            require_names(&packages, all)?;
            let found = select(&mut db, &packages, all, exact)?;
            db.sort(SortKey::Name, false);

            let mut out = io::stdout().lock();
            let many = db.len() > 1;
            for pkg in db.packages() {
                if many {
                    writeln!(out, "{}:", pkg.name())?;
                }
                writeln!(out, "{}", pkg.header().conf_opts)?;
            }
            Ok(status(found))
        }
        Commands::Query { paths } => {
            db.scan_all()?;
            db.sort(SortKey::Name, false);

            let mut out = io::stdout().lock();
            let mut all_owned = true;
            for path in &paths {
                let path = clear_path(path);
                let owners = db.owners_of(&path)?;
                all_owned &= !owners.is_empty();

                write!(out, "{}:", path)?;
                for pkg in owners {
                    write!(out, "  {}", pkg.name())?;
                }
                writeln!(out)?;
            }
            Ok(status(all_owned))
        }
        Commands::Remove {
            packages,
            batch,
            skip,
            unlog,
        } => {
            let skip = match skip {
                Some(list) => PathList::parse(&list)?,
                None => config.remove_skip.clone(),
            };
            remove(&config, &mut db, &packages, all, exact, RemoveOptions { skip, batch, unlog_only: unlog })
        }
        Commands::Unlog { packages, batch } => {
            let opts = RemoveOptions {
                batch,
                unlog_only: true,
                ..RemoveOptions::default()
            };
            remove(&config, &mut db, &packages, all, exact, opts)
        }
        Commands::Log {
            package,
            dirname,
            append,
            ignore_errors,
            log_missing,
            include,
            exclude,
            shim,
            command,
        } => {
            let name = match (package, dirname) {
                (Some(name), _) => Some(name),
                (None, true) => Some(current_dir_name()?),
                (None, false) => None,
            };

            let mut opts = InstallOptions::from_config(&config);
            if let Some(list) = include {
                opts.include = PathList::parse(&list)?;
            }
            if let Some(list) = exclude {
                opts.exclude = PathList::parse(&list)?;
            }
            opts.append = append;
            opts.ignore_errors = ignore_errors;
            opts.log_missing = log_missing;
            opts.debug = verbose > 1;

            if name.is_some() {
                config.ensure_logdir(true)?;
            }

            let mut session = InstallSession::new(opts);
            if command.is_empty() {
                session.read_paths(io::stdin().lock())?;
            } else {
                let shim = locate_shim(shim.as_deref().or(config.shim.as_deref()))?;
                session.run(&command, &shim)?;
            }

            match name {
                Some(name) => {
                    session.commit(Destination::Package { name: &name, logdir: &config.logdir })?;
                }
                None => {
                    session.commit(Destination::Output(&mut io::stdout().lock()))?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pkglog", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn remove(
    config: &Config,
    db: &mut Database,
    packages: &[String],
    all: bool,
    exact: bool,
    opts: RemoveOptions,
) -> Result<ExitCode> {
    require_names(packages, all)?;
    config
        .ensure_logdir(false)
        .with_context(|| format!("cannot write to {}", config.logdir.display()))?;

    let found = select(db, packages, all, exact)?;
    db.sort(SortKey::Name, false);

    let reports = db.remove(&opts, &mut StdinConfirm)?;

    let mut ok = found;
    for report in &reports {
        for failure in report.failures() {
            eprintln!("pkglog: {}: cannot remove", failure.path);
            ok = false;
        }
        match &report.status {
            PackageStatus::Failed(reason) => {
                eprintln!("pkglog: {}: {}", report.name, reason);
                ok = false;
            }
            PackageStatus::Declined => info!("Kept package '{}'", report.name),
            PackageStatus::Removed | PackageStatus::Unlogged => {}
        }
    }
    Ok(status(ok))
}
