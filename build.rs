// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn flag(name: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn packages() -> Arg {
    Arg::new("packages").num_args(0..).help("Package names")
}

fn sort_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("sort")
            .short('S')
            .long("sort")
            .value_name("KEY")
            .default_value("name")
            .help("Sort by name, size, files or date"),
    )
    .arg(flag("reverse", 'R', "Reverse the sort order"))
    .arg(flag("total", 't', "Print a TOTAL line"))
    .arg(flag("size", 's', "Print sizes"))
    .arg(
        Arg::new("block-size")
            .short('b')
            .long("block-size")
            .value_name("SIZE")
            .help("Print sizes in units of SIZE bytes"),
    )
    .arg(flag("kilobytes", 'k', "Print sizes in kilobytes"))
}

fn build_cli() -> Command {
    Command::new("pkglog")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkglog Contributors")
        .about("Track the files installed from source and remove them safely")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("/etc/pkglog.conf")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("logdir")
                .short('L')
                .long("logdir")
                .value_name("DIR")
                .help("Directory holding the package logs"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Verbose output (-vv for debug)"),
        )
        .arg(flag("all", 'a', "Apply to every logged package"))
        .arg(flag("exact", 'x', "Match package names exactly, version included"))
        .subcommand(
            sort_args(Command::new("list").about("List logged packages"))
                .arg(packages())
                .arg(flag("nfiles", 'F', "Print the number of files"))
                .arg(
                    Arg::new("date")
                        .short('d')
                        .long("date")
                        .action(ArgAction::Count)
                        .help("Print the install date (-dd adds the hour)"),
                )
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print JSON")),
        )
        .subcommand(
            sort_args(Command::new("files").about("List the files of packages"))
                .arg(packages())
                .arg(flag("symlinks", 'y', "Print symlink targets"))
                .arg(flag("no-package-name", 'z', "Do not print the package name above its files")),
        )
        .subcommand(
            Command::new("info")
                .about("Print package information")
                .arg(packages())
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print JSON")),
        )
        .subcommand(
            Command::new("conf-opts")
                .about("Print the configure options used to build packages")
                .arg(packages()),
        )
        .subcommand(
            Command::new("query")
                .about("Print the packages owning the given files")
                .arg(Arg::new("paths").required(true).num_args(1..).help("Files to look up")),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove packages and their files")
                .arg(packages())
                .arg(flag("batch", 'B', "Do not ask for confirmation"))
                .arg(
                    Arg::new("skip")
                        .short('e')
                        .long("skip")
                        .value_name("LIST")
                        .help("Colon-separated paths never removed"),
                )
                .arg(flag("unlog", 'U', "Only delete the logs, leave the files in place")),
        )
        .subcommand(
            Command::new("unlog")
                .about("Delete package logs without removing any file")
                .arg(packages())
                .arg(flag("batch", 'B', "Do not ask for confirmation")),
        )
        .subcommand(
            Command::new("log")
                .about("Log the files installed by a command, or listed on stdin")
                .arg(
                    Arg::new("package")
                        .short('p')
                        .long("package")
                        .value_name("NAME")
                        .help("Name of the package to log"),
                )
                .arg(flag("dirname", 'D', "Use the name of the current directory as package name"))
                .arg(flag("append", '+', "Add the files to an already logged package"))
                .arg(flag("ignore-errors", 'g', "Keep going if the command fails"))
                .arg(flag("log-missing", 'm', "Log files that no longer exist"))
                .arg(
                    Arg::new("include")
                        .short('I')
                        .long("include")
                        .value_name("LIST")
                        .help("Colon-separated paths to log"),
                )
                .arg(
                    Arg::new("exclude")
                        .short('E')
                        .long("exclude")
                        .value_name("LIST")
                        .help("Colon-separated paths to skip"),
                )
                .arg(
                    Arg::new("shim")
                        .long("shim")
                        .value_name("PATH")
                        .help("Interception library to preload"),
                )
                .arg(
                    Arg::new("command")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Install command"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("pkglog.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
