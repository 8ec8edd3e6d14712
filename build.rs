// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: database path
fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/var/lib/drydock/drydock.db")
        .help("Database path")
}

/// Common argument: configuration file path
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("/etc/drydock/drydock.toml")
        .help("Configuration file path")
}

fn build_cli() -> Command {
    Command::new("drydock")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Drydock Contributors")
        .about("Release planning and repository reconciliation for RPM build systems")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the drydock database")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("create")
                .about("Plan a new release from finished builds")
                .arg(Arg::new("build_ids").required(true).num_args(1..).help("Build IDs to release"))
                .arg(db_path_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("update")
                .about("Rebuild the plan of a scheduled release")
                .arg(Arg::new("release_id").required(true).help("Release ID"))
                .arg(db_path_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("commit")
                .about("Execute a scheduled release against the repository manager")
                .arg(Arg::new("release_id").required(true).help("Release ID"))
                .arg(db_path_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("revert")
                .about("Remove a completed release's content from its repositories")
                .arg(Arg::new("release_id").required(true).help("Release ID"))
                .arg(db_path_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Show a release and its plan summary")
                .arg(Arg::new("release_id").required(true).help("Release ID"))
                .arg(db_path_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("drydock.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
