// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: service name
fn service_arg() -> Arg {
    Arg::new("service")
        .required(true)
        .help("Service name (e.g. caddy)")
}

fn build_cli() -> Command {
    Command::new("divban")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rootless per-service users for containerized services")
        .arg(
            Arg::new("settings")
                .long("settings")
                .global(true)
                .value_name("PATH")
                .default_value("/etc/divban/divban.toml")
                .help("Path to the divban settings file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("setup")
                .about("Provision the user, directories and configuration of a service")
                .arg(service_arg())
                .arg(
                    Arg::new("config")
                        .required(true)
                        .help("Service configuration file (TOML)"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a service user, its home and its subordinate IDs")
                .arg(service_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Show the provisioned identity of a service")
                .arg(service_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
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

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("divban.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
