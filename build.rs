// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: target root directory
fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .default_value(".")
        .help("Target root directory")
}

/// Common argument: repository directory
fn repository_arg() -> Arg {
    Arg::new("repository")
        .short('R')
        .long("repository")
        .value_name("DIR")
        .help("Repository directory")
}

fn build_cli() -> Command {
    Command::new("keystone")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Keystone Contributors")
        .about("Transactional component installer with full rollback")
        .arg(root_arg())
        .arg(repository_arg())
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .action(ArgAction::SetTrue)
                .help("Non-interactive mode"),
        )
        .arg(
            Arg::new("dry-run")
                .short('n')
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Print the plan without executing"),
        )
        .subcommand(
            Command::new("install")
                .about("Install components")
                .arg(Arg::new("components").num_args(1..).required(true)),
        )
        .subcommand(
            Command::new("update")
                .about("Update components; empty selection updates everything eligible")
                .arg(Arg::new("components").num_args(0..)),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Uninstall components")
                .arg(Arg::new("components").num_args(1..).required(true)),
        )
        .subcommand(Command::new("list").about("List available components"))
        .subcommand(Command::new("status").about("Show installed components and sessions"))
        .subcommand(Command::new("recover").about("Resolve interrupted sessions"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = match env::var_os("OUT_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => return Ok(()),
    };

    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cli = build_cli();
    let man = Man::new(cli.clone());
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)?;
    fs::write(man_dir.join("keystone.1"), buffer)?;

    for subcommand in cli.get_subcommands() {
        let name = format!("keystone-{}", subcommand.get_name());
        let man = Man::new(subcommand.clone().name(name.clone()));
        let mut buffer: Vec<u8> = Vec::new();
        man.render(&mut buffer)?;
        fs::write(man_dir.join(format!("{}.1", name)), buffer)?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
