use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use draftgate_cli::{load_rules, run_simulator, SimulatorConfig};
use draftgate_core::EngineSettings;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("draftgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Draft-and-apply consistency tooling")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("fingerprint")
                .about("Print the rules fingerprint of a rule configuration")
                .arg(
                    Arg::new("rules")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Rule configuration file (.json, .yaml, .yml, .toml)"),
                )
                .arg(
                    Arg::new("canonical")
                        .long("canonical")
                        .action(ArgAction::SetTrue)
                        .help("Also print the canonical form that is hashed"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run preview, generate, apply and re-apply against a JSON catalog")
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of target records"),
                )
                .arg(
                    Arg::new("rules")
                        .long("rules")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Rule configuration file"),
                )
                .arg(
                    Arg::new("project")
                        .long("project")
                        .default_value("default")
                        .help("Project the scope query targets"),
                )
                .arg(
                    Arg::new("playbook")
                        .long("playbook")
                        .default_value("simulate")
                        .help("Playbook id drafts are filed under"),
                )
                .arg(
                    Arg::new("missing-field")
                        .long("missing-field")
                        .default_value("seo_title")
                        .help("Field to fill; scope is records missing it"),
                )
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .value_parser(value_parser!(usize))
                        .help("Preview sample size"),
                )
                .arg(
                    Arg::new("fail-writes")
                        .long("fail-writes")
                        .value_delimiter(',')
                        .help("Target ids whose first write fails"),
                )
                .arg(
                    Arg::new("settings")
                        .long("settings")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine settings file (.toml, .yaml, .yml)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn fingerprint(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("rules")
        .context("missing rules path")?;
    let rules = load_rules(path)?;
    println!("{}", rules.fingerprint());
    if args.get_flag("canonical") {
        println!("{}", rules.to_canonical_string());
    }
    Ok(())
}

async fn simulate(args: &ArgMatches) -> Result<bool> {
    let catalog = args
        .get_one::<PathBuf>("catalog")
        .context("missing catalog path")?;
    let rules = args
        .get_one::<PathBuf>("rules")
        .context("missing rules path")?;

    let mut config = SimulatorConfig::new(catalog, rules);
    if let Some(project) = args.get_one::<String>("project") {
        config.project.clone_from(project);
    }
    if let Some(playbook) = args.get_one::<String>("playbook") {
        config.playbook.clone_from(playbook);
    }
    if let Some(field) = args.get_one::<String>("missing-field") {
        config.field.clone_from(field);
    }
    config.sample = args.get_one::<usize>("sample").copied();
    config.fail_writes = args
        .get_many::<String>("fail-writes")
        .map(|ids| ids.cloned().collect())
        .unwrap_or_default();
    if let Some(path) = args.get_one::<PathBuf>("settings") {
        config.settings = EngineSettings::from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?;
    }

    let report = run_simulator(config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("fingerprint", args)) => fingerprint(args),
        Some(("simulate", args)) => {
            let passed = simulate(args).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        _ => Ok(()),
    }
}
