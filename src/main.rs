use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use feed_sweep::app::Options;
use feed_sweep::config::parse_kinds;

const HELP: &str = "feed-sweep: bulk-remove your own posts older than a cutoff date.

Runs the removal engine against a simulated feed described by a YAML fixture.

  --fixture <path>      Feed fixture to rehearse against (required)
  --cutoff <YYYY-MM-DD> Remove items posted before this date
  --kinds <list>        Comma separated kinds: original,reply,quote,reshare
  --fresh               Ignore saved progress for this run
  --reset               Clear saved progress before running
  --debug               Log at debug level for this run
  --config <path>       Config file (default: ~/.config/feed-sweep/config.yaml)
  --state <path>        State database for progress and logs
  --version, -V         Show version and exit
  --help,    -h         Show this help message";

fn main() {
    if handle_cli_flags() {
        return;
    }

    let result = parse_args(std::env::args().skip(1)).and_then(feed_sweep::run);
    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("feed-sweep {}", feed_sweep::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options::default();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} expects a value"))
        };
        match arg.as_str() {
            "--fixture" => options.fixture = Some(PathBuf::from(value("--fixture")?)),
            "--config" => options.config_file = Some(PathBuf::from(value("--config")?)),
            "--state" => options.state = Some(PathBuf::from(value("--state")?)),
            "--cutoff" => {
                let raw = value("--cutoff")?;
                let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                    .with_context(|| format!("invalid --cutoff date {raw:?}"))?;
                options.cutoff = Some(date);
            }
            "--kinds" => {
                let raw = value("--kinds")?;
                let kinds = parse_kinds(&raw);
                if kinds.is_empty() {
                    bail!("--kinds lists no known kind: {raw:?}");
                }
                options.kinds = Some(kinds);
            }
            "--fresh" => options.fresh = true,
            "--reset" => options.reset = true,
            "--debug" => options.debug = true,
            other => bail!("unknown argument {other:?} (see --help)"),
        }
    }
    Ok(options)
}
