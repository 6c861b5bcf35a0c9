//! Command-line parsing and logging setup for the demo.
//!
//! Supports environment variable overrides via the `FSTATE_DEMO_*` prefix,
//! on top of the library's own `FSTATE_*` configuration.

use std::env;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fstate::{Executor, StateConfig};
use tracing_subscriber::EnvFilter;

use crate::error::{DemoError, Result};
use crate::scenario::{self, Settings, Transcript};

pub const ENV_DELAY_MS: &str = "FSTATE_DEMO_DELAY_MS";
pub const ENV_INSTANCES: &str = "FSTATE_DEMO_INSTANCES";

#[derive(Debug, Parser)]
#[command(
    name = "fstate-demo",
    about = "Walk through fstate containers, instances, and joining policies",
    version,
    after_help = "Environment:\n    FSTATE_DEMO_DELAY_MS      Override --delay-ms\n    FSTATE_DEMO_INSTANCES     Override --instances\n    FSTATE_TRACE_TRANSITIONS  Per-transition trace events (1/0)\n    FSTATE_CATCH_ERRORS       Catch synchronous mutation failures by default (1/0)\n    FSTATE_UNDO_STACK_LENGTH  Undo history length per container\n    RUST_LOG                  Log filter (overrides --verbose)"
)]
pub struct Cli {
    /// Which scenario to run.
    #[arg(long, value_enum, default_value_t = ScenarioName::All)]
    pub scenario: ScenarioName,

    /// Delay of every asynchronous step, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,

    /// Number of instances in the joining scenarios.
    #[arg(long, default_value_t = 3)]
    pub instances: usize,

    /// Wait for delays on the wall clock instead of a simulated one.
    #[arg(long)]
    pub real_time: bool,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioName {
    Counter,
    NewInstance,
    Combined,
    All,
}

impl Cli {
    /// Apply `FSTATE_DEMO_*` overrides. Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_DELAY_MS)
            && let Ok(ms) = val.trim().parse()
        {
            self.delay_ms = ms;
        }
        if let Some(val) = lookup(ENV_INSTANCES)
            && let Ok(n) = val.trim().parse()
        {
            self.instances = n;
        }
        self
    }

    fn settings(&self) -> Result<Settings> {
        if self.instances == 0 {
            return Err(DemoError::InvalidArgument {
                message: "--instances must be at least 1".into(),
            });
        }
        Ok(Settings {
            delay: Duration::from_millis(self.delay_ms),
            instances: self.instances,
            config: StateConfig::from_env(),
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse().with_env_overrides();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);
    let settings = cli.settings()?;
    let exec = if cli.real_time {
        Executor::new()
    } else {
        Executor::lab()
    };
    tracing::info!(
        scenario = ?cli.scenario,
        delay_ms = cli.delay_ms,
        instances = settings.instances,
        lab = exec.is_lab(),
        "starting demo"
    );

    let transcript = Transcript::default();
    match cli.scenario {
        ScenarioName::Counter => scenario::counter(&exec, &settings, &transcript)?,
        ScenarioName::NewInstance => scenario::new_instance_value(&exec, &settings, &transcript)?,
        ScenarioName::Combined => scenario::combined_instances(&exec, &settings, &transcript)?,
        ScenarioName::All => {
            scenario::counter(&exec, &settings, &transcript)?;
            scenario::new_instance_value(&exec, &settings, &transcript)?;
            scenario::combined_instances(&exec, &settings, &transcript)?;
        }
    }
    print!("{transcript}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fstate-demo").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.scenario, ScenarioName::All);
        assert_eq!(cli.delay_ms, 1000);
        assert_eq!(cli.instances, 3);
        assert!(!cli.real_time);
    }

    #[test]
    fn flags_parse() {
        let cli = parse(&["--scenario", "new-instance", "--delay-ms", "5", "--instances", "2", "-v"]);
        assert_eq!(cli.scenario, ScenarioName::NewInstance);
        assert_eq!(cli.delay_ms, 5);
        assert_eq!(cli.instances, 2);
        assert!(cli.verbose);
    }

    #[test]
    fn env_overrides_flags() {
        let env: HashMap<&str, &str> = [(ENV_DELAY_MS, "20"), (ENV_INSTANCES, "oops")].into();
        let cli = parse(&["--delay-ms", "5"]).with_overrides(|name: &str| env.get(name).map(|v| (*v).to_string()));
        assert_eq!(cli.delay_ms, 20);
        assert_eq!(cli.instances, 3);
    }

    #[test]
    fn zero_instances_rejected() {
        let cli = parse(&["--instances", "0"]);
        assert!(matches!(cli.settings(), Err(DemoError::InvalidArgument { .. })));
    }
}
