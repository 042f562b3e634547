use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use courtload_core::profile::LoadProfile;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    let unit = unit_str.trim();
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress and summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProfileName {
    /// Short functional sanity run with a small user pool.
    Smoke,
    /// Staged ramp to 100 users replaying full matches.
    Load,
    /// Sudden bursts to 150 and 200 users.
    Spike,
    /// Hour-long endurance run at moderate load.
    Soak,
    /// 26-minute staged run combining ramps, spikes, and endurance.
    Comprehensive,
}

impl ProfileName {
    #[must_use]
    pub fn to_profile(self) -> LoadProfile {
        match self {
            Self::Smoke => LoadProfile::smoke(),
            Self::Load => LoadProfile::load(),
            Self::Spike => LoadProfile::spike(),
            Self::Soak => LoadProfile::soak(),
            Self::Comprehensive => LoadProfile::comprehensive(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "courtload",
    author,
    version,
    about = "Load generator for the badminton scoring API",
    long_about = "courtload synthesizes rule-valid badminton matches and replays their scoring events against a running scoring API under a chosen traffic profile.\n\nEach virtual user generates an independent match, posts its events, and asserts on every response. The run fails when checks or thresholds do."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load profile against the scoring API
    #[command(
        long_about = "Run a built-in load profile. CLI flags for vus/iterations/duration override the profile's staged ramp and run a constant pool instead."
    )]
    Run(RunArgs),

    /// List the built-in load profiles
    Profiles,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Load profile to run
    #[arg(value_enum)]
    pub profile: ProfileName,

    /// Base URL of the scoring API
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Generate and log matches without sending any requests
    #[arg(
        long,
        env = "DRY_RUN",
        value_parser = clap::builder::FalseyValueParser::new(),
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub simulate: bool,

    /// Run a constant pool of this many virtual users instead of the profile's ramp
    #[arg(long)]
    pub vus: Option<u64>,

    /// Total iteration budget shared across virtual users
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Run duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Per-request timeout (e.g. 10s, 500ms)
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub request_timeout: Duration,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

impl RunArgs {
    /// The flag, `DRY_RUN`, or the legacy `SIMULATE` variable all enable
    /// simulate mode.
    #[must_use]
    pub fn simulate_requested(&self) -> bool {
        self.simulate || env_flag("SIMULATE")
    }
}

/// Truthiness matching clap's `FalseyValueParser`: empty, `0`, `n`, `no`,
/// `f`, `false`, and `off` are false, anything else is true.
fn truthy(value: &str) -> bool {
    let v = value.trim();
    !(v.is_empty()
        || matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "n" | "no" | "f" | "false" | "off"
        ))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| truthy(&v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "courtload",
            "run",
            "smoke",
            "--base-url",
            "http://localhost:9090",
            "--vus",
            "2",
            "--iterations",
            "10",
            "--duration",
            "250ms",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.profile, ProfileName::Smoke);
                assert_eq!(args.base_url, "http://localhost:9090");
                assert_eq!(args.vus, Some(2));
                assert_eq!(args.iterations, Some(10));
                assert_eq!(args.duration, Some(Duration::from_millis(250)));
                assert!(!args.simulate);
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Profiles => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_defaults_point_at_localhost() {
        let parsed = Cli::try_parse_from(["courtload", "run", "soak"]);
        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.base_url, "http://localhost:8080");
                assert_eq!(args.request_timeout, Duration::from_secs(10));
                assert_eq!(args.vus, None);
            }
            Command::Profiles => panic!("expected run command"),
        }
    }

    #[test]
    fn simulate_accepts_numeric_truthy_values() {
        let parse = |flag: &str| {
            let parsed = Cli::try_parse_from(["courtload", "run", "smoke", flag]);
            match parsed {
                Ok(Cli {
                    command: Command::Run(args),
                }) => args.simulate,
                Ok(_) => panic!("expected run command"),
                Err(err) => panic!("failed to parse {flag}: {err}"),
            }
        };

        assert!(parse("--simulate"));
        assert!(parse("--simulate=1"));
        assert!(parse("--simulate=yes"));
        assert!(!parse("--simulate=0"));
        assert!(!parse("--simulate=false"));
    }

    #[test]
    fn env_truthiness_matches_the_flag_parser() {
        for v in ["1", "true", "yes", "on", "anything"] {
            assert!(truthy(v), "{v} should be truthy");
        }
        for v in ["", "0", "false", "no", "off", "F", "  "] {
            assert!(!truthy(v), "{v} should be falsey");
        }
    }

    #[test]
    fn every_profile_name_resolves() {
        for name in [
            ProfileName::Smoke,
            ProfileName::Load,
            ProfileName::Spike,
            ProfileName::Soak,
            ProfileName::Comprehensive,
        ] {
            let profile = name.to_profile();
            assert!(!profile.stages.is_empty());
        }
    }
}
