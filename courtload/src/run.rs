use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

use courtload_core::runner;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let profile = args.profile.to_profile();
    let cfg = runner::RunConfig {
        base_url: args.base_url.clone(),
        simulate: args.simulate_requested(),
        vus: args.vus,
        iterations: args.iterations,
        duration: args.duration,
        request_timeout: args.request_timeout,
    };

    out.print_header(&profile, &cfg);
    let progress = out.progress();

    let report = runner::run_profile(profile, cfg, progress)
        .await
        .map_err(|err| match err {
            runner::Error::Join(_) => RunError::RuntimeError(err.into()),
            _ => RunError::InvalidInput(err.into()),
        })?;

    out.print_summary(&report)
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_quality_gates(
        report.summary.checks_failed > 0,
        !report.violations.is_empty(),
    ))
}

pub fn list_profiles() {
    for profile in [
        courtload_core::profile::LoadProfile::smoke(),
        courtload_core::profile::LoadProfile::load(),
        courtload_core::profile::LoadProfile::spike(),
        courtload_core::profile::LoadProfile::soak(),
        courtload_core::profile::LoadProfile::comprehensive(),
    ] {
        let max_vus = profile
            .stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(profile.start_vus);
        let total = profile.total_secs();
        println!(
            "{:<14} stages={:<2} total={}m{}s max_vus={}",
            profile.name,
            profile.stages.len(),
            total / 60,
            total % 60,
            max_vus,
        );
    }
}
