use anyhow::{Context, Result};
use storage_lp::domain::ParameterDocument;
use storage_lp::optimizer::{self, GoodLpSolver, SolveOutcome, StorageResult};
use storage_lp::{config::Config, telemetry::init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load().context("failed to load configuration")?;

    let document = ParameterDocument::load(&cfg.input.parameters_path)?;
    let (store, timesteps) = document.into_parts()?;
    info!(
        path = %cfg.input.parameters_path.display(),
        storages = store.len(),
        timesteps = timesteps.len(),
        "loaded storage parameters"
    );

    let problem = optimizer::build(&store, timesteps, cfg.model.build_options()?)
        .context("failed to build storage model")?;
    for (tag, count) in problem.summary() {
        info!(rule = tag, count, "constraint summary");
    }

    let solver = GoodLpSolver::new(cfg.solver.backend);
    let (problem, outcome) = optimizer::solve(problem, &solver, cfg.solver.timeout())
        .await
        .context("solve failed")?;

    let solution = match outcome {
        SolveOutcome::Solved(solution) => solution,
        SolveOutcome::Infeasible => anyhow::bail!("storage model is infeasible (build {})", problem.id),
        SolveOutcome::Unbounded => anyhow::bail!("storage model is unbounded (build {})", problem.id),
    };

    for result in StorageResult::collect(&problem, &solution) {
        info!(
            pair = %result.pair,
            power = result.power,
            capacity = result.capacity,
            new_power = result.new_power,
            new_capacity = result.new_capacity,
            final_soc = result.final_soc(),
            "storage result"
        );
    }
    info!(objective = solution.objective, "done");
    Ok(())
}
