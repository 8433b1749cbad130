//! CLI for valuerank — condition grids, stability verdicts, final-trial plans
//! and run analyses for model decision evaluations.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "valuerank")]
#[command(about = "valuerank — how consistently do models decide, and how many more samples do we need")]
#[command(version = valuerank_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the full analysis document for a run: per-model statistics,
    /// model agreement, dimension impact, variance and contested scenarios.
    Analyze {
        /// Run file (JSON: run_id, outcomes, scenario_dimensions)
        #[arg(long)]
        input: String,

        /// Engine config JSON; omitted keys use defaults
        #[arg(long)]
        config: Option<String>,

        /// Write the analysis document as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Show the condition grid with per-cell SEM and stability verdicts
    Grid {
        #[arg(long)]
        input: String,

        /// First scenario attribute (grid rows)
        #[arg(long)]
        attribute_a: String,

        /// Second scenario attribute (grid columns)
        #[arg(long)]
        attribute_b: String,

        /// Comma-separated model ids (default: every model in the run)
        #[arg(long)]
        models: Option<String>,

        #[arg(long)]
        config: Option<String>,
    },

    /// Plan final-trial samples per model and condition, optionally under a budget
    Plan {
        #[arg(long)]
        input: String,

        #[arg(long)]
        attribute_a: String,

        #[arg(long)]
        attribute_b: String,

        /// Comma-separated model ids (default: every model in the run)
        #[arg(long)]
        models: Option<String>,

        /// Spending cap in USD; requires a --cost for every planned model
        #[arg(long)]
        budget_usd: Option<f64>,

        /// Per-job price, repeatable: --cost gpt-4o=0.012
        #[arg(long = "cost", value_name = "MODEL=USD")]
        costs: Vec<String>,

        #[arg(long)]
        config: Option<String>,

        /// Write the plan as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Replay a burst of recompute triggers for a run through the coordinator
    Replay {
        #[arg(long)]
        input: String,

        /// Triggers per burst
        #[arg(long, default_value = "50")]
        triggers: usize,

        /// Override the debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            config,
            output,
        } => commands::analyze::run(&input, config.as_deref(), output.as_deref()),
        Commands::Grid {
            input,
            attribute_a,
            attribute_b,
            models,
            config,
        } => commands::grid::run(commands::grid::GridCommandConfig {
            input_path: &input,
            attribute_a: &attribute_a,
            attribute_b: &attribute_b,
            models: models.as_deref(),
            config_path: config.as_deref(),
        }),
        Commands::Plan {
            input,
            attribute_a,
            attribute_b,
            models,
            budget_usd,
            costs,
            config,
            output,
        } => commands::plan::run(commands::plan::PlanCommandConfig {
            input_path: &input,
            attribute_a: &attribute_a,
            attribute_b: &attribute_b,
            models: models.as_deref(),
            budget_usd,
            costs: &costs,
            config_path: config.as_deref(),
            output_path: output.as_deref(),
        }),
        Commands::Replay {
            input,
            triggers,
            debounce_ms,
            config,
        } => commands::replay::run(&input, triggers, debounce_ms, config.as_deref()),
    }
}
