use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `stepweaver` - resumable plan execution with self-correction.
#[derive(Parser, Debug)]
#[command(name = "stepweaver")]
#[command(version)]
#[command(about = "Execute dependency-ordered plans and repair failing steps.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan file, or ask the oracle to plan a goal
    Submit {
        /// Plan definition (JSON)
        #[arg(required_unless_present = "goal", conflicts_with = "goal")]
        plan: Option<PathBuf>,

        /// Goal for the oracle to plan instead of a plan file
        #[arg(long)]
        goal: Option<String>,
    },

    /// Continue a stored plan from its last snapshot
    Resume {
        plan_id: String,

        /// Live plan definition the snapshot must still match
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Cancel a plan, stopping any run of it still in progress
    Cancel { plan_id: String },

    /// Show stored plans, or one plan in detail
    Status { plan_id: Option<String> },

    /// Check a plan file and print its dependency levels
    Validate { plan: PathBuf },
}
