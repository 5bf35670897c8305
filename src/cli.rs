//! Command-line surface of the solver binary.

use crate::solver::{DepthPenalty, Options};
use clap::{Parser, ValueEnum};
use miette::Diagnostic;
use std::{io::Read, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArgError {
    #[error("Path {} does not exist", path.display())]
    FileDoesNotExist { path: PathBuf },

    #[error("{} is not a file", path.display())]
    NotAFile { path: PathBuf },

    #[error("Cannot read file {}: {}", path.display(), err)]
    CannotReadFile { path: PathBuf, err: std::io::Error },

    #[error("Cannot read from stdin: {}", err)]
    CannotReadStdIn { err: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DepthPenaltyArg {
    Linear,
    Quadratic,
    /// reserved; the engine rejects it
    Exponential,
}

impl From<DepthPenaltyArg> for DepthPenalty {
    fn from(arg: DepthPenaltyArg) -> Self {
        match arg {
            DepthPenaltyArg::Linear => DepthPenalty::Linear,
            DepthPenaltyArg::Quadratic => DepthPenalty::Quadratic,
            DepthPenaltyArg::Exponential => DepthPenalty::Exponential,
        }
    }
}

/// A certifying QBF solver based on incremental determinization.
#[derive(Debug, Parser)]
#[command(name = "skolemium", version, about)]
pub struct Cli {
    /// Path to a QDIMACS file; read from stdin when omitted.
    pub input: Option<PathBuf>,

    /// Seed for the pseudo-random number generator.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Enable the case-split controller (default).
    #[arg(long, overrides_with = "no_case_splits")]
    pub case_splits: bool,

    /// Disable the case-split controller.
    #[arg(long)]
    pub no_case_splits: bool,

    /// Enable counterexample-guided abstraction refinement (default).
    #[arg(long, overrides_with = "no_cegar")]
    pub cegar: bool,

    /// Disable counterexample-guided abstraction refinement.
    #[arg(long)]
    pub no_cegar: bool,

    /// Track decision satisfaction literals for functional synthesis.
    #[arg(long)]
    pub functional_synthesis: bool,

    /// Retain witness data of solved cases.
    #[arg(long = "certify-SAT")]
    pub certify_sat: bool,

    /// Print statistics about the variable partitioning of the formula.
    #[arg(long)]
    pub print_detailed_miniscoping_stats: bool,

    /// Reinforcement-learning interaction mode on stdin/stdout.
    #[arg(long)]
    pub rl: bool,

    /// Emit a QDIMACS-compliant certificate line on termination.
    #[arg(long)]
    pub qdimacs_output: bool,

    /// Number of concrete example assignments kept as fast falsifiers.
    #[arg(long, default_value_t = 0)]
    pub examples: usize,

    /// Pacing of case splits by stack depth.
    #[arg(long, value_enum, default_value_t = DepthPenaltyArg::Linear)]
    pub depth_penalty: DepthPenaltyArg,

    /// Give up after this many decisions.
    #[arg(long)]
    pub decision_limit: Option<u64>,

    /// Soft time budget in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl Cli {
    #[must_use]
    pub fn options(&self) -> Options {
        Options {
            seed: self.seed,
            case_splits: !self.no_case_splits,
            cegar: !self.no_cegar,
            functional_synthesis: self.functional_synthesis,
            certify_sat: self.certify_sat,
            miniscoping_stats: self.print_detailed_miniscoping_stats,
            rl: self.rl,
            qdimacs_output: self.qdimacs_output,
            examples_max: self.examples,
            depth_penalty: self.depth_penalty.into(),
            decision_limit: self.decision_limit,
            time_limit: self.timeout.map(Duration::from_secs),
        }
    }

    /// Reads the input formula from the provided path or stdin.
    ///
    /// # Errors
    ///
    /// Fails when the path does not point to a readable file or stdin fails.
    pub fn read_input(&self) -> Result<Vec<u8>, ArgError> {
        let Some(file_path) = &self.input else {
            tracing::info!("no input file provided, reading from stdin");
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .map_err(|err| ArgError::CannotReadStdIn { err })?;
            return Ok(buffer);
        };
        if !file_path.exists() {
            return Err(ArgError::FileDoesNotExist { path: file_path.clone() });
        }
        if !file_path.is_file() {
            return Err(ArgError::NotAFile { path: file_path.clone() });
        }
        std::fs::read(file_path)
            .map_err(|err| ArgError::CannotReadFile { path: file_path.clone(), err })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["skolemium"]);
        let options = cli.options();
        assert!(options.case_splits);
        assert!(options.cegar);
        assert_eq!(options.examples_max, 0);
    }

    #[test]
    fn toggles() {
        let cli = Cli::parse_from(["skolemium", "--no-cegar", "--certify-SAT", "--seed", "7"]);
        let options = cli.options();
        assert!(!options.cegar);
        assert!(options.case_splits);
        assert!(options.certify_sat);
        assert_eq!(options.seed, 7);
    }
}
