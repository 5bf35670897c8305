use clap::Parser;
use miette::Result;
use skolemium::{
    cli::Cli,
    qcnf::QCNF,
    qdimacs::{ExtendedParseError, QdimacsParser},
    solver::Solver,
    SolverResult,
};
use std::io::Cursor;

fn main() -> Result<SolverResult> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let contents = cli.read_input()?;
    let reader = Cursor::new(&contents);

    let qcnf: QCNF = match QdimacsParser::new(reader).parse() {
        Ok(q) => q,
        Err(err) => Err(ExtendedParseError { source_code: contents, related: vec![err] })?,
    };

    let mut solver = Solver::from_qcnf(qcnf, cli.options());
    let result = solver.solve();
    println!("result status: {result}");

    if cli.qdimacs_output {
        let prefix = match result {
            SolverResult::Satisfiable => "s cnf 1",
            SolverResult::Unsatisfiable => "s cnf 0",
            SolverResult::Unknown => "s cnf -1",
        };
        println!("{prefix}");
        if result == SolverResult::Satisfiable {
            for lit in solver.certificate_constants() {
                println!("V {lit} 0");
            }
        }
    }
    if cli.certify_sat && result == SolverResult::Satisfiable {
        println!("c {} solved cases retained", solver.solved_cases().len());
    }

    Ok(result)
}
