//! Reinforcement-learning interaction mode.
//!
//! A line-based protocol on stdin/stdout: the solver mirrors its internal
//! events (`clause`, `v`, `u+`/`u-`, `conflict`, `uc`, `a`), emits a state
//! vector `s …` at every decision point, and expects an integer literal back
//! on the input. `0` leaves the choice to the solver's own heuristic; the
//! chosen decision is echoed as `d <var>,<phase>`. At termination the
//! accumulated rewards are printed as `rewards …`.

use crate::{
    literal::{Lit, Var},
    qcnf::QCNF,
    solver::skolem::SkolemEvent,
};
use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RlError {
    #[error("cannot exchange messages with the learner")]
    Io(#[from] std::io::Error),

    #[error("expected an integer literal, got {0:?}")]
    NotALiteral(String),

    #[error("literal {0} does not refer to an undetermined existential")]
    IllegalDecision(i32),
}

/// Driver-scoped protocol endpoint; generic over the transport so tests can
/// drive it with in-memory buffers.
#[derive(Debug)]
pub struct RlContext<R, W> {
    input: R,
    output: W,
    rewards: Vec<f32>,
}

impl<R: BufRead, W: Write> RlContext<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, rewards: Vec::new() }
    }

    pub(crate) fn notify_event(&mut self, event: SkolemEvent) -> Result<(), RlError> {
        match event {
            SkolemEvent::UniqueConsequence(clause, lit) => {
                writeln!(self.output, "uc {clause} {lit}")?;
            }
            SkolemEvent::Deterministic(var, deterministic) => {
                writeln!(self.output, "u{} {var}", if deterministic { '+' } else { '-' })?;
            }
            SkolemEvent::Value(var, value) => writeln!(self.output, "v {var} {value}")?,
            SkolemEvent::Conflict(var) => writeln!(self.output, "conflict {var}")?,
        }
        Ok(())
    }

    pub(crate) fn notify_learned_clause(&mut self, qcnf: &QCNF, idx: crate::clause::alloc::ClauseIdx) -> Result<(), RlError> {
        let clause = qcnf.clause(idx);
        write!(self.output, "clause {idx} 1 lits")?;
        for lit in clause.iter() {
            write!(self.output, " {lit}")?;
        }
        writeln!(self.output)?;
        Ok(())
    }

    pub(crate) fn notify_activity(&mut self, var: Var, activity: f64) -> Result<(), RlError> {
        writeln!(self.output, "a {var},{activity}")?;
        Ok(())
    }

    /// Emits the state vector and reads the learner's decision. `None`
    /// leaves the choice to the solver.
    pub(crate) fn request_decision(
        &mut self,
        state: &[f64],
        legal: impl Fn(Lit) -> bool,
    ) -> Result<Option<Lit>, RlError> {
        write!(self.output, "s")?;
        for (idx, component) in state.iter().enumerate() {
            write!(self.output, "{}{component}", if idx == 0 { ' ' } else { ',' })?;
        }
        writeln!(self.output)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        let choice: i32 =
            trimmed.parse().map_err(|_| RlError::NotALiteral(trimmed.to_string()))?;
        if choice == 0 {
            return Ok(None);
        }
        let lit = Lit::from_dimacs(choice);
        if !legal(lit) {
            return Err(RlError::IllegalDecision(choice));
        }
        Ok(Some(lit))
    }

    pub(crate) fn notify_decision(&mut self, lit: Lit) -> Result<(), RlError> {
        writeln!(self.output, "d {},{}", lit.var(), i32::from(lit.is_positive()))?;
        self.rewards.push(0.0);
        Ok(())
    }

    /// Rewards the final decision once the instance is solved.
    pub(crate) fn reward_solved(&mut self) {
        if let Some(last) = self.rewards.last_mut() {
            *last = 1.0;
        }
    }

    pub(crate) fn emit_rewards(&mut self) -> Result<(), RlError> {
        write!(self.output, "rewards")?;
        for reward in &self.rewards {
            write!(self.output, " {reward}")?;
        }
        writeln!(self.output)?;
        self.output.flush()?;
        Ok(())
    }
}

/// The concrete endpoint used by the binary.
pub type StdioRlContext = RlContext<std::io::BufReader<std::io::Stdin>, std::io::Stdout>;

impl Default for StdioRlContext {
    fn default() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decision_roundtrip() {
        let input = b"3\n0\n" as &[u8];
        let mut output = Vec::new();
        let mut rl = RlContext::new(input, &mut output);

        let choice = rl.request_decision(&[1.0, 2.0], |_| true).unwrap();
        assert_eq!(choice, Some(Lit::from_dimacs(3)));
        rl.notify_decision(Lit::from_dimacs(3)).unwrap();

        let choice = rl.request_decision(&[0.0], |_| true).unwrap();
        assert_eq!(choice, None);
        rl.notify_decision(Lit::from_dimacs(-4)).unwrap();

        rl.reward_solved();
        rl.emit_rewards().unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("s 1,2\n"));
        assert!(text.contains("d 3,1\n"));
        assert!(text.contains("d 4,0\n"));
        assert!(text.contains("rewards 0 1\n"));
    }

    #[test]
    fn illegal_decision_is_rejected() {
        let input = b"7\n" as &[u8];
        let mut output = Vec::new();
        let mut rl = RlContext::new(input, &mut output);
        let result = rl.request_decision(&[], |_| false);
        assert!(matches!(result, Err(RlError::IllegalDecision(7))));
    }
}
