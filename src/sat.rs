//! Generic SAT solver interface that supports incremental solving.
//!
//! Assumption-scoped reasoning is implemented through *context literals*:
//! [`ContextStack::push`] allocates a fresh literal that guards every clause
//! added on that level, and [`ContextStack::pop`] permanently asserts its
//! negation. This is the canonical way to emulate push/pop on an incremental
//! solver that only offers assumptions.

use derivative::Derivative;

use crate::{
    datastructure::VarVec,
    literal::{Lit, Var},
};

#[cfg(feature = "cryptominisat")]
pub(crate) mod cmsat;
pub(crate) mod varisat;

/// Incremental SAT solver interface.
///
/// We assume variables to be index-based, such that mapping from
/// [`crate::literal::Lit`] to [`SatSolver::Lit`] is cheap.
pub(crate) trait SatSolver: Default {
    type Lit: SatSolverLit;
    type Err: std::error::Error + 'static;

    fn add_variable(&mut self) -> Self::Lit;
    fn add_clause(&mut self, lits: &[Self::Lit]);
    fn solve_with_assumptions(&mut self, assumptions: &[Self::Lit]) -> Result<bool, Self::Err>;
    fn model(&mut self) -> Option<&[Self::Lit]>;
    fn failed_assumptions(&mut self) -> Option<&[Self::Lit]>;

    fn add_variables(&mut self, variables: usize) {
        (0..variables).for_each(|_| {
            self.add_variable();
        });
    }
    fn solve(&mut self) -> Result<bool, Self::Err> {
        self.solve_with_assumptions(&[])
    }
}

pub(crate) trait SatSolverLit: Copy + Eq + std::ops::Not<Output = Self> {}

/// Maps formula variables lazily onto solver variables.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct LookupSolver<S: SatSolver> {
    #[derivative(Debug = "ignore")]
    sat_solver: S,
    #[derivative(Debug = "ignore")]
    var_lookup: VarVec<Option<S::Lit>>,
}

impl<S: SatSolver> Default for LookupSolver<S> {
    fn default() -> Self {
        Self { sat_solver: Default::default(), var_lookup: VarVec::default() }
    }
}

impl<S: SatSolver> LookupSolver<S> {
    pub(crate) fn set_var_count(&mut self, count: usize) {
        self.var_lookup.set_var_count(count);
    }

    pub(crate) fn lookup(&mut self, lit: Lit) -> S::Lit {
        let sat_var =
            *self.var_lookup[lit.var()].get_or_insert_with(|| self.sat_solver.add_variable());
        if lit.is_negative() {
            !sat_var
        } else {
            sat_var
        }
    }

    /// Returns the truth value the last model assigns to `var`, if any.
    pub(crate) fn value(&mut self, var: Var) -> Option<bool> {
        let mapped = self.var_lookup.get(var).copied().flatten()?;
        let model = self.sat_solver.model()?;
        if model.contains(&mapped) {
            Some(true)
        } else if model.contains(&!mapped) {
            Some(false)
        } else {
            None
        }
    }

    pub(crate) fn orig_model(&mut self) -> Option<Vec<Lit>> {
        let model = self.sat_solver.model()?;
        Some(
            self.var_lookup
                .iter()
                .filter_map(|(var, &mapped)| {
                    let mapped = mapped?;
                    if model.contains(&mapped) {
                        Some(Lit::positive(var))
                    } else if model.contains(&!mapped) {
                        Some(Lit::negative(var))
                    } else {
                        None
                    }
                })
                .collect(),
        )
    }
}

impl<S: SatSolver> SatSolver for LookupSolver<S> {
    type Lit = S::Lit;
    type Err = S::Err;

    fn add_variable(&mut self) -> Self::Lit {
        self.sat_solver.add_variable()
    }

    fn add_clause(&mut self, lits: &[Self::Lit]) {
        self.sat_solver.add_clause(lits);
    }

    fn solve_with_assumptions(&mut self, assumptions: &[Self::Lit]) -> Result<bool, Self::Err> {
        self.sat_solver.solve_with_assumptions(assumptions)
    }

    fn model(&mut self) -> Option<&[Self::Lit]> {
        self.sat_solver.model()
    }

    fn failed_assumptions(&mut self) -> Option<&[Self::Lit]> {
        self.sat_solver.failed_assumptions()
    }
}

/// Assumption-based push/pop on top of an incremental solver.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct ContextStack<S: SatSolver> {
    #[derivative(Debug = "ignore")]
    solver: S,
    #[derivative(Debug = "ignore")]
    contexts: Vec<S::Lit>,
}

impl<S: SatSolver> Default for ContextStack<S> {
    fn default() -> Self {
        Self { solver: S::default(), contexts: Vec::default() }
    }
}

impl<S: SatSolver> ContextStack<S> {
    pub(crate) fn solver(&mut self) -> &mut S {
        &mut self.solver
    }

    pub(crate) fn push(&mut self) {
        let context = self.solver.add_variable();
        self.contexts.push(context);
    }

    pub(crate) fn pop(&mut self) {
        let context = self.contexts.pop().expect("pop is matched by a previous push");
        // clauses guarded by the context are permanently satisfied
        self.solver.add_clause(&[!context]);
    }

    /// Adds a clause that is retracted when the current context is popped.
    /// With no context active, the clause is permanent.
    pub(crate) fn add_clause(&mut self, lits: &[S::Lit]) {
        match self.contexts.last() {
            Some(&context) => {
                let mut guarded = Vec::with_capacity(lits.len() + 1);
                guarded.extend_from_slice(lits);
                guarded.push(!context);
                self.solver.add_clause(&guarded);
            }
            None => self.solver.add_clause(lits),
        }
    }

    /// Adds a clause that survives all pops.
    pub(crate) fn add_permanent_clause(&mut self, lits: &[S::Lit]) {
        self.solver.add_clause(lits);
    }

    pub(crate) fn solve_with_assumptions(
        &mut self,
        assumptions: &[S::Lit],
    ) -> Result<bool, S::Err> {
        let all: Vec<_> = self.contexts.iter().copied().chain(assumptions.iter().copied()).collect();
        self.solver.solve_with_assumptions(&all)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub(crate) fn test_basic<S: SatSolver>() -> Result<(), Box<dyn std::error::Error>> {
        let mut solver = S::default();

        // create variables
        let x = solver.add_variable();
        let y = solver.add_variable();
        let z = solver.add_variable();

        solver.add_clause(&[!x, y]);
        solver.add_clause(&[!y, z]);
        assert!(solver.solve()?);

        solver.add_clause(&[!z, x]);
        assert!(solver.solve()?);

        let model = solver.model().unwrap();
        assert!(
            [x, y, z].into_iter().all(|lit| model.contains(&lit))
                || [!x, !y, !z].into_iter().all(|lit| model.contains(&lit))
        );

        // solve with assumptions
        let ignore_clauses = solver.add_variable();
        solver.add_clause(&[ignore_clauses, !z, !y]);
        solver.add_clause(&[ignore_clauses, z, y]);

        assert!(!solver.solve_with_assumptions(&[!ignore_clauses])?);

        solver.add_clause(&[ignore_clauses]);
        assert!(solver.solve()?);

        Ok(())
    }

    #[test]
    fn context_stack() -> Result<(), Box<dyn std::error::Error>> {
        let mut contexts = ContextStack::<crate::sat::varisat::Varisat>::default();
        let x = contexts.solver().add_variable();

        contexts.add_clause(&[x]);
        assert!(contexts.solve_with_assumptions(&[])?);

        contexts.push();
        contexts.add_clause(&[!x]);
        assert!(!contexts.solve_with_assumptions(&[])?);

        contexts.pop();
        assert!(contexts.solve_with_assumptions(&[])?);
        Ok(())
    }
}
