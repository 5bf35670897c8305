//! Conflict analysis: first-UIP resolution over the reason DAG formed by
//! unique consequences.
//!
//! The conflict comes with a model of the auxiliary solver, i.e. concrete
//! values for the universals and all deterministic variables. A clause is a
//! usable reason for a derived literal iff every other literal is falsified
//! by those values. Decision variables and universals have no reason and
//! stay in the learned clause.

use super::{DecLvl, Solver};
use crate::{
    clause::alloc::ClauseIdx,
    invariant, invariant_violation,
    literal::{Lit, LitSlice, Var},
    solver::skolem::Conflict,
};
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default)]
pub(crate) struct ConflictAnalysis {
    clause: Vec<Lit>,
    current_level_count: usize,
}

impl ConflictAnalysis {
    pub(crate) fn clause(&self) -> &[Lit] {
        &self.clause
    }

    fn reset(&mut self) {
        self.clause.clear();
        self.current_level_count = 0;
    }
}

/// A literal is falsified by the conflict model iff the variable carries the
/// opposite value.
fn falsified(values: &HashMap<Var, bool>, lit: Lit) -> bool {
    values.get(&lit.var()) == Some(&!lit.is_positive())
}

impl Solver {
    /// Derives the learned clause for `conflict` and returns the level to
    /// backtrack to, or `Err(())` if the conflict proves unsatisfiability.
    pub(crate) fn analyze(&mut self, conflict: &Conflict) -> Result<DecLvl, ()> {
        self.conflict_analysis.reset();
        self.activity.bump(conflict.var);
        let current = self.skolem.decision_lvl();

        match conflict.clause {
            Some(idx) => {
                let lits: Vec<Lit> = self.qcnf.clause(idx).lits().to_vec();
                for lit in lits {
                    self.add_literal(lit);
                }
            }
            None => {
                for lit in [conflict.var.positive(), conflict.var.negative()] {
                    let reason = self.find_reason(conflict, lit).unwrap_or_else(|| {
                        invariant_violation!(
                            "conflict on {} without a firing antecedent for {lit}",
                            conflict.var
                        )
                    });
                    let others: Vec<Lit> = self
                        .qcnf
                        .clause(reason)
                        .iter()
                        .copied()
                        .filter(|l| l.var() != conflict.var)
                        .collect();
                    for other in others {
                        self.add_literal(other);
                    }
                }
            }
        }
        debug!(
            "conflict clause before analysis: {}",
            LitSlice::from(self.conflict_analysis.clause())
        );

        if self.conflict_analysis.current_level_count == 0 {
            let max_lvl = self.clause_level_max();
            if max_lvl == DecLvl::ROOT {
                trace!("conflict is independent of all decisions");
                return Err(());
            }
            let backtrack_to = self.backtrack_level_excluding(max_lvl);
            self.activity.decay();
            return Ok(backtrack_to);
        }

        if self.conflict_analysis.current_level_count > 1 {
            self.resolve_to_first_uip(conflict, current);
        }
        invariant!(
            self.conflict_analysis.current_level_count <= 1,
            "conflict analysis left {} literals on the current level",
            self.conflict_analysis.current_level_count
        );
        let backtrack_to = self.backtrack_level_excluding(current);
        self.activity.decay();
        debug!("learned clause {}", LitSlice::from(self.conflict_analysis.clause()));
        Ok(backtrack_to)
    }

    fn clause_level_max(&self) -> DecLvl {
        self.conflict_analysis
            .clause
            .iter()
            .map(|&l| self.skolem.lit_decision_lvl(l.var()))
            .max()
            .unwrap_or(DecLvl::ROOT)
    }

    fn backtrack_level_excluding(&self, exclude: DecLvl) -> DecLvl {
        self.conflict_analysis
            .clause
            .iter()
            .map(|&l| self.skolem.lit_decision_lvl(l.var()))
            .filter(|&lvl| lvl != exclude)
            .max()
            .unwrap_or(DecLvl::ROOT)
    }

    fn resolve_to_first_uip(&mut self, conflict: &Conflict, current: DecLvl) {
        // antecedent variables are always determinized before their
        // consequence, so one backward sweep over the trail suffices
        let trail: Vec<Var> = self.skolem.trail().to_vec();
        for &var in trail.iter().rev() {
            if self.conflict_analysis.current_level_count <= 1 {
                break;
            }
            let Some(pos) = self.conflict_analysis.clause.iter().position(|l| l.var() == var)
            else {
                continue;
            };
            if self.skolem.lit_decision_lvl(var) != current || self.skolem.is_decision(var) {
                continue;
            }
            let falsified_lit = self.conflict_analysis.clause[pos];
            let derived = !falsified_lit;
            let Some(reason) = self.find_reason(conflict, derived) else {
                invariant_violation!("no reason clause for derived literal {derived}");
            };
            trace!("resolving {falsified_lit} with clause {}", self.qcnf.clause(reason));
            self.conflict_analysis.clause.swap_remove(pos);
            self.conflict_analysis.current_level_count -= 1;
            let others: Vec<Lit> =
                self.qcnf.clause(reason).iter().copied().filter(|l| l.var() != var).collect();
            for other in others {
                self.add_literal(other);
            }
        }
    }

    /// A clause with unique consequence `lit` whose antecedent fires under
    /// the conflict model.
    fn find_reason(&self, conflict: &Conflict, lit: Lit) -> Option<ClauseIdx> {
        self.qcnf
            .occurrences(lit)
            .iter()
            .copied()
            .filter(|&idx| self.skolem.unique_consequence(idx) == Some(lit))
            .find(|&idx| {
                self.qcnf
                    .clause(idx)
                    .iter()
                    .filter(|l| l.var() != lit.var())
                    .all(|&other| falsified(&conflict.values, other))
            })
    }

    fn add_literal(&mut self, lit: Lit) {
        if self.conflict_analysis.clause.contains(&lit) {
            return;
        }
        self.conflict_analysis.clause.push(lit);
        let var = lit.var();
        self.activity.bump(var);
        if self.qcnf.is_universal(var) {
            self.cegar.bump_interface_activity(var);
            return;
        }
        if self.skolem.lit_decision_lvl(var) == self.skolem.decision_lvl() {
            self.conflict_analysis.current_level_count += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Truth-table check: every assignment satisfying all premises also
    /// satisfies the conclusion.
    fn implied_by(premises: &[&[i32]], conclusion: &[Lit], num_vars: u32) -> bool {
        for bits in 0..(1_u32 << num_vars) {
            let holds = |lit: i32| {
                let value = bits & (1 << (lit.unsigned_abs() - 1)) != 0;
                if lit > 0 {
                    value
                } else {
                    !value
                }
            };
            let premises_hold = premises.iter().all(|clause| clause.iter().any(|&l| holds(l)));
            if premises_hold && !conclusion.iter().any(|&l| holds(l.to_dimacs())) {
                return false;
            }
        }
        true
    }

    /// Deciding 2 forces 3, and then both polarities of 4 fire at x1 = 1.
    /// First-UIP analysis must resolve the forced literal out through its
    /// reason clause, keep the decision literal, and produce a clause that
    /// is implied by the originals.
    #[test]
    fn first_uip_resolution_learns_original_consequence() {
        let matrix: [&[i32]; 5] = [&[2, 3], &[-2, 3], &[-1, -2, -4], &[-3, 4], &[1, 3, 4]];
        let qcnf = qcnf_formula![
            a 1;
            e 2 3 4;
            2 3;
            -2 3;
            -1 -2 -4;
            -3 4;
            1 3 4;
        ];
        let mut solver = Solver::from_qcnf_default(qcnf);
        solver.skolem.initialize(&solver.qcnf);
        solver.seed_decision_heap();
        solver.skolem.propagate(&mut solver.qcnf).unwrap();
        assert!(!solver.skolem.is_conflicted());

        solver.skolem.push();
        solver.skolem.decide(&solver.qcnf, Lit::from_dimacs(2)).unwrap();
        solver.skolem.propagate(&mut solver.qcnf).unwrap();
        assert!(solver.skolem.is_deterministic(Var::from_dimacs(3)));
        assert!(solver.skolem.is_conflicted());

        let conflict = solver.skolem.conflict().cloned().unwrap();
        assert_eq!(conflict.var, Var::from_dimacs(4));
        let backtrack = solver.analyze(&conflict).expect("conflict depends on the decision");
        assert_eq!(backtrack, DecLvl::ROOT);

        let learned = solver.conflict_analysis.clause().to_vec();
        let mut as_dimacs: Vec<i32> = learned.iter().map(|l| l.to_dimacs()).collect();
        as_dimacs.sort_unstable();
        // the forced literal -3 was resolved out, the decision literal stays
        assert_eq!(as_dimacs, vec![-2, -1]);
        assert!(implied_by(&matrix, &learned, 4));
    }

    /// A clause violated independently of all decisions has no backtrack
    /// level: the analysis reports unsatisfiability.
    #[test]
    fn conflicts_below_every_decision_prove_unsatisfiability() {
        let qcnf = qcnf_formula![
            a 1;
            e 2;
            1 2;
            -1 2;
        ];
        let mut solver = Solver::from_qcnf_default(qcnf);
        solver.skolem.initialize(&solver.qcnf);
        solver.seed_decision_heap();
        solver.skolem.propagate(&mut solver.qcnf).unwrap();
        assert!(solver.skolem.is_deterministic(Var::from_dimacs(2)));
        assert!(!solver.skolem.is_conflicted());

        // a clause contradicting the root-level function, learned on a
        // deeper level
        solver.skolem.push();
        let idx = solver
            .qcnf
            .new_clause(&[Lit::from_dimacs(-1), Lit::from_dimacs(-2)], false, true)
            .unwrap()
            .expect("not a tautology");
        solver.skolem.new_clause(&solver.qcnf, idx);
        solver.skolem.propagate(&mut solver.qcnf).unwrap();

        let conflict = solver.skolem.conflict().cloned().unwrap();
        assert_eq!(conflict.clause, Some(idx));
        assert!(solver.analyze(&conflict).is_err());
    }
}
