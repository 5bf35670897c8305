//! The CEGAR engine.
//!
//! A separate existential SAT solver holds every clause whose
//! unique-consequence variable is still nondeterministic, i.e. the
//! still-quantified subproblem. The *interface* is the set of deterministic
//! variables sharing a clause with that subproblem. One round assumes the
//! interface values chosen by the Skolem solver: an unsatisfiable answer
//! refutes the candidate universal assignment for good, a satisfiable one is
//! minimized into a cube whose negation blocks the solved region.

use super::stats::CegarStats;
use crate::{
    datastructure::{contains_sorted, insert_sorted, VarVec},
    invariant_violation,
    literal::{Lit, LitSlice, Var},
    qcnf::QCNF,
    sat::{LookupSolver, SatSolver},
    solver::skolem::Skolem,
};
use derivative::Derivative;
use tracing::{debug, trace};

/// Smoothing of the recent cube size: `0.1 * new + 0.9 * old`.
const CUBE_SIZE_SMOOTHING: f64 = 0.1;
/// CEGAR counts as effective while the smoothed cube size stays below this.
const EFFECTIVENESS_THRESHOLD: f64 = 20.0;
const INTERFACE_ACTIVITY_BUMP: f64 = 1.0;
const INTERFACE_ACTIVITY_DECAY: f64 = 0.5;

/// A solved universal region, kept for certificate extraction.
#[derive(Debug, Clone)]
pub struct Cube {
    pub(crate) lits: Vec<Lit>,
    /// universal assumptions in force when the cube was emitted
    pub(crate) assumptions: Vec<Lit>,
}

impl Cube {
    /// The literals of the cube; their negations block the solved region.
    #[must_use]
    pub fn lits(&self) -> &[Lit] {
        &self.lits
    }

    /// The universal assumptions in force when this cube was recorded.
    #[must_use]
    pub fn assumptions(&self) -> &[Lit] {
        &self.assumptions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CegarRound {
    /// the candidate universal assignment admits no existential answer
    Refuted,
    /// a blocking cube of the given size was added
    Blocked(usize),
    /// the emitted cube was empty: the whole remaining space is solved
    Solved,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Cegar<S: SatSolver> {
    #[derivative(Debug = "ignore")]
    exists: LookupSolver<S>,
    interface: Vec<Var>,
    is_used_in_lemma: VarVec<bool>,
    /// sorted; literals promised to hold in the current minimization
    additional_assignment: Vec<Lit>,
    solved_cubes: Vec<Cube>,
    recent_average_cube_size: f64,
    interface_activity: VarVec<f64>,
    pub(crate) stats: CegarStats,
}

impl<S: SatSolver> Default for Cegar<S> {
    fn default() -> Self {
        Self {
            exists: LookupSolver::default(),
            interface: Vec::new(),
            is_used_in_lemma: VarVec::default(),
            additional_assignment: Vec::new(),
            solved_cubes: Vec::new(),
            recent_average_cube_size: 0.0,
            interface_activity: VarVec::default(),
            stats: CegarStats::default(),
        }
    }
}

impl<S: SatSolver> Cegar<S> {
    pub(crate) fn interface(&self) -> &[Var] {
        &self.interface
    }

    pub(crate) fn solved_cubes(&self) -> &[Cube] {
        &self.solved_cubes
    }

    pub(crate) fn is_effective(&self) -> bool {
        self.recent_average_cube_size < EFFECTIVENESS_THRESHOLD
    }

    pub(crate) fn interface_activity(&self, var: Var) -> f64 {
        self.interface_activity.get(var).copied().unwrap_or_default()
    }

    pub(crate) fn bump_interface_activity(&mut self, var: Var) {
        self.interface_activity.set_var_count(var.as_index() + 1);
        self.interface_activity[var] += INTERFACE_ACTIVITY_BUMP;
    }

    pub(crate) fn decay_interface_activity(&mut self, var: Var) {
        self.interface_activity.set_var_count(var.as_index() + 1);
        self.interface_activity[var] *= INTERFACE_ACTIVITY_DECAY;
    }

    /// Rebuilds the existential solver and the interface from the current
    /// determinicity state.
    pub(crate) fn update_interface<T: SatSolver>(&mut self, qcnf: &QCNF, skolem: &Skolem<T>) {
        self.exists = LookupSolver::default();
        self.exists.set_var_count(qcnf.var_count());
        self.is_used_in_lemma.set_var_count(qcnf.var_count());
        self.interface_activity.set_var_count(qcnf.var_count());
        let mut interface = Vec::new();
        for idx in qcnf.clause_iterator() {
            let quantified = match skolem.unique_consequence(idx) {
                Some(lit) => !skolem.is_deterministic(lit.var()),
                None => true,
            };
            if !quantified {
                continue;
            }
            let sat_lits: Vec<_> =
                qcnf.clause(idx).iter().map(|&l| self.exists.lookup(l)).collect();
            self.exists.add_clause(&sat_lits);
            for &lit in qcnf.clause(idx).iter() {
                if skolem.is_deterministic(lit.var()) {
                    interface.push(lit.var());
                }
            }
        }
        interface.sort_unstable();
        interface.dedup();
        debug!("interface vars: {:?}", interface.iter().map(|v| v.to_dimacs()).collect::<Vec<_>>());
        self.interface = interface;
    }

    /// One abstraction round against the values the Skolem solver chose for
    /// the interface.
    pub(crate) fn round<T: SatSolver>(
        &mut self,
        qcnf: &QCNF,
        skolem: &mut Skolem<T>,
        case_assumptions: &[Lit],
    ) -> Result<CegarRound, S::Err> {
        self.stats.rounds += 1;
        let mut assumptions = Vec::with_capacity(self.interface.len());
        for i in 0..self.interface.len() {
            let var = self.interface[i];
            self.is_used_in_lemma[var] = true;
            // a variable the Skolem solver left free defaults to true
            let value = skolem
                .value_in_model(var)
                .or_else(|| skolem.constant_value(var))
                .unwrap_or(true);
            let lit = self.exists.lookup(var.lit(value));
            assumptions.push(lit);
        }
        if !self.exists.solve_with_assumptions(&assumptions)? {
            trace!("existential abstraction is unsatisfiable, counterexample is genuine");
            return Ok(CegarRound::Refuted);
        }

        self.additional_assignment.clear();
        let mut cube = Vec::new();
        for i in 0..self.interface.len() {
            let var = self.interface[i];
            let value = self.exists.value(var).unwrap_or_else(|| {
                invariant_violation!("interface variable {var} unset in existential model")
            });
            if self.var_needs_to_be_set(qcnf, var, value) {
                cube.push(var.lit(!value));
            } else {
                self.is_used_in_lemma[var] = false;
            }
        }
        debug!("cegar cube: {}", LitSlice::from(cube.as_slice()));

        if cube.is_empty() {
            return Ok(CegarRound::Solved);
        }
        let size = cube.len();
        self.block(skolem, cube, case_assumptions.to_vec());
        Ok(CegarRound::Blocked(size))
    }

    /// Adds the cube to the solved list and blocks its region in the outer
    /// solver context.
    pub(crate) fn block<T: SatSolver>(
        &mut self,
        skolem: &mut Skolem<T>,
        lits: Vec<Lit>,
        assumptions: Vec<Lit>,
    ) {
        skolem.block_cube(&lits);
        self.stats.cubes += 1;
        self.recent_average_cube_size = CUBE_SIZE_SMOOTHING * lits.len() as f64
            + (1.0 - CUBE_SIZE_SMOOTHING) * self.recent_average_cube_size;
        self.solved_cubes.push(Cube { lits, assumptions });
    }

    /// Minimization rule: the literal of `var` is needed iff some clause
    /// containing it is not satisfied by another literal of the model, by an
    /// accepted additional assignment, or by flipping a still-unassigned
    /// variable without contradicting other additional assignments.
    fn var_needs_to_be_set(&mut self, qcnf: &QCNF, var: Var, value: bool) -> bool {
        let mut additional_for_var: Vec<Lit> = Vec::new();
        for &idx in qcnf.occurrences(var.lit(value)) {
            let mut satisfied_without = false;
            let mut satisfiable_by_unset: Option<Lit> = None;
            for &occ in qcnf.clause(idx).iter().filter(|l| l.var() != var) {
                let occ_value = self.exists.value(occ.var()).map(|v| v == occ.is_positive());
                if occ_value == Some(false) || !self.is_used_in_lemma[occ.var()] {
                    continue;
                }
                if occ_value == Some(true)
                    || contains_sorted(&self.additional_assignment, occ)
                    || contains_sorted(&additional_for_var, occ)
                {
                    satisfied_without = true;
                    break;
                }
                if satisfiable_by_unset.is_none()
                    && !contains_sorted(&self.additional_assignment, !occ)
                    && !contains_sorted(&additional_for_var, !occ)
                {
                    satisfied_without = true;
                    satisfiable_by_unset = Some(occ);
                }
            }
            if !satisfied_without {
                return true;
            }
            if let Some(promise) = satisfiable_by_unset {
                self.stats.additional_assignments += 1;
                insert_sorted(&mut additional_for_var, promise);
            }
        }
        if !additional_for_var.is_empty() {
            self.stats.minimizations_helped_by_additional_assignments += 1;
        }
        for promise in additional_for_var {
            insert_sorted(&mut self.additional_assignment, promise);
        }
        self.stats.successful_minimizations += 1;
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sat::varisat::Varisat;

    /// Seeds the existential solver with `clauses` and establishes a model
    /// satisfying `assumptions`.
    fn cegar_with_model(
        qcnf: &QCNF,
        clauses: &[&[i32]],
        assumptions: &[i32],
    ) -> Cegar<Varisat<'static>> {
        let mut cegar: Cegar<Varisat<'static>> = Cegar::default();
        cegar.exists.set_var_count(qcnf.var_count());
        cegar.is_used_in_lemma.set_var_count(qcnf.var_count());
        for var in qcnf.variables() {
            cegar.is_used_in_lemma[var] = true;
        }
        for clause in clauses {
            let lits: Vec<_> =
                clause.iter().map(|&l| cegar.exists.lookup(Lit::from_dimacs(l))).collect();
            cegar.exists.add_clause(&lits);
        }
        let assumed: Vec<_> =
            assumptions.iter().map(|&l| cegar.exists.lookup(Lit::from_dimacs(l))).collect();
        assert!(cegar.exists.solve_with_assumptions(&assumed).unwrap());
        cegar
    }

    #[test]
    fn satisfied_occurrences_are_minimized_away() {
        let qcnf = qcnf_formula![
            a 1 2;
            e 3;
            1 3;
            2 -3;
        ];
        let mut cegar = cegar_with_model(&qcnf, &[&[1, 3], &[2, -3]], &[1, 2, 3]);
        // the clause of 1 is satisfied by the model value of 3
        assert!(!cegar.var_needs_to_be_set(&qcnf, Var::from_dimacs(1), true));
        // the clause of 2 has its other literal falsified
        assert!(cegar.var_needs_to_be_set(&qcnf, Var::from_dimacs(2), true));
        assert_eq!(cegar.stats.successful_minimizations, 1);
    }

    #[test]
    fn unassigned_occurrences_become_additional_assignments() {
        let qcnf = qcnf_formula![
            a 1;
            e 3 4;
            1 3;
            1 4;
        ];
        // 3 and 4 are unknown to the existential solver, so the minimization
        // has to promise values for them
        let mut cegar = cegar_with_model(&qcnf, &[&[1]], &[1]);
        assert!(!cegar.var_needs_to_be_set(&qcnf, Var::from_dimacs(1), true));
        assert!(contains_sorted(&cegar.additional_assignment, Lit::from_dimacs(3)));
        assert!(contains_sorted(&cegar.additional_assignment, Lit::from_dimacs(4)));
        assert_eq!(cegar.stats.additional_assignments, 2);
        assert_eq!(cegar.stats.minimizations_helped_by_additional_assignments, 1);
    }

    #[test]
    fn conflicting_promises_keep_the_variable() {
        let qcnf = qcnf_formula![
            a 1;
            e 3;
            1 3;
            1 -3;
        ];
        // the two occurrences would need 3 and -3 promised at once
        let mut cegar = cegar_with_model(&qcnf, &[&[1]], &[1]);
        assert!(cegar.var_needs_to_be_set(&qcnf, Var::from_dimacs(1), true));
    }
}
