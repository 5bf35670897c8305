//! The examples engine: a bounded set of concrete partial assignments used
//! as fast falsifiers. Before the engine commits to a decision literal, every
//! example adopts it through plain unit propagation; a propagation conflict
//! in any example is a cheap proof that the polarity is doomed.

use super::DecLvl;
use crate::{
    clause::alloc::ClauseIdx,
    datastructure::{undo::UndoStack, VarVec},
    literal::{Lit, Var},
    qcnf::QCNF,
};
use rand::{rngs::SmallRng, Rng};
use std::collections::BTreeSet;
use tracing::trace;

/// Truth value of a variable in a partial assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Val {
    /// unassigned
    #[default]
    Top,
    True,
    False,
    /// over-constrained
    Bottom,
}

impl Val {
    fn from_lit(lit: Lit) -> Self {
        if lit.is_positive() {
            Val::True
        } else {
            Val::False
        }
    }

    fn satisfies(self, lit: Lit) -> bool {
        self == Val::from_lit(lit)
    }

    fn falsifies(self, lit: Lit) -> bool {
        self == Val::from_lit(!lit)
    }
}

#[derive(Debug)]
enum PaOp {
    Value { var: Var, prev: Val },
    Dlvl { var: Var, prev: Option<DecLvl> },
    Antecedent { var: Var, prev: Option<ClauseIdx> },
    Conflict,
}

/// One concrete valuation of the universals plus forward unit propagation.
#[derive(Debug, Default)]
pub(crate) struct PartialAssignment {
    vals: VarVec<Val>,
    antecedent: VarVec<Option<ClauseIdx>>,
    decision_lvls: VarVec<Option<DecLvl>>,
    decision_lvl: DecLvl,
    /// clauses to re-check, smallest first
    worklist: BTreeSet<(usize, ClauseIdx)>,
    conflicted_clause: Option<ClauseIdx>,
    conflicted_var: Option<Var>,
    stack: UndoStack<PaOp>,
}

impl PartialAssignment {
    fn new(qcnf: &QCNF) -> Self {
        let mut pa = Self::default();
        pa.vals.set_var_count(qcnf.var_count());
        pa.antecedent.set_var_count(qcnf.var_count());
        pa.decision_lvls.set_var_count(qcnf.var_count());
        for idx in qcnf.clause_iterator() {
            if qcnf.clause(idx).len() == 1 {
                pa.worklist.insert((1, idx));
            }
        }
        pa
    }

    pub(crate) fn value(&self, var: Var) -> Val {
        self.vals[var]
    }

    pub(crate) fn is_conflicted(&self) -> bool {
        self.conflicted_clause.is_some()
    }

    pub(crate) fn conflicted_var(&self) -> Option<Var> {
        self.conflicted_var
    }

    pub(crate) fn antecedent(&self, var: Var) -> Option<ClauseIdx> {
        self.antecedent[var]
    }

    pub(crate) fn decision_lvl_of(&self, var: Var) -> Option<DecLvl> {
        self.decision_lvls[var]
    }

    fn push(&mut self) {
        self.decision_lvl = self.decision_lvl.successor();
        self.stack.push();
    }

    fn pop(&mut self) {
        self.worklist.clear();
        self.decision_lvl = self.decision_lvl.predecessor();
        let mut stack = std::mem::take(&mut self.stack);
        stack.pop(|op| self.undo(op));
        self.stack = stack;
    }

    fn undo(&mut self, op: PaOp) {
        match op {
            PaOp::Value { var, prev } => self.vals[var] = prev,
            PaOp::Dlvl { var, prev } => self.decision_lvls[var] = prev,
            PaOp::Antecedent { var, prev } => self.antecedent[var] = prev,
            PaOp::Conflict => {
                self.conflicted_clause = None;
                self.conflicted_var = None;
            }
        }
    }

    fn enter_conflict(&mut self, clause: ClauseIdx, var: Var) {
        self.stack.record(PaOp::Conflict);
        self.stack.record(PaOp::Value { var, prev: self.vals[var] });
        self.vals[var] = Val::Bottom;
        self.conflicted_clause = Some(clause);
        self.conflicted_var = Some(var);
        trace!("partial assignment conflict in clause {clause}");
    }

    pub(crate) fn assign(&mut self, qcnf: &QCNF, lit: Lit, antecedent: Option<ClauseIdx>) {
        let var = lit.var();
        let prev = self.vals[var];
        debug_assert_eq!(prev, Val::Top);
        self.stack.record(PaOp::Value { var, prev });
        self.stack.record(PaOp::Dlvl { var, prev: self.decision_lvls[var] });
        self.stack.record(PaOp::Antecedent { var, prev: self.antecedent[var] });
        self.vals[var] = Val::from_lit(lit);
        self.decision_lvls[var] = Some(self.decision_lvl);
        self.antecedent[var] = antecedent;
        // clauses that lost this literal need a fresh look
        for &idx in qcnf.occurrences(!lit) {
            self.worklist.insert((qcnf.clause(idx).len(), idx));
        }
    }

    pub(crate) fn propagate(&mut self, qcnf: &QCNF) {
        while let Some((_, idx)) = self.worklist.pop_first() {
            if self.is_conflicted() {
                return;
            }
            let clause = qcnf.clause(idx);
            if !clause.active || clause.iter().any(|&l| self.vals[l.var()].satisfies(l)) {
                continue;
            }
            let mut unassigned = clause.iter().filter(|&&l| self.vals[l.var()] == Val::Top);
            match (unassigned.next(), unassigned.next()) {
                (None, _) => {
                    let var = clause.iter().next().map(|l| l.var()).expect("clause is not empty");
                    self.enter_conflict(idx, var);
                    return;
                }
                (Some(&unit), None) => {
                    self.assign(qcnf, unit, Some(idx));
                }
                _ => {}
            }
        }
    }
}

/// The engine: a set of partial assignments that move in lockstep with the
/// solver's decision levels.
#[derive(Debug, Default)]
pub(crate) struct Examples {
    max_num: usize,
    examples: Vec<PartialAssignment>,
    /// current push depth; late-added examples are fast-forwarded to it
    depth: usize,
    pub(crate) conflicted: Option<usize>,
}

impl Examples {
    pub(crate) fn new(max_num: usize) -> Self {
        Self { max_num, examples: Vec::new(), depth: 0, conflicted: None }
    }

    pub(crate) fn initialize(&mut self, qcnf: &QCNF, rng: &mut SmallRng) {
        for _ in 0..self.max_num {
            if let Some(pa) = Self::new_assignment_random(qcnf, rng) {
                self.examples.push(pa);
            }
        }
    }

    /// Samples uniform universal values and propagates.
    pub(crate) fn new_assignment_random(qcnf: &QCNF, rng: &mut SmallRng) -> Option<PartialAssignment> {
        let mut pa = PartialAssignment::new(qcnf);
        for var in qcnf.variables().filter(|&v| qcnf.is_universal(v)).collect::<Vec<_>>() {
            pa.assign(qcnf, var.lit(rng.gen()), None);
        }
        pa.propagate(qcnf);
        // an example that conflicts on its own is useless as a falsifier
        (!pa.is_conflicted()).then_some(pa)
    }

    /// Builds an example from universal values chosen by the Skolem solver,
    /// with random completion of the universals it left free.
    pub(crate) fn new_assignment_from_values(
        qcnf: &QCNF,
        rng: &mut SmallRng,
        mut universal_value: impl FnMut(Var) -> Option<bool>,
    ) -> Option<PartialAssignment> {
        let mut pa = PartialAssignment::new(qcnf);
        for var in qcnf.variables().filter(|&v| qcnf.is_universal(v)).collect::<Vec<_>>() {
            let value = universal_value(var).unwrap_or_else(|| rng.gen());
            pa.assign(qcnf, var.lit(value), None);
        }
        pa.propagate(qcnf);
        (!pa.is_conflicted()).then_some(pa)
    }

    pub(crate) fn add(&mut self, mut pa: PartialAssignment) {
        if self.has_capacity() {
            for _ in 0..self.depth {
                pa.push();
            }
            self.examples.push(pa);
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.examples.len() < self.max_num
    }

    pub(crate) fn len(&self) -> usize {
        self.examples.len()
    }

    pub(crate) fn push(&mut self) {
        self.depth += 1;
        for pa in &mut self.examples {
            pa.push();
        }
    }

    pub(crate) fn pop(&mut self) {
        self.depth -= 1;
        self.conflicted = None;
        for pa in &mut self.examples {
            pa.pop();
        }
    }

    /// Asks every example to adopt the decision. Returns false (and records
    /// the witness) if some example runs into a propagation conflict.
    pub(crate) fn decision(&mut self, qcnf: &QCNF, lit: Lit) -> bool {
        for (idx, pa) in self.examples.iter_mut().enumerate() {
            if pa.is_conflicted() {
                continue;
            }
            if pa.value(lit.var()).falsifies(lit) {
                self.conflicted = Some(idx);
                return false;
            }
            if pa.value(lit.var()) == Val::Top {
                pa.assign(qcnf, lit, None);
                pa.propagate(qcnf);
            }
            if pa.is_conflicted() {
                self.conflicted = Some(idx);
                return false;
            }
        }
        true
    }

    /// Probes a decision without keeping its effects.
    pub(crate) fn would_conflict(&mut self, qcnf: &QCNF, lit: Lit) -> bool {
        self.push();
        let ok = self.decision(qcnf, lit);
        self.pop();
        !ok
    }

    pub(crate) fn conflict_witness(&self) -> Option<&PartialAssignment> {
        self.examples.get(self.conflicted?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn propagation_and_conflict() {
        let qcnf = qcnf_formula![
            a 1;
            e 2 3;
            1 2;
            -2 3;
            -2 -3;
        ];
        let mut pa = PartialAssignment::new(&qcnf);
        pa.push();
        pa.assign(&qcnf, Lit::from_dimacs(-1), None);
        pa.propagate(&qcnf);
        // -1 forces 2, which forces 3 and -3
        assert!(pa.is_conflicted());
        pa.pop();
        assert!(!pa.is_conflicted());
        assert_eq!(pa.value(Var::from_dimacs(2)), Val::Top);
    }

    #[test]
    fn decision_probe() {
        let qcnf = qcnf_formula![
            a 1;
            e 2 3;
            -2 3;
            -2 -3;
        ];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut examples = Examples::new(2);
        examples.initialize(&qcnf, &mut rng);
        assert!(examples.len() > 0);
        assert!(examples.would_conflict(&qcnf, Lit::from_dimacs(2)));
        assert!(!examples.would_conflict(&qcnf, Lit::from_dimacs(-2)));
    }
}
