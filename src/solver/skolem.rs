//! The Skolem engine.
//!
//! Maintains a candidate Skolem function as clauses in an auxiliary
//! propositional solver. Every variable owns one *satisfaction literal* per
//! polarity; a satisfaction literal is a pair of solver literals, one per
//! disjoint copy of the encoding. Universals share a single solver variable
//! between the copies, so a conflict check can ask whether a single universal
//! assignment derives both polarities of a variable: assume the positive
//! satisfaction literal in copy A and the negative one in copy B, and a
//! satisfiable answer is exactly a witness that the candidate is not a
//! function.
//!
//! Satisfaction literals are defined in both implication directions, so model
//! values are exact functions of the universals and pending clause checks
//! cannot be cheated by leaving a derivation undefined.

use super::{stats::SkolemStats, DecLvl};
use crate::{
    clause::alloc::ClauseIdx,
    datastructure::{undo::UndoStack, ClauseVec, VarVec},
    invariant, invariant_violation,
    literal::{Lit, PerPolarity, Var},
    qcnf::QCNF,
    sat::{ContextStack, LookupSolver, SatSolver},
};
use derivative::Derivative;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

/// The value of a literal under the candidate Skolem function, in the two
/// disjoint copies of the encoding.
#[derive(Clone, Copy)]
pub(crate) struct SatLit<L: Copy> {
    a: L,
    b: L,
}

impl<L: crate::sat::SatSolverLit> SatLit<L> {
    fn negated(self) -> Self {
        Self { a: !self.a, b: !self.b }
    }
}

/// Dual-copy layer over the context-stack solver: every clause is emitted
/// once per copy, and fresh satisfaction literals allocate one solver
/// variable per copy. Universals allocate a single shared variable.
#[derive(Derivative)]
#[derivative(Debug)]
struct PairSolver<S: SatSolver> {
    #[derivative(Debug = "ignore")]
    contexts: ContextStack<S>,
    #[derivative(Debug = "ignore")]
    true_lit: Option<S::Lit>,
    #[derivative(Debug = "ignore")]
    model: Vec<S::Lit>,
}

impl<S: SatSolver> Default for PairSolver<S> {
    fn default() -> Self {
        Self { contexts: ContextStack::default(), true_lit: None, model: Vec::default() }
    }
}

impl<S: SatSolver> PairSolver<S> {
    fn constant_true(&mut self) -> SatLit<S::Lit> {
        let t = match self.true_lit {
            Some(t) => t,
            None => {
                let t = self.contexts.solver().add_variable();
                self.contexts.add_permanent_clause(&[t]);
                self.true_lit = Some(t);
                t
            }
        };
        SatLit { a: t, b: t }
    }

    fn constant_false(&mut self) -> SatLit<S::Lit> {
        self.constant_true().negated()
    }

    fn fresh(&mut self) -> SatLit<S::Lit> {
        let a = self.contexts.solver().add_variable();
        let b = self.contexts.solver().add_variable();
        SatLit { a, b }
    }

    /// A satisfaction literal backed by a single solver variable in both
    /// copies; used for universals, whose value is shared between copies.
    fn fresh_shared(&mut self) -> SatLit<S::Lit> {
        let v = self.contexts.solver().add_variable();
        SatLit { a: v, b: v }
    }

    fn add_clause(&mut self, lits: &[SatLit<S::Lit>]) {
        let copy_a: Vec<_> = lits.iter().map(|l| l.a).collect();
        let copy_b: Vec<_> = lits.iter().map(|l| l.b).collect();
        self.contexts.add_clause(&copy_a);
        self.contexts.add_clause(&copy_b);
    }

    fn add_permanent_clause(&mut self, lits: &[SatLit<S::Lit>]) {
        let copy_a: Vec<_> = lits.iter().map(|l| l.a).collect();
        let copy_b: Vec<_> = lits.iter().map(|l| l.b).collect();
        self.contexts.add_permanent_clause(&copy_a);
        self.contexts.add_permanent_clause(&copy_b);
    }

    fn push(&mut self) {
        self.contexts.push();
    }

    fn pop(&mut self) {
        self.contexts.pop();
    }

    fn solve_with_assumptions(&mut self, assumptions: &[S::Lit]) -> Result<bool, S::Err> {
        let sat = self.contexts.solve_with_assumptions(assumptions)?;
        self.model.clear();
        if sat {
            if let Some(model) = self.contexts.solver().model() {
                self.model = model.to_vec();
            }
        }
        Ok(sat)
    }

    fn model_holds(&self, lit: S::Lit) -> bool {
        self.model.contains(&lit)
    }
}

/// Per-variable record of the Skolem construction.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), Default(bound = ""))]
struct SkolemVar<L: Copy> {
    /// satisfaction literals, one per polarity
    #[derivative(Debug = "ignore")]
    satlit: Option<PerPolarity<SatLit<L>>>,
    deterministic: bool,
    decision_lvl: Option<DecLvl>,
    pure: PerPolarity<bool>,
    constant: Option<bool>,
    /// the clause that forced a constant value; `None` is the sentinel for
    /// decisions and assumptions
    reason_for_constant: Option<ClauseIdx>,
    dlvl_for_constant: Option<DecLvl>,
    is_decision: bool,
    #[derivative(Debug = "ignore")]
    depends_on_decision_satlit: Option<SatLit<L>>,
}

/// Reversible operations of the Skolem engine.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub(crate) enum SkolemOp<L: Copy> {
    Satlit {
        var: Var,
        #[derivative(Debug = "ignore")]
        prev: Option<PerPolarity<SatLit<L>>>,
    },
    Deterministic {
        var: Var,
    },
    DecisionLvl {
        var: Var,
        prev: Option<DecLvl>,
    },
    UniqueConsequence {
        clause: ClauseIdx,
        prev: Option<Lit>,
    },
    Constant {
        var: Var,
        prev_value: Option<bool>,
        prev_reason: Option<ClauseIdx>,
        prev_dlvl: Option<DecLvl>,
    },
    Decision {
        var: Var,
    },
    Conflict,
    TrailPush,
}

/// A detected conflict: the candidate derives both polarities of `var`, or
/// falsifies `clause`, under the recorded universal/deterministic values.
#[derive(Debug, Clone)]
pub(crate) struct Conflict {
    pub(crate) var: Var,
    pub(crate) clause: Option<ClauseIdx>,
    pub(crate) values: HashMap<Var, bool>,
}

/// Notifications for the reinforcement-learning interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkolemEvent {
    UniqueConsequence(ClauseIdx, Lit),
    Deterministic(Var, bool),
    Value(Var, i8),
    Conflict(Var),
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SkolemOptions {
    pub(crate) functional_synthesis: bool,
    pub(crate) track_events: bool,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Skolem<S: SatSolver> {
    f: PairSolver<S>,
    vars: VarVec<SkolemVar<S::Lit>>,
    unique_consequence: ClauseVec<Option<Lit>>,
    /// clauses to examine, smallest first, tie-broken by clause index
    clause_queue: BTreeSet<(usize, ClauseIdx)>,
    /// variables with pending determinization attempts
    var_queue: BTreeSet<Var>,
    /// determinization order
    trail: Vec<Var>,
    trail_pos: VarVec<Option<usize>>,
    decision_lvl: DecLvl,
    stack: UndoStack<SkolemOp<S::Lit>>,
    conflict: Option<Conflict>,
    options: SkolemOptions,
    events: Vec<SkolemEvent>,
    pub(crate) stats: SkolemStats,
}

impl<S: SatSolver> Skolem<S> {
    pub(crate) fn new(options: SkolemOptions) -> Self {
        Self {
            f: PairSolver::default(),
            vars: VarVec::default(),
            unique_consequence: ClauseVec::default(),
            clause_queue: BTreeSet::new(),
            var_queue: BTreeSet::new(),
            trail: Vec::new(),
            trail_pos: VarVec::default(),
            decision_lvl: DecLvl::ROOT,
            stack: UndoStack::default(),
            conflict: None,
            options,
            events: Vec::new(),
            stats: SkolemStats::default(),
        }
    }

    pub(crate) fn set_var_count(&mut self, count: usize) {
        self.vars.set_var_count(count);
        self.trail_pos.set_var_count(count);
    }

    /// Marks universals deterministic, detects pure existentials, and
    /// queues all clauses for examination.
    pub(crate) fn initialize(&mut self, qcnf: &QCNF) {
        self.set_var_count(qcnf.var_count());
        for var in qcnf.variables() {
            if qcnf.is_universal(var) {
                let shared = self.f.fresh_shared();
                let record = &mut self.vars[var];
                record.satlit = Some(PerPolarity::new(shared.negated(), shared));
                record.deterministic = true;
                record.decision_lvl = Some(DecLvl::ROOT);
            } else {
                self.initialize_pure(qcnf, var);
            }
        }
        for idx in qcnf.clause_iterator() {
            self.clause_queue.insert((qcnf.clause(idx).len(), idx));
        }
    }

    /// Pure-literal rule: if all occurrences share one sign, the variable
    /// collapses to the constant satisfying them.
    fn initialize_pure(&mut self, qcnf: &QCNF, var: Var) {
        let has_pos = !qcnf.occurrences(var.positive()).is_empty();
        let has_neg = !qcnf.occurrences(var.negative()).is_empty();
        if has_pos && has_neg {
            return;
        }
        let value = has_pos || !has_neg;
        trace!("{var} is pure, constant {value}");
        let sl_true = self.f.constant_true();
        let sl_false = self.f.constant_false();
        let record = &mut self.vars[var];
        record.pure = PerPolarity::new(!has_pos, !has_neg);
        record.satlit = Some(if value {
            PerPolarity::new(sl_false, sl_true)
        } else {
            PerPolarity::new(sl_true, sl_false)
        });
        record.constant = Some(value);
        record.dlvl_for_constant = Some(DecLvl::ROOT);
        record.deterministic = true;
        record.decision_lvl = Some(DecLvl::ROOT);
        self.stats.pure_variables += 1;
    }

    pub(crate) fn decision_lvl(&self) -> DecLvl {
        self.decision_lvl
    }

    pub(crate) fn is_deterministic(&self, var: Var) -> bool {
        self.vars[var].deterministic
    }

    pub(crate) fn is_decision(&self, var: Var) -> bool {
        self.vars[var].is_decision
    }

    pub(crate) fn is_pure(&self, var: Var) -> (bool, bool) {
        let pure = &self.vars[var].pure;
        (pure[var.positive()], pure[var.negative()])
    }

    pub(crate) fn constant_value(&self, var: Var) -> Option<bool> {
        self.vars[var].constant
    }

    pub(crate) fn reason_for_constant(&self, var: Var) -> Option<ClauseIdx> {
        self.vars[var].reason_for_constant
    }

    /// The decision level relevant for conflict analysis: the level the
    /// variable received a (possibly assumed) value.
    pub(crate) fn lit_decision_lvl(&self, var: Var) -> DecLvl {
        let record = &self.vars[var];
        record.dlvl_for_constant.or(record.decision_lvl).unwrap_or(DecLvl::ROOT)
    }

    pub(crate) fn unique_consequence(&self, clause: ClauseIdx) -> Option<Lit> {
        self.unique_consequence.get(clause)
    }

    pub(crate) fn is_conflicted(&self) -> bool {
        self.conflict.is_some()
    }

    pub(crate) fn conflict(&self) -> Option<&Conflict> {
        self.conflict.as_ref()
    }

    pub(crate) fn conflict_var(&self) -> Option<Var> {
        self.conflict.as_ref().map(|conflict| conflict.var)
    }

    pub(crate) fn trail(&self) -> &[Var] {
        &self.trail
    }

    pub(crate) fn can_propagate(&self) -> bool {
        !self.clause_queue.is_empty() || !self.var_queue.is_empty()
    }

    pub(crate) fn propagation_count(&self) -> u64 {
        self.stats.propagations
    }

    pub(crate) fn take_events(&mut self) -> Vec<SkolemEvent> {
        std::mem::take(&mut self.events)
    }

    fn event(&mut self, event: SkolemEvent) {
        if self.options.track_events {
            self.events.push(event);
        }
    }

    pub(crate) fn push(&mut self) {
        self.decision_lvl = self.decision_lvl.successor();
        self.stack.push();
        self.f.push();
    }

    pub(crate) fn pop(&mut self, qcnf: &QCNF) {
        let mut stack = std::mem::take(&mut self.stack);
        stack.pop(|op| self.undo(op));
        self.stack = stack;
        self.f.pop();
        self.decision_lvl = self.decision_lvl.predecessor();
        self.reseed_queues(qcnf);
    }

    pub(crate) fn push_count(&self) -> usize {
        self.stack.push_count()
    }

    fn undo(&mut self, op: SkolemOp<S::Lit>) {
        match op {
            SkolemOp::Satlit { var, prev } => self.vars[var].satlit = prev,
            SkolemOp::Deterministic { var } => {
                self.vars[var].deterministic = false;
                self.event(SkolemEvent::Deterministic(var, false));
            }
            SkolemOp::DecisionLvl { var, prev } => self.vars[var].decision_lvl = prev,
            SkolemOp::UniqueConsequence { clause, prev } => {
                self.unique_consequence.set(clause, prev);
            }
            SkolemOp::Constant { var, prev_value, prev_reason, prev_dlvl } => {
                let record = &mut self.vars[var];
                record.constant = prev_value;
                record.reason_for_constant = prev_reason;
                record.dlvl_for_constant = prev_dlvl;
            }
            SkolemOp::Decision { var } => {
                let record = &mut self.vars[var];
                record.is_decision = false;
                record.depends_on_decision_satlit = None;
            }
            SkolemOp::Conflict => self.conflict = None,
            SkolemOp::TrailPush => {
                let var = self.trail.pop().expect("trail entry for every push op");
                self.trail_pos[var] = None;
            }
        }
    }

    /// After backtracking the propagation queues are rebuilt from scratch;
    /// examination is idempotent at fixpoint.
    fn reseed_queues(&mut self, qcnf: &QCNF) {
        self.clause_queue.clear();
        self.var_queue.clear();
        for idx in qcnf.clause_iterator() {
            match self.unique_consequence.get(idx) {
                None => {
                    self.clause_queue.insert((qcnf.clause(idx).len(), idx));
                }
                Some(lit) if !self.vars[lit.var()].deterministic => {
                    self.var_queue.insert(lit.var());
                }
                Some(_) => {}
            }
        }
    }

    /// Registers a learned or restored clause for propagation.
    pub(crate) fn new_clause(&mut self, qcnf: &QCNF, idx: ClauseIdx) {
        self.clause_queue.insert((qcnf.clause(idx).len(), idx));
    }

    /// Installs `lit` as the designated propagation target of `clause`.
    pub(crate) fn set_unique_consequence(&mut self, clause: ClauseIdx, lit: Lit) {
        let prev = self.unique_consequence.get(clause);
        invariant!(prev.is_none(), "clause {clause} already has unique consequence {}", prev.unwrap());
        invariant!(
            !self.vars[lit.var()].deterministic,
            "unique consequence {lit} of clause {clause} targets a deterministic variable"
        );
        self.stack.record(SkolemOp::UniqueConsequence { clause, prev });
        self.unique_consequence.set(clause, Some(lit));
        self.event(SkolemEvent::UniqueConsequence(clause, lit));
    }

    /// Drops the unique consequence of a clause about to be deleted. Only
    /// legal on the permanent level.
    pub(crate) fn clear_unique_consequence(&mut self, clause: ClauseIdx) {
        invariant!(
            self.stack.push_count() == 0,
            "unique consequences can only be cleared on the permanent level"
        );
        self.unique_consequence.set(clause, None);
    }

    pub(crate) fn satlit(&self, lit: Lit) -> SatLit<S::Lit> {
        let record = &self.vars[lit.var()];
        let satlit = record.satlit.unwrap_or_else(|| {
            invariant_violation!("satisfaction literal of {} queried before determinization", lit)
        });
        satlit[lit]
    }

    fn clause_satisfied_by_constant(&self, qcnf: &QCNF, idx: ClauseIdx) -> bool {
        qcnf.clause(idx)
            .iter()
            .any(|&lit| self.vars[lit.var()].constant == Some(lit.is_positive()))
    }

    /// Whether the dependencies of all antecedent literals are admissible
    /// for a function of `target`.
    fn dependencies_admissible(&self, qcnf: &QCNF, idx: ClauseIdx, target: Lit) -> bool {
        qcnf.clause(idx).iter().filter(|l| l.var() != target.var()).all(|&other| {
            if qcnf.is_universal(other.var()) {
                qcnf.may_depend_on(target.var(), other.var())
            } else {
                // a deterministic existential contributes its own dependencies
                qcnf.scope_of(other.var()) <= qcnf.scope_of(target.var())
                    || self.vars[other.var()].constant.is_some()
            }
        })
    }

    /// Fixpoint propagation. Returns early when a conflict is detected.
    pub(crate) fn propagate(&mut self, qcnf: &mut QCNF) -> Result<(), S::Err> {
        while self.conflict.is_none() {
            if let Some((_, idx)) = self.clause_queue.pop_first() {
                self.examine_clause(qcnf, idx)?;
            } else if let Some(var) = self.var_queue.pop_first() {
                self.try_determinize(qcnf, var)?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn examine_clause(&mut self, qcnf: &mut QCNF, idx: ClauseIdx) -> Result<(), S::Err> {
        if self.unique_consequence.get(idx).is_some() {
            return Ok(());
        }
        {
            let clause = qcnf.clause(idx);
            if !clause.active || clause.blocked {
                return Ok(());
            }
        }
        if self.clause_satisfied_by_constant(qcnf, idx) {
            let permanent = qcnf.clause(idx).iter().any(|&lit| {
                self.vars[lit.var()].constant == Some(lit.is_positive())
                    && self.vars[lit.var()].dlvl_for_constant == Some(DecLvl::ROOT)
            });
            if permanent && self.stack.push_count() == 0 {
                qcnf.clause_mut(idx).blocked = true;
            }
            return Ok(());
        }

        let nondet: Vec<Lit> = qcnf
            .clause(idx)
            .iter()
            .copied()
            .filter(|lit| !self.vars[lit.var()].deterministic)
            .collect();
        match nondet.as_slice() {
            [] => self.check_clause_consistency(qcnf, idx),
            // unit existential rule
            [lit] => {
                if self.dependencies_admissible(qcnf, idx, *lit) {
                    self.set_unique_consequence(idx, *lit);
                    self.var_queue.insert(lit.var());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A clause whose literals are all deterministic and that never received
    /// a unique consequence constrains the candidate directly: if some
    /// universal assignment falsifies every literal, the candidate is wrong.
    fn check_clause_consistency(&mut self, qcnf: &QCNF, idx: ClauseIdx) -> Result<(), S::Err> {
        self.stats.global_conflict_checks += 1;
        let assumptions: Vec<S::Lit> =
            qcnf.clause(idx).iter().map(|&lit| self.satlit(!lit).a).collect();
        if !self.f.solve_with_assumptions(&assumptions)? {
            return Ok(());
        }
        let var = qcnf
            .clause(idx)
            .iter()
            .filter(|lit| qcnf.is_existential(lit.var()))
            .max_by_key(|lit| self.trail_pos[lit.var()])
            .map(|lit| lit.var())
            .unwrap_or_else(|| {
                invariant_violation!("all-universal clause {idx} survived universal reduction")
            });
        debug!("clause {} is violated, conflict on {var}", qcnf.clause(idx));
        let values = self.extract_model_values(qcnf);
        self.enter_conflict(Conflict { var, clause: Some(idx), values });
        Ok(())
    }

    fn enter_conflict(&mut self, conflict: Conflict) {
        self.event(SkolemEvent::Conflict(conflict.var));
        self.stack.record(SkolemOp::Conflict);
        self.conflict = Some(conflict);
    }

    fn uc_clauses(&self, qcnf: &QCNF, lit: Lit) -> Vec<ClauseIdx> {
        qcnf.occurrences(lit)
            .iter()
            .copied()
            .filter(|&c| self.unique_consequence.get(c) == Some(lit))
            .filter(|&c| !self.clause_satisfied_by_constant(qcnf, c))
            .collect()
    }

    fn try_determinize(&mut self, qcnf: &QCNF, var: Var) -> Result<(), S::Err> {
        if self.vars[var].deterministic || self.conflict.is_some() {
            return Ok(());
        }
        let pos_ucs = self.uc_clauses(qcnf, var.positive());
        let neg_ucs = self.uc_clauses(qcnf, var.negative());
        if pos_ucs.is_empty() && neg_ucs.is_empty() {
            return Ok(());
        }
        if !self.forced_everywhere(qcnf, var, &pos_ucs, &neg_ucs)? {
            // not locally deterministic; a decision has to complete it
            trace!("{var} is not forced everywhere");
            return Ok(());
        }
        trace!("{var} has a unique consequence everywhere");

        let (pos_sl, pos_reason) = self.encode_antecedents(qcnf, var.positive(), &pos_ucs);
        let (neg_sl, neg_reason) = self.encode_antecedents(qcnf, var.negative(), &neg_ucs);

        if let Some(conflict) = self.partial_function_conflict(qcnf, var, pos_sl, neg_sl)? {
            debug!("{var} is conflicted");
            self.enter_conflict(conflict);
            return Ok(());
        }

        self.commit_satlits(var, PerPolarity::new(neg_sl, pos_sl));
        if let Some(reason) = pos_reason {
            self.set_constant(var, true, Some(reason));
        } else if let Some(reason) = neg_reason {
            self.set_constant(var, false, Some(reason));
        }
        self.mark_deterministic(qcnf, var);
        Ok(())
    }

    /// Local determinicity check: the unique-consequence clauses force the
    /// variable under every assignment iff the conjunction of their
    /// complements (with constants substituted) is unsatisfiable.
    fn forced_everywhere(
        &mut self,
        qcnf: &QCNF,
        var: Var,
        pos_ucs: &[ClauseIdx],
        neg_ucs: &[ClauseIdx],
    ) -> Result<bool, S::Err> {
        self.stats.local_det_checks += 1;
        let mut solver = LookupSolver::<S>::default();
        solver.set_var_count(qcnf.var_count());
        for &idx in pos_ucs.iter().chain(neg_ucs) {
            let mut reduced = Vec::new();
            let mut satisfied = false;
            for &lit in qcnf.clause(idx).iter().filter(|l| l.var() != var) {
                match self.vars[lit.var()].constant {
                    Some(value) if value == lit.is_positive() => {
                        satisfied = true;
                        break;
                    }
                    Some(_) => {}
                    None => reduced.push(lit),
                }
            }
            if satisfied {
                continue;
            }
            if reduced.is_empty() {
                // a clause with no remaining antecedent literals forces the
                // variable on its own
                return Ok(true);
            }
            let sat_lits: Vec<_> = reduced.iter().map(|&l| solver.lookup(l)).collect();
            solver.add_clause(&sat_lits);
        }
        Ok(!solver.solve()?)
    }

    /// Partial-function encoding: extends the satisfaction literal of `lit`
    /// clause by clause, `new = prev ∨ (¬x₁ ∧ … ∧ ¬xₖ)`, in both implication
    /// directions. Returns the final satisfaction literal and, if some
    /// antecedent is empty, the clause that makes the literal constant.
    fn encode_antecedents(
        &mut self,
        qcnf: &QCNF,
        lit: Lit,
        ucs: &[ClauseIdx],
    ) -> (SatLit<S::Lit>, Option<ClauseIdx>) {
        let mut prev = self.f.constant_false();
        for &idx in ucs {
            let others: Vec<Lit> =
                qcnf.clause(idx).iter().copied().filter(|l| l.var() != lit.var()).collect();
            if others.is_empty() {
                // empty antecedent: the literal holds everywhere
                return (self.f.constant_true(), Some(idx));
            }
            let negated_sls: Vec<SatLit<S::Lit>> =
                others.iter().map(|&x| self.satlit(!x)).collect();
            let direct_sls: Vec<SatLit<S::Lit>> = others.iter().map(|&x| self.satlit(x)).collect();
            let fresh = self.f.fresh();
            for &sl in &negated_sls {
                self.f.add_clause(&[fresh.negated(), prev, sl]);
            }
            self.f.add_clause(&[prev.negated(), fresh]);
            let mut closing = direct_sls;
            closing.push(fresh);
            self.f.add_clause(&closing);
            prev = fresh;
        }
        (prev, None)
    }

    /// The conflict check of the construction: is there a universal
    /// assignment under which both polarities are derived?
    fn partial_function_conflict(
        &mut self,
        qcnf: &QCNF,
        var: Var,
        pos_sl: SatLit<S::Lit>,
        neg_sl: SatLit<S::Lit>,
    ) -> Result<Option<Conflict>, S::Err> {
        self.stats.global_conflict_checks += 1;
        if !self.f.solve_with_assumptions(&[pos_sl.a, neg_sl.b])? {
            return Ok(None);
        }
        let values = self.extract_model_values(qcnf);
        Ok(Some(Conflict { var, clause: None, values }))
    }

    fn commit_satlits(&mut self, var: Var, satlit: PerPolarity<SatLit<S::Lit>>) {
        let prev = self.vars[var].satlit;
        self.stack.record(SkolemOp::Satlit { var, prev });
        self.vars[var].satlit = Some(satlit);
    }

    fn set_constant(&mut self, var: Var, value: bool, reason: Option<ClauseIdx>) {
        let record = &self.vars[var];
        self.stack.record(SkolemOp::Constant {
            var,
            prev_value: record.constant,
            prev_reason: record.reason_for_constant,
            prev_dlvl: record.dlvl_for_constant,
        });
        let dlvl = self.decision_lvl;
        let record = &mut self.vars[var];
        record.constant = Some(value);
        record.reason_for_constant = reason;
        record.dlvl_for_constant = Some(dlvl);
        self.stats.constant_propagations += 1;
        self.event(SkolemEvent::Value(var, if value { 1 } else { -1 }));
    }

    /// Sets the flag, assigns the current decision level, and appends the
    /// variable to the determinization order.
    fn mark_deterministic(&mut self, qcnf: &QCNF, var: Var) {
        let record = &self.vars[var];
        invariant!(!record.deterministic, "{var} marked deterministic twice");
        self.stack.record(SkolemOp::Deterministic { var });
        self.stack.record(SkolemOp::DecisionLvl { var, prev: record.decision_lvl });
        self.stack.record(SkolemOp::TrailPush);
        let dlvl = self.decision_lvl;
        let record = &mut self.vars[var];
        record.deterministic = true;
        record.decision_lvl = Some(dlvl);
        self.trail_pos[var] = Some(self.trail.len());
        self.trail.push(var);
        self.stats.determinizations += 1;
        self.stats.propagations += 1;
        self.event(SkolemEvent::Deterministic(var, true));
        self.wake_occurrences(qcnf, var);
    }

    /// Clauses containing a freshly deterministic variable may now propagate.
    fn wake_occurrences(&mut self, qcnf: &QCNF, var: Var) {
        for lit in [var.positive(), var.negative()] {
            for &idx in qcnf.occurrences(lit) {
                match self.unique_consequence.get(idx) {
                    None => {
                        self.clause_queue.insert((qcnf.clause(idx).len(), idx));
                    }
                    Some(target) if !self.vars[target.var()].deterministic => {
                        self.var_queue.insert(target.var());
                    }
                    Some(_) => {}
                }
            }
        }
    }

    /// Asserts `lit` in the auxiliary solver under the current context and
    /// records the constant. Used by case splits and probing.
    pub(crate) fn assume_constant_value(&mut self, qcnf: &QCNF, lit: Lit) {
        let record = &self.vars[lit.var()];
        invariant!(
            record.deterministic,
            "constant assumption over nondeterministic variable {}",
            lit.var()
        );
        invariant!(
            record.constant != Some(!lit.is_positive()),
            "constant assumption {lit} contradicts an existing constant"
        );
        let sl = self.satlit(lit);
        self.f.add_clause(&[sl]);
        self.set_constant(lit.var(), lit.is_positive(), None);
        self.stats.propagations += 1;
        self.wake_occurrences(qcnf, lit.var());
    }

    /// Determinizes a variable by decision: the variable takes the decided
    /// polarity unless an antecedent of the opposite side fires.
    pub(crate) fn decide(&mut self, qcnf: &QCNF, lit: Lit) -> Result<(), S::Err> {
        let var = lit.var();
        invariant!(!self.vars[var].deterministic, "decision on deterministic variable {var}");
        let same_ucs = self.uc_clauses(qcnf, lit);
        let opp_ucs = self.uc_clauses(qcnf, !lit);
        debug!("decide {lit} ({} supporting, {} opposing clauses)", same_ucs.len(), opp_ucs.len());

        let (same_sl, _) = self.encode_antecedents(qcnf, lit, &same_ucs);
        let (opp_sl, _) = self.encode_antecedents(qcnf, !lit, &opp_ucs);

        if let Some(conflict) = self.partial_function_conflict(qcnf, var, same_sl, opp_sl)? {
            debug!("decision {lit} is conflicted");
            self.enter_conflict(conflict);
            return Ok(());
        }

        // the decided side is the exact complement of the opposite side
        let mut satlit = PerPolarity::new(opp_sl, opp_sl);
        satlit[lit] = opp_sl.negated();
        self.commit_satlits(var, satlit);
        self.stack.record(SkolemOp::Decision { var });
        let record = &mut self.vars[var];
        record.is_decision = true;
        if self.options.functional_synthesis {
            record.depends_on_decision_satlit = Some(same_sl);
        }
        if opp_ucs.is_empty() {
            // nothing can override the decision
            self.set_constant(var, lit.is_positive(), None);
        }
        self.mark_deterministic(qcnf, var);
        Ok(())
    }

    /// The number of clauses currently defining `lit` through a unique
    /// consequence; used by the decision polarity heuristic.
    pub(crate) fn uc_clause_count(&self, qcnf: &QCNF, lit: Lit) -> usize {
        qcnf.occurrences(lit)
            .iter()
            .filter(|&&c| self.unique_consequence.get(c) == Some(lit))
            .count()
    }

    /// Is there an unblocked universal assignment consistent with the
    /// current constants?
    pub(crate) fn solve(&mut self) -> Result<bool, S::Err> {
        self.f.solve_with_assumptions(&[])
    }

    /// A universal assumption is vacuous if no unblocked universal
    /// assignment is consistent with it.
    pub(crate) fn is_assumption_vacuous(&mut self, lit: Lit) -> Result<bool, S::Err> {
        let sl = self.satlit(lit);
        Ok(!self.f.solve_with_assumptions(&[sl.a, sl.b])?)
    }

    /// The value of `var` in the most recent model of the auxiliary solver.
    pub(crate) fn value_in_model(&self, var: Var) -> Option<bool> {
        let satlit = self.vars[var].satlit?;
        if self.f.model_holds(satlit[var.positive()].a) {
            Some(true)
        } else if self.f.model_holds(satlit[var.negative()].a) {
            Some(false)
        } else {
            None
        }
    }

    /// Blocks a solved universal region: some literal of the cube must be
    /// derived in any remaining assignment. The block outlives backtracking
    /// only if every satisfaction literal does, i.e. all cube variables were
    /// determinized on the permanent level.
    pub(crate) fn block_cube(&mut self, cube: &[Lit]) {
        let permanent =
            cube.iter().all(|l| self.vars[l.var()].decision_lvl == Some(DecLvl::ROOT));
        let sls: Vec<SatLit<S::Lit>> = cube.iter().map(|&l| self.satlit(l)).collect();
        if permanent {
            self.f.add_permanent_clause(&sls);
        } else {
            self.f.add_clause(&sls);
        }
    }

    fn extract_model_values(&self, qcnf: &QCNF) -> HashMap<Var, bool> {
        let mut values = HashMap::new();
        for var in qcnf.variables() {
            let record = &self.vars[var];
            if !record.deterministic {
                continue;
            }
            let Some(satlit) = record.satlit else { continue };
            if self.f.model_holds(satlit[var.positive()].a) {
                values.insert(var, true);
            } else if self.f.model_holds(satlit[var.negative()].a) {
                values.insert(var, false);
            }
        }
        values
    }
}
