//! The incremental-determinization driver: composes the Skolem engine, the
//! examples engine, CEGAR, and the case-split controller into the outer
//! solve loop.

use self::{
    activity::Activity,
    casesplit::CaseSplits,
    cegar::{Cegar, CegarRound, Cube},
    conflict::ConflictAnalysis,
    examples::Examples,
    restart::Restarts,
    rl::StdioRlContext,
    skolem::{Conflict, Skolem, SkolemOptions},
    stats::Statistics,
};
use crate::{
    literal::{Lit, Var},
    qcnf::{MalformedFormula, QCNF},
    qdimacs::FromQdimacs,
    sat::varisat::Varisat,
    QuantTy, SolverResult,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub(crate) mod activity;
pub mod casesplit;
pub(crate) mod cegar;
pub(crate) mod conflict;
pub(crate) mod examples;
pub(crate) mod restart;
pub mod rl;
pub(crate) mod skolem;
pub(crate) mod stats;

#[cfg(test)]
mod test;

pub use casesplit::DepthPenalty;

/// Probability (1/n) of flipping the polarity of the chosen case-split
/// literal to avoid deterministic loops.
const CASE_SPLIT_FLIP_CHANCE: u32 = 30;
/// Weight of the universal interface activity in the case-split cost factor.
const CASE_SPLIT_COST_WEIGHT: f64 = 20.0;

/// A decision level. Level 0 is the permanent root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub(crate) struct DecLvl(usize);

impl DecLvl {
    pub(crate) const ROOT: DecLvl = DecLvl(0);

    pub(crate) fn successor(self) -> Self {
        Self(self.0 + 1)
    }

    pub(crate) fn predecessor(self) -> Self {
        Self(self.0.checked_sub(1).expect("the root level has no predecessor"))
    }
}

impl std::fmt::Display for DecLvl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration of the solver core; mirrors the CLI surface.
#[derive(Debug, Clone)]
pub struct Options {
    pub seed: u64,
    pub case_splits: bool,
    pub cegar: bool,
    pub functional_synthesis: bool,
    pub certify_sat: bool,
    pub miniscoping_stats: bool,
    pub rl: bool,
    pub qdimacs_output: bool,
    pub examples_max: usize,
    pub depth_penalty: DepthPenalty,
    pub decision_limit: Option<u64>,
    pub time_limit: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            seed: 0,
            case_splits: true,
            cegar: true,
            functional_synthesis: false,
            certify_sat: false,
            miniscoping_stats: false,
            rl: false,
            qdimacs_output: false,
            examples_max: 0,
            depth_penalty: DepthPenalty::Linear,
            decision_limit: None,
            time_limit: None,
        }
    }
}

type EngineSat = Varisat<'static>;
type EngineErr = varisat::solver::SolverError;

pub struct Solver {
    pub(crate) qcnf: QCNF,
    options: Options,
    pub(crate) skolem: Skolem<EngineSat>,
    pub(crate) cegar: Cegar<EngineSat>,
    casesplits: CaseSplits,
    examples: Examples,
    pub(crate) activity: Activity,
    pub(crate) conflict_analysis: ConflictAnalysis,
    restarts: Restarts,
    stats: Statistics,
    rng: SmallRng,
    rl: Option<StdioRlContext>,
    restart_base: DecLvl,
    deadline: Option<Instant>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::with_options(Options::default())
    }
}

impl FromQdimacs for Solver {
    fn set_num_variables(&mut self, variables: u32) {
        self.qcnf.set_var_count(variables as usize);
    }

    fn set_num_clauses(&mut self, clauses: u32) {
        self.qcnf.reserve_clauses(clauses);
    }

    fn quantify(&mut self, quant: QuantTy, vars: &[Var]) {
        <QCNF as FromQdimacs>::quantify(&mut self.qcnf, quant, vars);
    }

    fn dependency(&mut self, var: Var, deps: &[Var]) {
        <QCNF as FromQdimacs>::dependency(&mut self.qcnf, var, deps);
    }

    fn add_clause(&mut self, lits: &[Lit]) -> Result<(), MalformedFormula> {
        <QCNF as FromQdimacs>::add_clause(&mut self.qcnf, lits)
    }
}

impl Solver {
    #[must_use]
    pub fn with_options(options: Options) -> Self {
        let skolem_options = SkolemOptions {
            functional_synthesis: options.functional_synthesis,
            track_events: options.rl,
        };
        let rl = options.rl.then(StdioRlContext::default);
        Self {
            qcnf: QCNF::default(),
            skolem: Skolem::new(skolem_options),
            cegar: Cegar::default(),
            casesplits: CaseSplits::new(options.depth_penalty),
            examples: Examples::new(options.examples_max),
            activity: Activity::default(),
            conflict_analysis: ConflictAnalysis::default(),
            restarts: Restarts::default(),
            stats: Statistics::default(),
            rng: SmallRng::seed_from_u64(options.seed),
            rl,
            restart_base: DecLvl::ROOT,
            deadline: None,
            options,
        }
    }

    #[must_use]
    pub fn from_qcnf(qcnf: QCNF, options: Options) -> Self {
        let mut solver = Self::with_options(options);
        solver.qcnf = qcnf;
        solver
    }

    pub fn qcnf(&self) -> &QCNF {
        &self.qcnf
    }

    /// Solved cases retained for certificate emission (`--certify-SAT`).
    pub fn solved_cases(&self) -> &[Cube] {
        self.cegar.solved_cubes()
    }

    /// Root-level constant values of original existential variables, for
    /// QDIMACS certificate output.
    pub fn certificate_constants(&self) -> Vec<Lit> {
        self.qcnf
            .variables()
            .filter(|&var| self.qcnf.is_existential(var) && self.qcnf.is_original(var))
            .filter_map(|var| Some(var.lit(self.skolem.constant_value(var)?)))
            .collect()
    }

    /// Solves the formula by incremental determinization.
    pub fn solve(&mut self) -> SolverResult {
        let instant = Instant::now();
        if self.options.miniscoping_stats {
            println!("{}", self.qcnf.miniscoping_components());
        }
        self.deadline = self.options.time_limit.map(|limit| instant + limit);
        let result = match self.run() {
            Ok(result) => result,
            Err(err) => {
                // transient adapter failures surface as unknown
                warn!("SAT adapter failed: {err}");
                SolverResult::Unknown
            }
        };
        self.stats.global.solve_time = instant.elapsed();
        self.stats.skolem = std::mem::take(&mut self.skolem.stats);
        self.stats.cegar = std::mem::take(&mut self.cegar.stats);
        info!("\n{:#?}", self.stats);
        if let Some(rl) = self.rl.as_mut() {
            if result == SolverResult::Satisfiable {
                rl.reward_solved();
            }
            if let Err(err) = rl.emit_rewards() {
                warn!("cannot report rewards: {err}");
            }
        }
        result
    }

    fn run(&mut self) -> Result<SolverResult, EngineErr> {
        if self.qcnf.contains_empty_clause {
            return Ok(SolverResult::Unsatisfiable);
        }
        self.skolem.initialize(&self.qcnf);
        self.examples.initialize(&self.qcnf, &mut self.rng);
        self.seed_decision_heap();

        loop {
            if self.qcnf.contains_empty_clause {
                return Ok(SolverResult::Unsatisfiable);
            }
            if self.limits_exceeded() {
                info!("resource limit reached");
                return Ok(SolverResult::Unknown);
            }

            self.skolem.propagate(&mut self.qcnf)?;
            self.drain_rl_events();
            if let Some(conflict) = self.skolem.conflict().cloned() {
                if let Some(result) = self.handle_conflict(&conflict) {
                    return Ok(result);
                }
                continue;
            }

            if self.restarts.is_due() && self.skolem.decision_lvl() > self.restart_base {
                self.restart();
                continue;
            }

            if self.case_split_eligible() {
                if let Some(result) = self.attempt_case_split()? {
                    return Ok(result);
                }
                continue;
            }

            if let Some(var) = self.next_decision_variable() {
                if self.cegar_engaged() {
                    match self.cegar_round()? {
                        Some(result) => return Ok(result),
                        None => continue,
                    }
                }
                self.decide(var)?;
                continue;
            }

            // plausible SAT: every existential is deterministic
            if let Some(result) = self.close_case_or_sat()? {
                return Ok(result);
            }
        }
    }

    fn limits_exceeded(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        if let Some(limit) = self.options.decision_limit {
            if u64::from(self.stats.global.decisions) >= limit {
                return true;
            }
        }
        false
    }

    fn seed_decision_heap(&mut self) {
        self.activity.set_var_count(self.qcnf.var_count());
        for var in self.qcnf.variables() {
            if self.qcnf.is_existential(var) && !self.skolem.is_deterministic(var) {
                self.activity.add(var);
            }
        }
    }

    fn next_decision_variable(&mut self) -> Option<Var> {
        loop {
            let var = self.activity.peek()?;
            if self.skolem.is_deterministic(var) {
                self.activity.pop();
            } else {
                return Some(var);
            }
        }
    }

    fn push_level(&mut self) {
        self.skolem.push();
        self.examples.push();
    }

    fn backtrack_to(&mut self, lvl: DecLvl) {
        while self.skolem.decision_lvl() > lvl {
            self.skolem.pop(&self.qcnf);
            self.examples.pop();
        }
        self.seed_decision_heap();
    }

    fn decide(&mut self, var: Var) -> Result<(), EngineErr> {
        self.stats.global.decisions += 1;
        let neg_count = self.skolem.uc_clause_count(&self.qcnf, var.negative());
        let pos_count = self.skolem.uc_clause_count(&self.qcnf, var.positive());
        let mut lit = if neg_count <= pos_count { var.negative() } else { var.positive() };

        if let Some(choice) = self.rl_decision(lit) {
            lit = choice;
        } else if self.examples.len() > 0
            && self.examples.would_conflict(&self.qcnf, lit)
            && !self.examples.would_conflict(&self.qcnf, !lit)
        {
            // the examples falsified the preferred polarity cheaply
            lit = !lit;
        }

        trace!("decide {lit} (neg: {neg_count}, pos: {pos_count})");
        if let Some(rl) = self.rl.as_mut() {
            let _ = rl.notify_activity(var, self.activity.score(var));
            let _ = rl.notify_decision(lit);
        }
        self.push_level();
        self.skolem.decide(&self.qcnf, lit)?;
        if !self.examples.decision(&self.qcnf, lit) {
            if let Some(pa) = self.examples.conflict_witness() {
                let witness = pa.conflicted_var();
                trace!(
                    "example contradicts {lit}: conflict on {:?} (antecedent {:?}, level {:?})",
                    witness,
                    witness.and_then(|v| pa.antecedent(v)),
                    witness.and_then(|v| pa.decision_lvl_of(v)),
                );
            }
        }
        self.drain_rl_events();
        Ok(())
    }

    fn rl_decision(&mut self, fallback: Lit) -> Option<Lit> {
        let rl = self.rl.as_mut()?;
        let state = [
            f64::from(self.stats.global.decisions),
            f64::from(self.stats.global.conflicts),
            f64::from(self.stats.global.restarts),
            self.skolem.trail().len() as f64,
            f64::from(u32::try_from(self.casesplits.depth()).unwrap_or(u32::MAX)),
        ];
        let qcnf = &self.qcnf;
        let skolem = &self.skolem;
        let legal =
            |l: Lit| qcnf.is_existential(l.var()) && !skolem.is_deterministic(l.var());
        match rl.request_decision(&state, legal) {
            Ok(choice) => choice,
            Err(err) => {
                warn!("reinforcement learning channel failed: {err}; falling back to {fallback}");
                self.rl = None;
                None
            }
        }
    }

    fn drain_rl_events(&mut self) {
        if self.rl.is_none() {
            return;
        }
        let events = self.skolem.take_events();
        let mut failed = false;
        if let Some(rl) = self.rl.as_mut() {
            for event in events {
                if rl.notify_event(event).is_err() {
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            warn!("reinforcement learning channel closed");
            self.rl = None;
        }
    }

    fn handle_conflict(&mut self, conflict: &Conflict) -> Option<SolverResult> {
        self.stats.global.conflicts += 1;
        self.restarts.notify_conflict();
        self.casesplits.notify_conflict();
        if self.skolem.decision_lvl() <= self.restart_base {
            debug!("conflict at the base level");
            return Some(SolverResult::Unsatisfiable);
        }
        let Ok(backtrack_to) = self.analyze(conflict) else {
            return Some(SolverResult::Unsatisfiable);
        };
        let target = backtrack_to.max(self.restart_base);
        debug!("conflict analysis: backtrack to {target}");
        self.backtrack_to(target);
        let clause = self.conflict_analysis.clause().to_vec();
        self.learn_clause(&clause);
        if self.qcnf.contains_empty_clause {
            return Some(SolverResult::Unsatisfiable);
        }
        None
    }

    fn learn_clause(&mut self, lits: &[Lit]) {
        let consistent_with_originals = !self.casesplits.is_active();
        match self.qcnf.new_clause(lits, false, consistent_with_originals) {
            Ok(Some(idx)) => {
                self.stats.global.added_clauses += 1;
                if let Some(rl) = self.rl.as_mut() {
                    let _ = rl.notify_learned_clause(&self.qcnf, idx);
                }
                self.skolem.new_clause(&self.qcnf, idx);
            }
            Ok(None) => {}
            Err(err) => crate::invariant_violation!("learned clause is malformed: {err}"),
        }
    }

    fn restart(&mut self) {
        let major = self.restarts.next_epoch();
        self.stats.global.restarts += 1;
        if major {
            self.stats.global.major_restarts += 1;
        }
        debug!("restart {} (major: {major})", self.restarts.restarts);
        self.backtrack_to(self.restart_base);
        if self.skolem.push_count() == 0 {
            self.clause_maintenance();
        }
    }

    /// Deletes large learned clauses that no longer anchor a deterministic
    /// unique consequence; periodically strengthens originals with root
    /// constants.
    fn clause_maintenance(&mut self) {
        let limit = self.restarts.clause_size_limit();
        let mut delete = Vec::new();
        for idx in self.qcnf.clause_iterator() {
            let clause = self.qcnf.clause(idx);
            if clause.original || clause.len() <= limit {
                continue;
            }
            match self.skolem.unique_consequence(idx) {
                Some(lit) if self.skolem.is_deterministic(lit.var()) => {}
                _ => delete.push(idx),
            }
        }
        for idx in delete {
            self.skolem.clear_unique_consequence(idx);
            self.qcnf.deactivate_clause(idx);
            self.stats.global.deleted_clauses += 1;
        }
        if self.restarts.originals_due() {
            self.strengthen_originals();
        }
    }

    /// Removes literals falsified by root constants that carry a clause
    /// reason; the strengthened clause subsumes the original.
    fn strengthen_originals(&mut self) {
        let mut strengthened = Vec::new();
        for idx in self.qcnf.clause_iterator() {
            let clause = self.qcnf.clause(idx);
            if !clause.original || clause.blocked || self.skolem.unique_consequence(idx).is_some()
            {
                continue;
            }
            let reduced: Vec<Lit> = clause
                .iter()
                .copied()
                .filter(|&lit| {
                    !(self.skolem.constant_value(lit.var()) == Some(!lit.is_positive())
                        && self.skolem.reason_for_constant(lit.var()).is_some())
                })
                .collect();
            if !reduced.is_empty() && reduced.len() < clause.len() {
                strengthened.push((idx, reduced));
            }
        }
        for (idx, lits) in strengthened {
            if let Ok(Some(new_idx)) = self.qcnf.new_clause(&lits, false, true) {
                self.stats.global.added_clauses += 1;
                self.skolem.new_clause(&self.qcnf, new_idx);
                self.qcnf.deactivate_clause(idx);
                self.stats.global.deleted_clauses += 1;
            }
        }
    }

    fn case_split_eligible(&self) -> bool {
        self.options.case_splits
            && !self.casesplits.is_paced_out()
            && self.skolem.decision_lvl() == self.restart_base
            && !self.skolem.can_propagate()
    }

    fn attempt_case_split(&mut self) -> Result<Option<SolverResult>, EngineErr> {
        self.casesplits.reset_countdown();
        self.cegar.update_interface(&self.qcnf, &self.skolem);
        let Some(mut lit) = self.pick_case_split_literal()? else {
            trace!("no candidate literal for a case split");
            return Ok(None);
        };
        if self.skolem.is_assumption_vacuous(lit)? {
            self.stats.case_splits.vacuous_assumptions += 1;
            debug!("assumption {lit} is vacuous, switching polarity");
            lit = !lit;
            if self.skolem.is_assumption_vacuous(lit)? {
                debug!("both polarities vacuous: universal search space exhausted");
                if !self.casesplits.is_active() {
                    return Ok(Some(SolverResult::Satisfiable));
                }
                return self.close_case();
            }
        }
        debug!("case split on {lit} at depth {}", self.casesplits.depth() + 1);
        self.push_level();
        self.restart_base = self.restart_base.successor();
        self.casesplits.assume(lit);
        self.cegar.decay_interface_activity(lit.var());
        self.stats.case_splits.cases_explored += 1;
        self.skolem.assume_constant_value(&self.qcnf, lit);
        self.skolem.propagate(&mut self.qcnf)?;
        self.drain_rl_events();
        if self.skolem.is_conflicted() {
            // a conflict under a universal assumption is genuine
            debug!("case split lead to immediate conflict on {:?}", self.skolem.conflict_var());
            return Ok(Some(SolverResult::Unsatisfiable));
        }
        Ok(None)
    }

    fn pick_case_split_literal(&mut self) -> Result<Option<Lit>, EngineErr> {
        let mut best: Option<(Lit, f64)> = None;
        let interface: Vec<Var> = self.cegar.interface().to_vec();
        for var in interface {
            if !self.qcnf.is_universal(var)
                || !self.skolem.is_deterministic(var)
                || self.skolem.constant_value(var).is_some()
            {
                continue;
            }
            let pos = self.probe(var.positive())?;
            let neg = self.probe(var.negative())?;
            let (Some(pos), Some(neg)) = (pos, neg) else {
                // a failed literal is assumed immediately; the resulting
                // conflict is handled by the caller
                let lit = if pos.is_none() { var.positive() } else { var.negative() };
                debug!("failed literal {lit}");
                return Ok(Some(lit));
            };
            let cost_factor =
                1.0 + CASE_SPLIT_COST_WEIGHT * self.cegar.interface_activity(var);
            let combined_factor = (1.0 + self.activity.score(var)) * cost_factor;
            #[allow(clippy::cast_precision_loss)]
            let quality = combined_factor * ((pos * neg + pos + neg + 1) as f64);
            if best.map_or(true, |(_, best_quality)| quality > best_quality) {
                let mut lit = if pos > neg { var.positive() } else { var.negative() };
                if self.rng.gen_ratio(1, CASE_SPLIT_FLIP_CHANCE) {
                    trace!("randomly flipped case split literal");
                    lit = !lit;
                }
                best = Some((lit, quality));
            }
        }
        Ok(best.map(|(lit, _)| lit))
    }

    /// Probes one polarity: how many propagations does assuming it buy?
    /// `None` reports a failed literal.
    fn probe(&mut self, lit: Lit) -> Result<Option<u64>, EngineErr> {
        self.stats.case_splits.probes += 1;
        let before = self.skolem.propagation_count();
        self.skolem.push();
        self.skolem.assume_constant_value(&self.qcnf, lit);
        self.skolem.propagate(&mut self.qcnf)?;
        let conflicted = self.skolem.is_conflicted();
        let propagations = self.skolem.propagation_count() - before;
        self.skolem.pop(&self.qcnf);
        if conflicted {
            self.stats.case_splits.failed_literals += 1;
            Ok(None)
        } else {
            Ok(Some(propagations))
        }
    }

    fn cegar_engaged(&self) -> bool {
        self.options.cegar
            && self.skolem.decision_lvl() == self.restart_base
            && self.cegar.is_effective()
            && (self.restarts.restarts >= 1 || self.casesplits.is_active())
    }

    fn cegar_round(&mut self) -> Result<Option<SolverResult>, EngineErr> {
        self.cegar.update_interface(&self.qcnf, &self.skolem);
        if !self.skolem.solve()? {
            // no unblocked universal assignment remains
            return self.close_case_or_sat();
        }
        let case_assumptions: Vec<Lit> = self.casesplits.stack().to_vec();
        match self.cegar.round(&self.qcnf, &mut self.skolem, &case_assumptions)? {
            CegarRound::Refuted => Ok(Some(SolverResult::Unsatisfiable)),
            CegarRound::Blocked(size) => {
                trace!("blocked a cube of size {size}");
                if self.examples.has_capacity() {
                    // remember the universal pattern the Skolem solver chose
                    let qcnf = &self.qcnf;
                    let skolem = &self.skolem;
                    let pa = Examples::new_assignment_from_values(qcnf, &mut self.rng, |var| {
                        skolem.value_in_model(var)
                    });
                    if let Some(pa) = pa {
                        self.examples.add(pa);
                    }
                }
                Ok(None)
            }
            CegarRound::Solved => self.close_case_or_sat(),
        }
    }

    fn close_case_or_sat(&mut self) -> Result<Option<SolverResult>, EngineErr> {
        if !self.casesplits.is_active() {
            return Ok(Some(SolverResult::Satisfiable));
        }
        self.close_case()
    }

    /// The current case is exhausted: record its cube, backtrack past the
    /// case levels, and block the cube for good.
    fn close_case(&mut self) -> Result<Option<SolverResult>, EngineErr> {
        self.stats.case_splits.completed_cases += 1;
        self.backtrack_to(self.restart_base);
        let cube = self.casesplits.solved_cube();
        let assumptions: Vec<Lit> = if self.options.certify_sat {
            self.casesplits.stack().to_vec()
        } else {
            Vec::new()
        };
        debug!("case split completed, blocking cube of size {}", cube.len());
        while self.casesplits.pop_assumption().is_some() {
            self.skolem.pop(&self.qcnf);
            self.examples.pop();
            self.restart_base = self.restart_base.predecessor();
        }
        self.seed_decision_heap();
        self.cegar.block(&mut self.skolem, cube, assumptions);
        self.restarts.reset();
        self.casesplits.reset_countdown();
        if !self.skolem.solve()? {
            debug!("universal assignments depleted: SAT");
            return Ok(Some(SolverResult::Satisfiable));
        }
        Ok(None)
    }
}

#[cfg(test)]
impl Solver {
    pub(crate) fn from_qcnf_default(qcnf: QCNF) -> Self {
        Self::from_qcnf(qcnf, Options::default())
    }
}
