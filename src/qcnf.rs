//! The QCNF store: variables, scopes, clauses, and per-literal occurrence
//! lists, together with the mutation protocol the front end and the engine
//! consume.

use crate::{
    clause::{
        alloc::{Allocator, ClauseIdx},
        Clause,
    },
    datastructure::{LitVec, VarVec},
    invariant,
    literal::{Lit, LitSlice, Var},
    qdimacs::FromQdimacs,
    QuantTy,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(usize);

/// A block of variables sharing a prefix position. For DQBF, existential
/// scopes carry the explicit set of universals they may depend on; `None`
/// means the prenex default (everything bound before).
#[derive(Debug, Clone)]
pub struct Scope {
    pub(crate) id: ScopeId,
    pub(crate) quantifier: QuantTy,
    pub(crate) variables: Vec<Var>,
    pub(crate) dependencies: Option<Vec<Var>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct VarData {
    scope: Option<ScopeId>,
    pub(crate) original: bool,
}

impl VarData {
    pub(crate) fn scope(&self) -> ScopeId {
        self.scope.expect("all variables are bound")
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.scope.is_some()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedFormula {
    #[error("literal {lit} references variable {var} that is not bound by any scope")]
    UnboundVariable { lit: i32, var: i32 },

    #[error("existential {existential} may not depend on universal {universal} occurring in the same clause")]
    IllegalDependence { existential: i32, universal: i32 },
}

/// The formula store. Original variables and clauses are created at parse
/// time and never destroyed; learned clauses may be deactivated later, which
/// preserves their index.
///
/// Scope 0 is the implicit outermost existential block; free variables of
/// the input are bound there.
#[derive(Debug, Clone)]
pub struct QCNF {
    vars: VarVec<VarData>,
    prefix: Vec<Scope>,
    alloc: Allocator,
    /// Indices of active clauses in index order.
    active: Vec<ClauseIdx>,
    occs: LitVec<Vec<ClauseIdx>>,
    /// Set when an (universally reduced) empty clause was added.
    pub(crate) contains_empty_clause: bool,
}

impl Default for QCNF {
    fn default() -> Self {
        let implicit = Scope {
            id: ScopeId(0),
            quantifier: QuantTy::Exists,
            variables: Vec::new(),
            dependencies: None,
        };
        Self {
            vars: VarVec::default(),
            prefix: vec![implicit],
            alloc: Allocator::default(),
            active: Vec::new(),
            occs: LitVec::default(),
            contains_empty_clause: false,
        }
    }
}

impl QCNF {
    /// Registers `var` in the given scope. Idempotent for variables that are
    /// already bound; re-binding moves the variable to the new scope.
    pub fn new_var(&mut self, var: Var, scope: ScopeId, original: bool) -> Var {
        if var.as_index() >= self.vars.get_var_count() {
            self.set_var_count(var.as_index() + 1);
        }
        let data = &mut self.vars[var];
        data.original = original;
        let previous = data.scope.replace(scope);
        match previous {
            Some(other) if other != scope => {
                // variable was bound twice, remove it from the outer scope
                self.prefix[other.0].variables.retain(|&v| v != var);
                self.prefix[scope.0].variables.push(var);
            }
            Some(_) => {}
            None => self.prefix[scope.0].variables.push(var),
        }
        var
    }

    /// Opens a new scope block at the end of the prefix, merging with the
    /// previous block if the quantifier matches.
    pub fn new_scope(&mut self, quantifier: QuantTy) -> ScopeId {
        match self.prefix.last() {
            Some(scope) if scope.quantifier == quantifier && scope.dependencies.is_none() => {
                scope.id
            }
            _ => {
                let id = ScopeId(self.prefix.len());
                self.prefix.push(Scope { id, quantifier, variables: Vec::new(), dependencies: None });
                id
            }
        }
    }

    /// DQBF: binds `var` existentially with an explicit dependency set.
    pub fn new_dependency_scope(&mut self, var: Var, dependencies: Vec<Var>) -> ScopeId {
        let id = ScopeId(self.prefix.len());
        self.prefix.push(Scope {
            id,
            quantifier: QuantTy::Exists,
            variables: Vec::new(),
            dependencies: Some(dependencies),
        });
        self.new_var(var, id, true);
        id
    }

    pub(crate) fn set_var_count(&mut self, count: usize) {
        self.vars.set_var_count(count);
        self.occs.set_var_count(count);
    }

    pub(crate) fn var_count(&self) -> usize {
        self.vars.get_var_count()
    }

    pub(crate) fn is_dqbf(&self) -> bool {
        self.prefix.iter().any(|scope| scope.dependencies.is_some())
    }

    pub(crate) fn is_existential(&self, var: Var) -> bool {
        let scope = self.vars[var].scope();
        self.prefix[scope.0].quantifier.is_existential()
    }

    pub(crate) fn is_universal(&self, var: Var) -> bool {
        !self.is_existential(var)
    }

    pub(crate) fn is_original(&self, var: Var) -> bool {
        self.vars[var].original
    }

    pub(crate) fn scope_of(&self, var: Var) -> ScopeId {
        self.vars[var].scope()
    }

    /// Whether the existential `e` may depend on the universal `u`.
    pub(crate) fn may_depend_on(&self, e: Var, u: Var) -> bool {
        debug_assert!(self.is_existential(e) && self.is_universal(u));
        let scope = &self.prefix[self.vars[e].scope().0];
        match &scope.dependencies {
            Some(deps) => deps.contains(&u),
            None => self.vars[u].scope() <= scope.id,
        }
    }

    /// Adds a clause. Deduplicates literals, drops tautologies, applies
    /// universal reduction, and registers occurrences. Returns `None` for
    /// tautologies.
    ///
    /// # Errors
    ///
    /// Fails with [`MalformedFormula`] for unbound variables and, on DQBF
    /// inputs, for dependencies the prefix does not allow.
    pub fn new_clause(
        &mut self,
        lits: &[Lit],
        original: bool,
        consistent_with_originals: bool,
    ) -> Result<Option<ClauseIdx>, MalformedFormula> {
        debug!("add clause: {}", LitSlice::from(lits));
        for &lit in lits {
            let bound = self.vars.get(lit.var()).map_or(false, VarData::is_bound);
            if !bound {
                return Err(MalformedFormula::UnboundVariable {
                    lit: lit.to_dimacs(),
                    var: lit.var().to_dimacs(),
                });
            }
        }
        let mut lits = Vec::from(lits);
        lits.sort_unstable();
        lits.dedup();
        if lits.iter().zip(lits.iter().skip(1)).any(|(&left, &right)| left == !right) {
            // Tautology; literals of opposing signs are consecutive after
            // sorting by variable index.
            return Ok(None);
        }

        // universal reduction: universals bound after every existential of
        // the clause can never help satisfying it
        if let Some(reduction_level) = lits
            .iter()
            .filter(|lit| self.is_existential(lit.var()))
            .map(|lit| self.scope_of(lit.var()))
            .max()
        {
            lits.retain(|lit| {
                self.is_existential(lit.var()) || self.scope_of(lit.var()) <= reduction_level
            });
        } else {
            lits.clear();
        }

        if self.is_dqbf() {
            self.check_dependencies(&lits)?;
        }

        if lits.is_empty() {
            warn!("empty clause was added, instance is unsatisfiable");
            self.contains_empty_clause = true;
        }

        let idx = self.alloc.add(&lits, original, consistent_with_originals);
        self.active.push(idx);
        for &lit in self.alloc[idx].lits() {
            self.occs[lit].push(idx);
        }
        Ok(Some(idx))
    }

    fn check_dependencies(&self, lits: &[Lit]) -> Result<(), MalformedFormula> {
        for e in lits.iter().filter(|l| self.is_existential(l.var())) {
            for u in lits.iter().filter(|l| self.is_universal(l.var())) {
                if !self.may_depend_on(e.var(), u.var()) {
                    return Err(MalformedFormula::IllegalDependence {
                        existential: e.var().to_dimacs(),
                        universal: u.var().to_dimacs(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Unregisters the clause from all occurrence lists. The index is
    /// preserved and never reused.
    pub(crate) fn deactivate_clause(&mut self, idx: ClauseIdx) {
        let clause = &mut self.alloc[idx];
        invariant!(clause.active, "deactivating clause {idx} twice");
        clause.active = false;
        if let Ok(pos) = self.active.binary_search(&idx) {
            self.active.remove(pos);
        }
        let lits: Vec<_> = self.alloc[idx].lits().to_vec();
        for lit in lits {
            self.occs[lit].retain(|&c| c != idx);
        }
    }

    /// Yields all currently active clauses in index order.
    pub(crate) fn clause_iterator(&self) -> impl Iterator<Item = ClauseIdx> + '_ {
        self.active.iter().copied()
    }

    pub(crate) fn clause(&self, idx: ClauseIdx) -> &Clause {
        &self.alloc[idx]
    }

    pub(crate) fn clause_mut(&mut self, idx: ClauseIdx) -> &mut Clause {
        &mut self.alloc[idx]
    }

    pub(crate) fn occurrences(&self, lit: Lit) -> &[ClauseIdx] {
        &self.occs[lit]
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = Var> + '_ {
        self.vars.iter().filter(|(_, data)| data.is_bound()).map(|(var, _)| var)
    }

    pub(crate) fn reserve_clauses(&mut self, num_clauses: u32) {
        self.alloc.reserve(num_clauses);
    }

    fn num_clauses(&self) -> u32 {
        self.active.len().try_into().unwrap()
    }

    fn num_variables(&self) -> u32 {
        self.vars
            .iter()
            .filter(|(_, data)| data.is_bound())
            .map(|(var, _)| var.to_dimacs())
            .max()
            .unwrap_or_default()
            .try_into()
            .unwrap()
    }

    /// Test constructor from a QDIMACS-like description.
    #[must_use]
    pub fn from_parts(prefix: &[(QuantTy, &[u32])], matrix: &[&[i32]]) -> Self {
        let mut qcnf = QCNF::default();
        for &(quantifier, vars) in prefix {
            let scope = qcnf.new_scope(quantifier);
            for &var in vars {
                qcnf.new_var(Var::from_dimacs(var.try_into().unwrap()), scope, true);
            }
        }
        for &lits in matrix {
            let lits: Vec<_> = lits.iter().map(|&l| Lit::from_dimacs(l)).collect();
            qcnf.new_clause(&lits, true, true).expect("test formulas are well-formed");
        }
        qcnf
    }

    /// Counts the connected components of variables linked by shared active
    /// clauses. Exposed for the detailed miniscoping statistics.
    pub fn miniscoping_components(&self) -> MiniscopingStats {
        let mut repr: Vec<usize> = (0..self.vars.get_var_count()).collect();
        fn find(repr: &mut Vec<usize>, mut i: usize) -> usize {
            while repr[i] != i {
                repr[i] = repr[repr[i]];
                i = repr[i];
            }
            i
        }
        for &idx in &self.active {
            let clause = &self.alloc[idx];
            let mut lits = clause.iter();
            let Some(first) = lits.next() else { continue };
            let root = find(&mut repr, first.var().as_index());
            for lit in lits {
                let other = find(&mut repr, lit.var().as_index());
                repr[other] = root;
            }
        }
        let mut components = std::collections::HashSet::new();
        let mut existential_only = std::collections::HashSet::new();
        for (var, data) in self.vars.iter() {
            if !data.is_bound() {
                continue;
            }
            let root = find(&mut repr, var.as_index());
            components.insert(root);
            if self.is_existential(var) {
                existential_only.insert(root);
            } else {
                existential_only.remove(&root);
            }
        }
        MiniscopingStats { components: components.len(), existential_only: existential_only.len() }
    }
}

/// Partitioning statistics for `--print-detailed-miniscoping-stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniscopingStats {
    pub components: usize,
    pub existential_only: usize,
}

impl std::fmt::Display for MiniscopingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "connected components: {}", self.components)?;
        write!(f, "purely existential components: {}", self.existential_only)
    }
}

impl FromQdimacs for QCNF {
    fn set_num_variables(&mut self, variables: u32) {
        self.set_var_count(variables as usize);
    }

    fn set_num_clauses(&mut self, clauses: u32) {
        self.reserve_clauses(clauses);
    }

    fn quantify(&mut self, quant: QuantTy, vars: &[Var]) {
        let scope = self.new_scope(quant);
        for &var in vars {
            self.new_var(var, scope, true);
        }
    }

    fn dependency(&mut self, var: Var, deps: &[Var]) {
        self.new_dependency_scope(var, deps.to_vec());
    }

    fn add_clause(&mut self, lits: &[Lit]) -> Result<(), MalformedFormula> {
        // free variables are implicitly bound in the outermost existential scope
        for &lit in lits {
            let var = lit.var();
            if !self.vars.get(var).map_or(false, VarData::is_bound) {
                self.new_var(var, ScopeId(0), true);
            }
        }
        self.new_clause(lits, true, true).map(|_| ())
    }
}

impl std::fmt::Display for QCNF {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "p cnf {} {}", self.num_variables(), self.num_clauses())?;
        for scope in &self.prefix {
            if scope.variables.is_empty() {
                continue;
            }
            match &scope.dependencies {
                Some(deps) => {
                    for &var in &scope.variables {
                        write!(f, "d {var}")?;
                        for dep in deps {
                            write!(f, " {dep}")?;
                        }
                        writeln!(f, " 0")?;
                    }
                }
                None => writeln!(
                    f,
                    "{} {} 0",
                    scope.quantifier,
                    scope.variables.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
                )?,
            }
        }
        for &idx in &self.active {
            writeln!(f, "{}", self.alloc[idx])?;
        }
        Ok(())
    }
}

#[cfg(test)]
macro_rules! qcnf_core {
    ($prefix:expr, $matrix:expr,) => {
		(crate::qcnf::QCNF::from_parts(&$prefix, &$matrix))
	};
    ($prefix:expr, $matrix:expr, a $( $x:literal )* ; $($tail:tt)* ) => {{
		$prefix.push((crate::quantifier::QuantTy::Forall, &[ $( $x ),* ]));
        qcnf_core![$prefix, $matrix, $($tail)*]
    }};
    ($prefix:expr, $matrix:expr, e $( $x:literal )* ; $($tail:tt)* ) => {{
		$prefix.push((crate::quantifier::QuantTy::Exists, &[ $( $x ),* ]));
        qcnf_core![$prefix, $matrix,$($tail)*]
    }};
    ($prefix:expr, $matrix:expr, $( $x:literal )* ; $($tail:tt)* ) => {{
		$matrix.push(&[ $( $x ),* ]);
        qcnf_core![$prefix, $matrix, $($tail)*]
    }};
}

/// Macro that creates a [`QCNF`] instance from a QDIMACS-like representation.
/// The main differences are:
/// * No support for comments
/// * No header line
/// * Lines are seperated by `;`, whereas QDIMACS uses `0`.
///
/// # Example
/// ```
/// let qcnf = qcnf_formula![
///     a 1 2;
///     e 3;
///     1 2;
/// ];
/// ```
///
#[cfg(test)]
macro_rules! qcnf_formula {
	($($tail:tt)*) => {
		 {
			 let mut prefix: Vec<(crate::quantifier::QuantTy, &[u32])> = Vec::new();
			 let mut matrix: Vec<&[i32]> = Vec::new();
			 qcnf_core![prefix, matrix, $($tail)*]
		 }

	};
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_basics() {
        let qcnf = qcnf_formula![
            a 1 2;
            e 3;
            1 2;
            1 -3;
        ];
        assert_eq!(qcnf.num_clauses(), 2);
        assert_eq!(qcnf.num_variables(), 3);
        assert!(qcnf.is_universal(Var::from_dimacs(1)));
        assert!(qcnf.is_existential(Var::from_dimacs(3)));
    }

    #[test]
    fn tautologies_and_duplicates() {
        let mut qcnf = QCNF::default();
        let scope = qcnf.new_scope(QuantTy::Exists);
        let var = qcnf.new_var(Var::from_dimacs(1), scope, true);
        assert_eq!(
            qcnf.new_clause(&[var.positive(), var.negative()], true, true),
            Ok(None),
            "tautologies are dropped"
        );
        let idx = qcnf
            .new_clause(&[var.positive(), var.positive()], true, true)
            .unwrap()
            .expect("not a tautology");
        assert_eq!(qcnf.clause(idx).len(), 1);
    }

    #[test]
    fn universal_reduction() {
        // universal 2 is bound after the only existential
        let qcnf = qcnf_formula![
            e 1;
            a 2;
            1 2;
        ];
        let idx = qcnf.clause_iterator().next().unwrap();
        assert_eq!(qcnf.clause(idx).lits(), &[Lit::from_dimacs(1)]);
    }

    #[test]
    fn universal_only_clause_is_empty() {
        let qcnf = qcnf_formula![
            a 1;
            e 2;
            1;
        ];
        assert!(qcnf.contains_empty_clause);
    }

    #[test]
    fn unbound_variable() {
        let mut qcnf = QCNF::default();
        let err = qcnf.new_clause(&[Lit::from_dimacs(4)], true, true).unwrap_err();
        assert_eq!(err, MalformedFormula::UnboundVariable { lit: 4, var: 4 });
    }

    #[test]
    fn illegal_dependence() {
        let mut qcnf = QCNF::default();
        let universals = qcnf.new_scope(QuantTy::Forall);
        let u1 = qcnf.new_var(Var::from_dimacs(1), universals, true);
        let u2 = qcnf.new_var(Var::from_dimacs(2), universals, true);
        qcnf.new_dependency_scope(Var::from_dimacs(3), vec![u1]);
        let e = Var::from_dimacs(3);
        assert!(qcnf.new_clause(&[u1.positive(), e.positive()], true, true).is_ok());
        let err = qcnf.new_clause(&[u2.positive(), e.positive()], true, true).unwrap_err();
        assert_eq!(err, MalformedFormula::IllegalDependence { existential: 3, universal: 2 });
    }

    #[test]
    fn occurrence_lists_follow_deactivation() {
        let mut qcnf = qcnf_formula![
            e 1 2;
            1 2;
            -1 2;
        ];
        let first = qcnf.clause_iterator().next().unwrap();
        assert_eq!(qcnf.occurrences(Lit::from_dimacs(1)), &[first]);
        qcnf.deactivate_clause(first);
        assert!(qcnf.occurrences(Lit::from_dimacs(1)).is_empty());
        assert_eq!(qcnf.clause_iterator().count(), 1);
        // the index is preserved
        assert!(!qcnf.clause(first).active);
    }

    #[test]
    fn miniscoping_components() {
        let qcnf = qcnf_formula![
            a 1;
            e 2 3 4;
            1 2;
            3 4;
        ];
        let stats = qcnf.miniscoping_components();
        assert_eq!(stats.components, 2);
        assert_eq!(stats.existential_only, 1);
    }
}
