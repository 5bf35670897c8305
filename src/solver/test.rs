use super::{skolem::Skolem, skolem::SkolemOptions, DecLvl, Options, Solver};
use crate::{
    literal::{Lit, Var},
    qcnf::QCNF,
    sat::varisat::Varisat,
    SolverResult,
};
use proptest::prelude::*;
use varisat::ExtendFormula;

fn solve(qcnf: QCNF) -> SolverResult {
    Solver::from_qcnf_default(qcnf).solve()
}

#[test]
fn propagation_sat() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        1 -2;
        -1 2;
    ];
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn propagation_unsat() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        1 -2;
        -1 2;
        -1 -2;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

/// Example from "Incremental Determinization" by Rabe & Seshia.
/// The formula is solved by propagation only.
#[test]
fn propagation_sat_incdet_paper() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3 4;
        // 3 <=> 1 & 2
        1 -3; 2 -3; -1 -2 3;
        // 4 <=> 1 | 3
        -1 -4; -3 -4; 1 3 4;
    ];
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn constant_always_satisfies() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        1 2;
        -1 2;
    ];
    // y = 1 is a Skolem function
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn no_value_for_y_when_x_false() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        1 2;
        1 -2;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn equality_is_sat() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        -1 2;
        1 -2;
    ];
    // y = x is a Skolem function
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn propositional_contradiction() {
    let qcnf = qcnf_formula![
        e 1;
        1;
        -1;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn empty_matrix_is_sat() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
    ];
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn empty_formula_is_sat() {
    let qcnf = QCNF::default();
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

/// Both existentials are over-constrained at the universal origin: x = (0,0)
/// forces y3 to be true and false at once.
#[test]
fn conflicting_at_the_origin() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3 4;
        1 3;
        -1 4;
        2 -3;
        -2 -4;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn negations_of_universals() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3 4;
        1 3;
        -1 -3;
        2 4;
        -2 -4;
    ];
    // y3 = !x1, y4 = !x2
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn case_split_emits_cube() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3;
        1 2 3;
        -1 -3;
    ];
    let mut solver = Solver::from_qcnf_default(qcnf);
    assert_eq!(solver.solve(), SolverResult::Satisfiable);
    assert!(!solver.solved_cases().is_empty(), "a solved case leaves a cube behind");
    // every cube consists of universal variables deterministic on the
    // permanent level
    for cube in solver.solved_cases() {
        assert!(!cube.lits().is_empty());
        for &lit in cube.lits() {
            let var = lit.var();
            assert!(solver.qcnf.is_universal(var));
            assert!(solver.skolem.is_deterministic(var));
            assert_eq!(solver.skolem.lit_decision_lvl(var), DecLvl::ROOT);
        }
    }
}

#[test]
fn global_conflict_analysis() {
    let qcnf = qcnf_formula![
        a 1;
        e 2 3;
        2;
        2 -3;
        -2 3;
        2 3;
    ];
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn unsat_with_decision() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3 4 5;
        2 -3;
        -1 -2 3;
        1 -4;
        -3 -4;
        1 3 4;
        -1 5;
        1 -5;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn unsat_through_constant_propagation() {
    let qcnf = qcnf_formula![
        a 3;
        e 1 2 4 5;
        -5 -3;
        5 -1;
        1;
        4 2;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn unsat_with_two_universals() {
    let qcnf = qcnf_formula![
        a 2 4;
        e 1 3 5;
        -5 2;
        -3 -1;
        3 1;
        1 -3 5;
        -1 -4;
    ];
    assert_eq!(solve(qcnf), SolverResult::Unsatisfiable);
}

#[test]
fn three_block_prefix() {
    let qcnf = qcnf_formula![
        e 1; a 2; e 3;
        -1 2 -3;
        2 3;
        -2 3;
        1 3;
    ];
    assert_eq!(solve(qcnf), SolverResult::Satisfiable);
}

#[test]
fn options_do_not_change_results() {
    let build = || {
        qcnf_formula![
            a 1 2;
            e 3;
            1 2 3;
            -1 -3;
        ]
    };
    for options in [
        Options { cegar: false, ..Options::default() },
        Options { case_splits: false, ..Options::default() },
        Options { case_splits: false, cegar: false, ..Options::default() },
        Options { functional_synthesis: true, ..Options::default() },
        Options { examples_max: 2, ..Options::default() },
        Options { seed: 99, ..Options::default() },
    ] {
        let mut solver = Solver::from_qcnf(build(), options);
        assert_eq!(solver.solve(), SolverResult::Satisfiable);
    }
}

#[test]
fn decision_limit_reports_unknown() {
    let qcnf = qcnf_formula![
        a 1 2;
        e 3 4;
        1 2 3 4;
        -1 -2 -3 -4;
        1 -2 3 -4;
    ];
    let options =
        Options { decision_limit: Some(0), case_splits: false, cegar: false, ..Options::default() };
    let mut solver = Solver::from_qcnf(qcnf, options);
    assert_eq!(solver.solve(), SolverResult::Unknown);
}

#[test]
#[should_panic(expected = "already has unique consequence")]
fn second_unique_consequence_is_rejected() {
    let qcnf = qcnf_formula![
        e 1 2;
        1 2;
        -1 -2;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    let idx = qcnf.clause_iterator().next().unwrap();
    skolem.set_unique_consequence(idx, Lit::from_dimacs(1));
    skolem.set_unique_consequence(idx, Lit::from_dimacs(2));
}

#[test]
#[should_panic(expected = "targets a deterministic variable")]
fn unique_consequence_needs_nondeterministic_target() {
    let qcnf = qcnf_formula![
        a 1;
        e 2;
        1 2;
        -1 -2;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    let idx = qcnf.clause_iterator().next().unwrap();
    skolem.set_unique_consequence(idx, Lit::from_dimacs(1));
}

/// Observable Skolem state used by the undo round-trip check.
type Snapshot = (Vec<(bool, Option<bool>)>, Vec<Option<Lit>>);

fn snapshot(qcnf: &QCNF, skolem: &Skolem<Varisat<'static>>) -> Snapshot {
    let vars = qcnf
        .variables()
        .map(|var| (skolem.is_deterministic(var), skolem.constant_value(var)))
        .collect();
    let ucs = qcnf.clause_iterator().map(|idx| skolem.unique_consequence(idx)).collect();
    (vars, ucs)
}

#[test]
fn undo_round_trip() {
    let mut qcnf = qcnf_formula![
        a 1 2;
        e 3;
        1 2 3;
        -1 -3;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    skolem.propagate(&mut qcnf).unwrap();
    assert!(!skolem.is_deterministic(Var::from_dimacs(3)));

    let before = snapshot(&qcnf, &skolem);
    skolem.push();
    skolem.assume_constant_value(&qcnf, Lit::from_dimacs(1));
    skolem.propagate(&mut qcnf).unwrap();
    // the assumption makes variable 3 deterministic
    assert!(skolem.is_deterministic(Var::from_dimacs(3)));
    assert_ne!(before, snapshot(&qcnf, &skolem));

    skolem.pop(&qcnf);
    assert_eq!(before, snapshot(&qcnf, &skolem));
}

#[test]
fn determinicity_is_monotone_within_a_level() {
    let mut qcnf = qcnf_formula![
        a 1;
        e 2 3;
        1 -2;
        -1 2;
        2 -3 ;
        -2 3;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    skolem.propagate(&mut qcnf).unwrap();
    let det_before: Vec<Var> =
        qcnf.variables().filter(|&v| skolem.is_deterministic(v)).collect();
    assert!(det_before.contains(&Var::from_dimacs(2)));

    skolem.push();
    skolem.assume_constant_value(&qcnf, Lit::from_dimacs(1));
    skolem.propagate(&mut qcnf).unwrap();
    for var in det_before {
        assert!(skolem.is_deterministic(var));
    }
}

#[test]
fn pure_variables_collapse_to_constants() {
    let qcnf = qcnf_formula![
        a 1;
        e 2 3;
        1 2 3;
        -1 3;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    let pure = Var::from_dimacs(3);
    assert_eq!(skolem.is_pure(pure), (true, false));
    assert_eq!(skolem.constant_value(pure), Some(true));
    assert!(skolem.is_deterministic(pure));
}

/// Totality: on satisfiable instances, every universal assignment that is
/// not covered by a solved cube admits a consistent candidate assignment.
#[test]
fn candidate_is_total_on_sampled_universals() {
    let mut qcnf = qcnf_formula![
        a 1 2;
        e 3 4;
        1 3;
        -1 -3;
        2 4;
        -2 -4;
    ];
    let mut skolem: Skolem<Varisat<'static>> = Skolem::new(SkolemOptions::default());
    skolem.initialize(&qcnf);
    skolem.propagate(&mut qcnf).unwrap();
    assert!(!skolem.is_conflicted());
    for bits in 0..4_u32 {
        let u1 = Lit::from_dimacs(if bits & 1 == 0 { -1 } else { 1 });
        let u2 = Lit::from_dimacs(if bits & 2 == 0 { -2 } else { 2 });
        skolem.push();
        skolem.assume_constant_value(&qcnf, u1);
        skolem.assume_constant_value(&qcnf, u2);
        assert!(
            skolem.solve().unwrap(),
            "candidate is not total for assignment {u1} {u2}"
        );
        skolem.pop(&qcnf);
    }
}

/// Reference semantics for 2QBF: enumerate all universal assignments and
/// check the matrix with a plain SAT solver.
fn brute_force_2qbf(universals: &[u32], matrix: &[Vec<i32>]) -> SolverResult {
    let count = universals.len();
    for bits in 0..(1_u32 << count) {
        let value = |var: u32| -> Option<bool> {
            universals
                .iter()
                .position(|&u| u == var)
                .map(|pos| bits & (1 << pos) != 0)
        };
        let mut solver = varisat::Solver::new();
        let mut unsat = false;
        for clause in matrix {
            let mut reduced = Vec::new();
            let mut satisfied = false;
            for &lit in clause {
                match value(lit.unsigned_abs()) {
                    Some(v) if v == (lit > 0) => {
                        satisfied = true;
                        break;
                    }
                    Some(_) => {}
                    None => {
                        reduced.push(varisat::Lit::from_dimacs(isize::try_from(lit).unwrap()));
                    }
                }
            }
            if satisfied {
                continue;
            }
            if reduced.is_empty() {
                unsat = true;
                break;
            }
            solver.add_clause(&reduced);
        }
        if unsat || !solver.solve().unwrap() {
            return SolverResult::Unsatisfiable;
        }
    }
    SolverResult::Satisfiable
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random small 2QBF instances agree with the brute-force reference.
    #[test]
    fn agrees_with_brute_force(
        matrix in proptest::collection::vec(
            proptest::collection::vec((1_i32..=4, proptest::bool::ANY), 1..=3),
            0..=4,
        )
    ) {
        let matrix: Vec<Vec<i32>> = matrix
            .into_iter()
            .map(|clause| {
                clause.into_iter().map(|(var, sign)| if sign { var } else { -var }).collect()
            })
            .collect();
        let expected = brute_force_2qbf(&[1, 2], &matrix);

        let mut qcnf = QCNF::default();
        let universals = qcnf.new_scope(crate::QuantTy::Forall);
        for var in [1, 2] {
            qcnf.new_var(Var::from_dimacs(var), universals, true);
        }
        let existentials = qcnf.new_scope(crate::QuantTy::Exists);
        for var in [3, 4] {
            qcnf.new_var(Var::from_dimacs(var), existentials, true);
        }
        for clause in &matrix {
            let lits: Vec<Lit> = clause.iter().map(|&l| Lit::from_dimacs(l)).collect();
            qcnf.new_clause(&lits, true, true).unwrap();
        }
        prop_assert_eq!(solve(qcnf), expected);
    }
}
