use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct Statistics {
    pub(crate) global: GlobalStats,
    pub(crate) skolem: SkolemStats,
    pub(crate) cegar: CegarStats,
    pub(crate) case_splits: CaseSplitStats,
}

#[derive(Debug, Default)]
pub(crate) struct GlobalStats {
    pub(crate) decisions: u32,
    pub(crate) conflicts: u32,
    pub(crate) added_clauses: u32,
    pub(crate) deleted_clauses: u32,
    pub(crate) restarts: u32,
    pub(crate) major_restarts: u32,
    pub(crate) solve_time: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct SkolemStats {
    pub(crate) propagations: u64,
    pub(crate) determinizations: u32,
    pub(crate) constant_propagations: u32,
    pub(crate) local_det_checks: u32,
    pub(crate) global_conflict_checks: u32,
    pub(crate) pure_variables: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CegarStats {
    pub(crate) rounds: u32,
    pub(crate) cubes: u32,
    pub(crate) successful_minimizations: u32,
    pub(crate) additional_assignments: u32,
    pub(crate) minimizations_helped_by_additional_assignments: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CaseSplitStats {
    pub(crate) cases_explored: u32,
    pub(crate) completed_cases: u32,
    pub(crate) probes: u32,
    pub(crate) failed_literals: u32,
    pub(crate) vacuous_assumptions: u32,
}
