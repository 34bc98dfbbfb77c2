//! A small DPLL satisfiability solver with assumption support.
//!
//! The instances the consistency engine produces are modest (one
//! variable block per pkgver and soname, clauses linear in the index
//! size), so a clean recursive DPLL with unit propagation is enough.
//! On top of plain solving it offers the two higher-level queries the
//! engine needs: an inclusion-minimal correcting subset of assumptions,
//! and an inclusion-minimal unsatisfiable core for explanations.

use crate::clause::Clause;
use std::collections::BTreeMap;
use tracing::trace;

enum ClauseState {
    Satisfied,
    Conflict,
    Unit(i32),
    Unresolved(i32),
}

/// CNF store with clause origins.
#[derive(Debug, Default)]
pub struct Solver {
    cnf: Vec<Vec<i32>>,
    /// Source clause index of each CNF clause.
    origins: Vec<usize>,
    source_count: usize,
}

impl Solver {
    /// Create an empty solver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a labeled clause; returns its source index.
    pub fn add(&mut self, clause: &Clause) -> usize {
        let origin = self.source_count;
        self.source_count += 1;
        for cnf_clause in clause.to_cnf() {
            self.cnf.push(cnf_clause);
            self.origins.push(origin);
        }
        origin
    }

    /// Decide satisfiability under the given assumption literals.
    pub fn solve(&self, assumptions: &[i32]) -> bool {
        self.solve_filtered(assumptions, None)
    }

    fn solve_filtered(&self, assumptions: &[i32], active: Option<&[bool]>) -> bool {
        let mut assignment = BTreeMap::new();
        for &literal in assumptions {
            if !assign(&mut assignment, literal) {
                return false;
            }
        }
        self.dpll(assignment, active)
    }

    fn dpll(&self, mut assignment: BTreeMap<i32, bool>, active: Option<&[bool]>) -> bool {
        // Unit propagation to fixpoint.
        loop {
            let mut changed = false;
            for (idx, clause) in self.cnf.iter().enumerate() {
                if let Some(active) = active {
                    if !active[self.origins[idx]] {
                        continue;
                    }
                }
                match evaluate(clause, &assignment) {
                    ClauseState::Satisfied | ClauseState::Unresolved(_) => {}
                    ClauseState::Conflict => return false,
                    ClauseState::Unit(literal) => {
                        if !assign(&mut assignment, literal) {
                            return false;
                        }
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        // Branch on the first unresolved clause.
        for (idx, clause) in self.cnf.iter().enumerate() {
            if let Some(active) = active {
                if !active[self.origins[idx]] {
                    continue;
                }
            }
            if let ClauseState::Unresolved(literal) = evaluate(clause, &assignment) {
                let mut positive = assignment.clone();
                assign(&mut positive, literal);
                if self.dpll(positive, active) {
                    return true;
                }
                assign(&mut assignment, -literal);
                return self.dpll(assignment, active);
            }
        }
        true
    }

    /// Inclusion-minimal correcting subset: the assumptions to drop so
    /// the instance becomes satisfiable, preferring to keep earlier
    /// ones. `None` when the instance is unsatisfiable even with every
    /// assumption dropped.
    pub fn correcting_subset(&self, assumptions: &[i32]) -> Option<Vec<i32>> {
        if !self.solve(&[]) {
            return None;
        }
        let mut kept: Vec<i32> = Vec::with_capacity(assumptions.len());
        let mut dropped = Vec::new();
        for &assumption in assumptions {
            kept.push(assumption);
            if self.solve(&kept) {
                continue;
            }
            kept.pop();
            dropped.push(assumption);
        }
        trace!(kept = kept.len(), dropped = dropped.len(), "correcting subset computed");
        Some(dropped)
    }

    /// Inclusion-minimal unsatisfiable core, as source clause indices.
    /// Meaningful only when `solve(&[])` is false.
    pub fn unsat_core(&self) -> Vec<usize> {
        let mut active = vec![true; self.source_count];
        for idx in 0..self.source_count {
            active[idx] = false;
            if self.solve_filtered(&[], Some(&active)) {
                // Removing this source makes the rest satisfiable, so
                // it belongs to the core.
                active[idx] = true;
            }
        }
        (0..self.source_count).filter(|&i| active[i]).collect()
    }
}

fn assign(assignment: &mut BTreeMap<i32, bool>, literal: i32) -> bool {
    let variable = literal.abs();
    let value = literal > 0;
    match assignment.insert(variable, value) {
        Some(previous) if previous != value => false,
        _ => true,
    }
}

fn evaluate(clause: &[i32], assignment: &BTreeMap<i32, bool>) -> ClauseState {
    let mut first_unassigned = None;
    let mut unassigned = 0;
    for &literal in clause {
        match assignment.get(&literal.abs()) {
            Some(&value) if value == (literal > 0) => return ClauseState::Satisfied,
            Some(_) => {}
            None => {
                unassigned += 1;
                if first_unassigned.is_none() {
                    first_unassigned = Some(literal);
                }
            }
        }
    }
    match (unassigned, first_unassigned) {
        (0, _) => ClauseState::Conflict,
        (1, Some(literal)) => ClauseState::Unit(literal),
        (_, Some(literal)) => ClauseState::Unresolved(literal),
        _ => unreachable!("unassigned literals counted without a witness"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::Clause;

    #[test]
    fn basic_satisfiability() {
        let mut solver = Solver::new();
        solver.add(&Clause::certainty(4));
        solver.add(&Clause::implication(4, [8]));
        assert!(solver.solve(&[]));
        assert!(solver.solve(&[8]));
        assert!(!solver.solve(&[-8]));
    }

    #[test]
    fn equivalence_propagates_both_ways() {
        let mut solver = Solver::new();
        solver.add(&Clause::equivalence(4, [8, 12]));
        assert!(solver.solve(&[4, 8]));
        assert!(solver.solve(&[-4, -8, -12]));
        assert!(!solver.solve(&[-4, 8]));
        assert!(!solver.solve(&[4, -8, -12]));
    }

    #[test]
    fn correcting_subset_is_minimal_and_orderly() {
        let mut solver = Solver::new();
        // 4 and 8 exclude each other; 12 is free.
        solver.add(&Clause::equivalence(4, [-8]));
        let dropped = solver.correcting_subset(&[4, 8, 12]).unwrap();
        // 4 is kept (first), 8 must go, 12 stays.
        assert_eq!(dropped, vec![8]);
    }

    #[test]
    fn unsat_without_assumptions_has_no_correcting_subset() {
        let mut solver = Solver::new();
        solver.add(&Clause::certainty(4));
        solver.add(&Clause::certainty(-4));
        assert_eq!(solver.correcting_subset(&[8]), None);
    }

    #[test]
    fn unsat_core_is_minimal() {
        let mut solver = Solver::new();
        let a = solver.add(&Clause::certainty(4));
        let b = solver.add(&Clause::certainty(-4));
        // Unrelated satisfiable clause stays out of the core.
        let c = solver.add(&Clause::implication(8, [12]));
        let core = solver.unsat_core();
        assert!(core.contains(&a));
        assert!(core.contains(&b));
        assert!(!core.contains(&c));
    }
}
