//! The labeled clause model.

use crate::vars::VarPool;

/// Clause shapes the encoding emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    /// A single literal holds unconditionally.
    Certainty,
    /// The first literal implies the disjunction of the rest.
    Implication,
    /// The first literal is equivalent to the disjunction of the rest.
    Equivalence,
}

/// A labeled clause; the label names the constraint for explanations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Shape.
    pub kind: ClauseKind,
    /// Literals; for implication/equivalence the head comes first.
    pub literals: Vec<i32>,
    /// Human-readable origin (a dependency pattern, a pkgver).
    pub label: Option<String>,
}

impl Clause {
    /// A `Certainty` clause.
    pub fn certainty(literal: i32) -> Self {
        Self { kind: ClauseKind::Certainty, literals: vec![literal], label: None }
    }

    /// An `Implication` head -> disjunction.
    pub fn implication(head: i32, disjunction: impl IntoIterator<Item = i32>) -> Self {
        let mut literals = vec![head];
        literals.extend(disjunction);
        Self { kind: ClauseKind::Implication, literals, label: None }
    }

    /// An `Equivalence` head <-> disjunction.
    pub fn equivalence(head: i32, disjunction: impl IntoIterator<Item = i32>) -> Self {
        let mut literals = vec![head];
        literals.extend(disjunction);
        Self { kind: ClauseKind::Equivalence, literals, label: None }
    }

    /// Attach a label.
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Lower to CNF.
    ///
    /// `p -> (q | r)` is `(!p | q | r)`; the equivalence adds the
    /// backward implications `(!q | p) (!r | p)`.
    pub fn to_cnf(&self) -> Vec<Vec<i32>> {
        match self.kind {
            ClauseKind::Certainty => vec![self.literals.clone()],
            ClauseKind::Implication => {
                let mut cnf = vec![-self.literals[0]];
                cnf.extend(&self.literals[1..]);
                vec![cnf]
            }
            ClauseKind::Equivalence => {
                let head = self.literals[0];
                let mut forward = vec![-head];
                forward.extend(&self.literals[1..]);
                let mut out = vec![forward];
                for &member in &self.literals[1..] {
                    out.push(vec![-member, head]);
                }
                out
            }
        }
    }

    /// Render with the pool's names, for the explanation pass.
    pub fn render(&self, pool: &VarPool) -> String {
        let mut out = match self.kind {
            ClauseKind::Certainty => {
                if self.literals[0] > 0 {
                    format!("true -> {}", pool.text(self.literals[0]))
                } else {
                    format!("{} -> false", pool.text(-self.literals[0]))
                }
            }
            ClauseKind::Implication | ClauseKind::Equivalence => {
                let arrow = if self.kind == ClauseKind::Implication { "->" } else { "<->" };
                let body: Vec<String> =
                    self.literals[1..].iter().map(|&l| pool.text(l)).collect();
                format!("{} {arrow} ({})", pool.text(self.literals[0]), body.join(" | "))
            }
        };
        if let Some(label) = &self.label {
            out.push_str(&format!(" {{{label}}}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnf_lowering() {
        assert_eq!(Clause::certainty(4).to_cnf(), vec![vec![4]]);
        assert_eq!(Clause::implication(4, [8, 12]).to_cnf(), vec![vec![-4, 8, 12]]);
        assert_eq!(
            Clause::equivalence(4, [8, 12]).to_cnf(),
            vec![vec![-4, 8, 12], vec![-8, 4], vec![-12, 4]]
        );
    }

    #[test]
    fn rendering_uses_variable_names() {
        let mut pool = VarPool::new();
        let p = pool.real("app-1.0_1");
        let lib = pool.shlib("libx.so.1");
        let clause = Clause::implication(p, [lib]).labeled("libx.so.1");
        assert_eq!(clause.render(&pool), "app-1.0_1 -> (shlib(libx.so.1)) {libx.so.1}");
    }
}
