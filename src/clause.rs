use crate::literal::Lit;

pub(crate) mod alloc;

/// A clause of the matrix. Literals are sorted and duplicate-free.
///
/// `original` distinguishes parser-provided clauses from learned ones;
/// `consistent_with_originals` is false for clauses that depend on reversible
/// assumptions; `blocked` marks clauses permanently satisfied by a root-level
/// constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    lits: Vec<Lit>,
    pub(crate) original: bool,
    pub(crate) active: bool,
    pub(crate) consistent_with_originals: bool,
    pub(crate) blocked: bool,
}

impl Clause {
    pub(crate) fn new(literals: &[Lit], original: bool, consistent_with_originals: bool) -> Self {
        Self {
            lits: literals.to_vec(),
            original,
            active: true,
            consistent_with_originals,
            blocked: false,
        }
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Lit> {
        self.lits.iter()
    }

    pub(crate) fn lits(&self) -> &[Lit] {
        &self.lits
    }

    pub(crate) fn len(&self) -> usize {
        self.lits.len()
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &lit in &self.lits {
            write!(f, "{lit} ")?;
        }
        write!(f, "0")
    }
}

impl<'a> IntoIterator for &'a Clause {
    type Item = &'a Lit;
    type IntoIter = std::slice::Iter<'a, Lit>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
