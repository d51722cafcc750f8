//! Dominator sets and natural loops.
//!
//! Dominators are computed with the classic iterative data-flow formulation:
//! the entry block dominates only itself, every other reachable block starts
//! out dominated by everything, and each pass sets
//! `dom(b) = {b} ∪ ⋂ dom(p)` over reachable predecessors `p` until nothing
//! changes. Blocks are visited in reverse post-order, so acyclic graphs
//! converge in a single pass.

/// Fixed-size bit set over block indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockSet {
    words: Vec<u64>,
}

impl BlockSet {
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn full(len: usize) -> Self {
        let mut set = Self::empty(len);
        for i in 0..len {
            set.insert(i);
        }
        set
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.words
            .get(idx / 64)
            .is_some_and(|w| w & (1 << (idx % 64)) != 0)
    }

    pub fn insert(&mut self, idx: usize) {
        if let Some(w) = self.words.get_mut(idx / 64) {
            *w |= 1 << (idx % 64);
        }
    }

    pub fn intersect_with(&mut self, other: &BlockSet) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64).filter(move |bit| w & (1 << bit) != 0).map(move |bit| wi * 64 + bit)
        })
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Dominator relation of one CFG snapshot.
#[derive(Debug, Clone)]
pub struct Dominators {
    sets: Vec<BlockSet>,
    iterations: usize,
}

impl Dominators {
    /// Compute dominator sets. `preds[b]` lists predecessors of block `b`,
    /// `rpo` lists reachable blocks in reverse post-order starting at the entry.
    pub fn compute(preds: &[Vec<usize>], rpo: &[usize]) -> Self {
        let n = preds.len();
        let mut reachable = BlockSet::empty(n);
        for &b in rpo {
            reachable.insert(b);
        }

        let mut sets: Vec<BlockSet> = (0..n)
            .map(|b| {
                if reachable.contains(b) && Some(&b) != rpo.first() {
                    BlockSet::full(n)
                } else {
                    let mut only = BlockSet::empty(n);
                    only.insert(b);
                    only
                }
            })
            .collect();

        let mut iterations = 0;
        let mut changed = true;
        while changed {
            changed = false;
            iterations += 1;
            for &b in rpo.iter().skip(1) {
                let mut new_set = BlockSet::full(n);
                let mut any_pred = false;
                for &p in &preds[b] {
                    if reachable.contains(p) {
                        new_set.intersect_with(&sets[p]);
                        any_pred = true;
                    }
                }
                if !any_pred {
                    new_set = BlockSet::empty(n);
                }
                new_set.insert(b);
                if new_set != sets[b] {
                    sets[b] = new_set;
                    changed = true;
                }
            }
        }
        log::trace!("dominators converged after {iterations} passes over {n} blocks");

        Self { sets, iterations }
    }

    /// Whether `a` dominates `b`.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.sets.get(b).is_some_and(|s| s.contains(a))
    }

    pub fn dominators_of(&self, b: usize) -> &BlockSet {
        &self.sets[b]
    }

    /// Passes needed to reach the fixed point.
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Natural loop identified by its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: usize,
    /// Sources of the back edges into `header`.
    pub latches: Vec<usize>,
    pub body: BlockSet,
}

/// Collect natural loops from back edges, merging loops that share a header.
pub fn natural_loops(
    preds: &[Vec<usize>],
    doms: &Dominators,
    back_edges: &[(usize, usize)],
) -> Vec<NaturalLoop> {
    let n = preds.len();
    let mut loops: Vec<NaturalLoop> = Vec::new();

    for &(latch, header) in back_edges {
        let idx = match loops.iter().position(|l| l.header == header) {
            Some(i) => i,
            None => {
                let mut body = BlockSet::empty(n);
                body.insert(header);
                loops.push(NaturalLoop {
                    header,
                    latches: Vec::new(),
                    body,
                });
                loops.len() - 1
            }
        };
        let lp = &mut loops[idx];
        lp.latches.push(latch);

        let mut stack = vec![latch];
        while let Some(b) = stack.pop() {
            if lp.body.contains(b) || !doms.dominates(header, b) {
                continue;
            }
            lp.body.insert(b);
            stack.extend(preds[b].iter().copied());
        }
    }
    loops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockset_basics() {
        let mut s = BlockSet::empty(70);
        s.insert(3);
        s.insert(65);
        assert!(s.contains(65));
        assert!(!s.contains(64));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![3, 65]);
        let mut f = BlockSet::full(70);
        assert_eq!(f.count(), 70);
        f.intersect_with(&s);
        assert_eq!(f, s);
    }

    #[test]
    fn test_diamond_dominators() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let preds = vec![vec![], vec![0], vec![0], vec![1, 2]];
        let doms = Dominators::compute(&preds, &[0, 1, 2, 3]);
        assert!(doms.dominates(0, 3));
        assert!(!doms.dominates(1, 3));
        assert!(!doms.dominates(2, 3));
        for b in 0..4 {
            assert!(doms.dominates(b, b));
        }
    }

    #[test]
    fn test_loop_body() {
        // 0 -> 1, 1 -> 2, 2 -> 1, 1 -> 3
        let preds = vec![vec![], vec![0, 2], vec![1], vec![1]];
        let doms = Dominators::compute(&preds, &[0, 1, 2, 3]);
        let loops = natural_loops(&preds, &doms, &[(2, 1)]);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, 1);
        assert_eq!(loops[0].body.iter().collect::<Vec<_>>(), vec![1, 2]);
    }
}
