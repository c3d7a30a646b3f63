//! Arena representation of the recruitment forest.

use std::collections::VecDeque;

/// How a participant is attached to the rest of the sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    /// Entered the study without a recruiter.
    Root,
    /// Recruited by the participant at this index.
    Recruiter(usize),
    /// Redeemed a coupon that no participant issued.
    Detached,
}

/// A participant's place in the forest. Indices refer to rows of the annotated table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    wave: u32,
    seed: usize,
}

impl Node {
    /// Index of the recruiter, `None` for seeds.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Indices of the participants recruited by this node, in row order.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Number of coupon hops from the seed.
    pub fn wave(&self) -> u32 {
        self.wave
    }

    /// Index of the seed at the top of this node's chain.
    pub fn seed(&self) -> usize {
        self.seed
    }
}

/// Rows that no traversal from a seed reached, in ascending order.
#[derive(Debug)]
pub(crate) struct Unreachable(pub(crate) Vec<usize>);

/// Recruitment forest stored as an arena of nodes with parent/child indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecruitmentForest {
    nodes: Vec<Node>,
    seeds: Vec<usize>,
}

impl RecruitmentForest {
    /// Assigns waves and seeds by breadth-first traversal from every root.
    pub(crate) fn from_links(links: &[Link]) -> Result<Self, Unreachable> {
        let n = links.len();
        let mut children = vec![Vec::new(); n];
        let mut seeds = Vec::new();
        for (index, link) in links.iter().enumerate() {
            match *link {
                Link::Root => seeds.push(index),
                Link::Recruiter(parent) => children[parent].push(index),
                Link::Detached => {}
            }
        }

        let mut placement: Vec<Option<(u32, usize)>> = vec![None; n];
        let mut queue = VecDeque::with_capacity(n);
        for &seed in &seeds {
            placement[seed] = Some((0, seed));
            queue.push_back(seed);
        }
        while let Some(node) = queue.pop_front() {
            let (wave, seed) = placement[node].unwrap_or_default();
            for &child in &children[node] {
                if placement[child].is_none() {
                    placement[child] = Some((wave + 1, seed));
                    queue.push_back(child);
                }
            }
        }

        let unreachable: Vec<usize> = (0..n).filter(|&i| placement[i].is_none()).collect();
        if !unreachable.is_empty() {
            return Err(Unreachable(unreachable));
        }

        let nodes = links
            .iter()
            .zip(children)
            .zip(placement)
            .map(|((link, children), placement)| {
                let (wave, seed) = placement.unwrap_or_default();
                Node {
                    parent: match *link {
                        Link::Recruiter(parent) => Some(parent),
                        _ => None,
                    },
                    children,
                    wave,
                    seed,
                }
            })
            .collect();

        Ok(Self { nodes, seeds })
    }

    /// Number of participants in the forest.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the forest has no participants.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `index`.
    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Iterates over all nodes in row order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Indices of the seeds, in row order.
    pub fn seeds(&self) -> &[usize] {
        &self.seeds
    }

    /// Recruits of the node at `index`.
    pub fn children(&self, index: usize) -> &[usize] {
        &self.nodes[index].children
    }

    /// Deepest wave present, `None` for an empty forest.
    pub fn max_wave(&self) -> Option<u32> {
        self.nodes.iter().map(Node::wave).max()
    }
}
