//! Network simplex over the minimal graph of a DBM.
//!
//! Minimising a linear cost over a zone is the dual of a minimum cost flow
//! problem: every clock is a node with supply `-rate` and every constraint
//! `i - j ≤ c` of the minimal graph is an arc of cost `c`. At optimality the
//! node potentials are the valuation attaining the infimum.
//!
//! The spanning tree is kept in an arena. Nodes refer to their predecessor and
//! their preorder successor (the thread) by index.

use std::fmt;

use tracing::{debug, trace};

use super::{
    constraint::{Clock, Limit, INFINITY_LIMIT, REFERENCE},
    dbm::{Canonical, DBM},
    mingraph,
};

/// Costs are accumulated in a wider integer than the limits of the zone.
pub type Cost = i64;

/// The potential of a node which is only connected through an artificial arc.
const ARTIFICIAL: Cost = INFINITY_LIMIT as Cost;

const NONE: usize = usize::MAX;

/// The infimum of a cost function over a non-empty zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Infimum {
    Finite(Cost),
    /// The cost decreases without bound when delaying.
    Unbounded,
}

impl Infimum {
    pub fn finite(self) -> Option<Cost> {
        match self {
            Infimum::Finite(cost) => Some(cost),
            Infimum::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Infimum::Unbounded)
    }
}

impl fmt::Display for Infimum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Infimum::Finite(cost) => write!(f, "{}", cost),
            Infimum::Unbounded => write!(f, "-∞"),
        }
    }
}

/// The point of a zone attaining the infimum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Optimum {
    Bounded(Vec<Limit>),
    Unbounded,
}

#[derive(Clone, Debug)]
struct Node {
    pred: usize,
    depth: usize,
    thread: usize,
    /// True if the tree arc between the node and its predecessor points to the node.
    inbound: bool,
    flow: Cost,
    potential: Cost,
}

struct NetworkSimplex<'a> {
    dbm: &'a DBM<Canonical>,
    rates: &'a [Limit],
    arcs: Vec<(Clock, Clock)>,
    nodes: Vec<Node>,
}

impl<'a> NetworkSimplex<'a> {
    fn new(dbm: &'a DBM<Canonical>, rates: &'a [Limit]) -> Self {
        let (bits, _) = mingraph::analyze(dbm);
        let arcs = bits.ones().collect();
        let mut simplex = Self {
            dbm,
            rates,
            arcs,
            nodes: Vec::with_capacity(dbm.dimension() as usize),
        };
        simplex.initial_tree();
        simplex
    }

    fn cost(&self, i: usize, j: usize) -> Cost {
        self.dbm[(i as Clock, j as Clock)].limit() as Cost
    }

    fn supply(&self, node: usize) -> Cost {
        -(self.rates[node] as Cost)
    }

    /// Every clock hangs below the reference clock. Demanding clocks are reached
    /// through their lower bound, the others through their upper bound which
    /// is artificial when the clock is unbounded.
    fn initial_tree(&mut self) {
        let dimension = self.dbm.dimension() as usize;
        self.nodes.push(Node {
            pred: NONE,
            depth: 0,
            thread: 1 % dimension,
            inbound: false,
            flow: -1,
            potential: 0,
        });

        for node in 1..dimension {
            let inbound = self.supply(node) < 0;
            let potential = if inbound {
                -self.cost(0, node)
            } else {
                self.cost(node, 0)
            };
            self.nodes.push(Node {
                pred: 0,
                depth: 1,
                thread: (node + 1) % dimension,
                inbound,
                flow: (self.rates[node] as Cost).abs(),
                potential,
            });
        }
    }

    fn reduced_cost(&self, i: usize, j: usize) -> Cost {
        self.cost(i, j) - self.nodes[i].potential + self.nodes[j].potential
    }

    /// Dantzig's rule: the arc with the most negative reduced cost.
    fn entering_arc(&self) -> Option<(usize, usize)> {
        let mut lowest = 0;
        let mut best = None;
        for &(i, j) in self.arcs.iter() {
            let reduced = self.reduced_cost(i as usize, j as usize);
            if reduced < lowest {
                lowest = reduced;
                best = Some((i as usize, j as usize));
            }
        }
        best
    }

    fn nth_predecessor(&self, mut node: usize, mut n: isize) -> usize {
        while n > 0 {
            node = self.nodes[node].pred;
            n -= 1;
        }
        node
    }

    fn is_predecessor_of(&self, n: usize, m: usize) -> bool {
        let difference = self.nodes[m].depth as isize - self.nodes[n].depth as isize;
        n == self.nth_predecessor(m, difference)
    }

    /// The deepest common ancestor of both nodes.
    fn cycle_root(&self, k: usize, l: usize) -> usize {
        let difference = self.nodes[k].depth as isize - self.nodes[l].depth as isize;
        let mut k = self.nth_predecessor(k, difference);
        let mut l = self.nth_predecessor(l, -difference);
        while k != l {
            k = self.nodes[k].pred;
            l = self.nodes[l].pred;
        }
        k
    }

    /// The node mentioning the blocking arc directed against (k, l) with the
    /// least flow. Ties pick the last arc along (k, l) from the root which
    /// keeps the tree strongly feasible.
    fn leaving_node(&self, mut k: usize, mut l: usize, root: usize) -> Option<usize> {
        let mut smallest = Cost::MAX;
        let mut leave = None;
        while k != root {
            let node = &self.nodes[k];
            if !node.inbound && node.flow < smallest {
                smallest = node.flow;
                leave = Some(k);
            }
            k = node.pred;
        }
        while l != root {
            let node = &self.nodes[l];
            if node.inbound && node.flow <= smallest {
                smallest = node.flow;
                leave = Some(l);
            }
            l = node.pred;
        }
        leave
    }

    fn augment_cycle(&mut self, mut k: usize, mut l: usize, root: usize, flow: Cost) {
        if flow <= 0 {
            return;
        }
        while k != root {
            let node = &mut self.nodes[k];
            node.flow += if node.inbound { flow } else { -flow };
            k = node.pred;
        }
        while l != root {
            let node = &mut self.nodes[l];
            node.flow += if node.inbound { -flow } else { flow };
            l = node.pred;
        }
    }

    /// Shifts the potentials of the subtree rooted at the node.
    fn shift_potentials(&mut self, subtree: usize, change: Cost) {
        let depth = self.nodes[subtree].depth;
        let mut node = subtree;
        loop {
            self.nodes[node].potential += change;
            node = self.nodes[node].thread;
            if self.nodes[node].depth <= depth {
                break;
            }
        }
    }

    /// The node threading to the excluded node, starting the search at the given node.
    fn last_before_node(&self, mut node: usize, exclude: usize) -> usize {
        loop {
            let last = node;
            node = self.nodes[node].thread;
            if node == exclude {
                return last;
            }
        }
    }

    /// The first node whose preorder successor is not deeper than the depth.
    fn last_before_depth(&self, mut node: usize, depth: usize) -> usize {
        loop {
            let last = node;
            node = self.nodes[node].thread;
            if self.nodes[node].depth <= depth {
                return last;
            }
        }
    }

    /// Re-hangs the subtree cut off by the leaving arc below the root side of
    /// the entering arc and reverses the path from the non-root node to the
    /// leaving node.
    fn rehang_subtree(
        &mut self,
        root_side: usize,
        non_root: usize,
        leave: usize,
        source_in_root_side: bool,
        flow: Cost,
    ) {
        let point_to_leave = self.last_before_node(self.nodes[leave].pred, leave);
        let mut last_out = self.last_before_depth(non_root, self.nodes[non_root].depth);
        let mut preorder_out = self.nodes[last_out].thread;

        let mut node = non_root;
        while node != leave {
            let previous = node;
            node = self.nodes[node].pred;
            self.nodes[last_out].thread = node;
            last_out = self.last_before_node(node, previous);

            if node == self.nodes[preorder_out].pred {
                self.nodes[last_out].thread = preorder_out;
                last_out = self.last_before_depth(preorder_out, self.nodes[node].depth);
                preorder_out = self.nodes[last_out].thread;
            }
        }

        if point_to_leave == root_side {
            self.nodes[root_side].thread = non_root;
            self.nodes[last_out].thread = preorder_out;
        } else {
            self.nodes[last_out].thread = self.nodes[root_side].thread;
            self.nodes[root_side].thread = non_root;
            self.nodes[point_to_leave].thread = preorder_out;
        }

        // Every node on the path takes over the arc of its old successor.
        let mut carried = (root_side, flow, !source_in_root_side);
        let mut next = non_root;
        loop {
            let node = next;
            let entry = &mut self.nodes[node];
            next = entry.pred;
            let (pred, flow, inbound) = carried;
            carried = (node, entry.flow, entry.inbound);
            entry.pred = pred;
            entry.flow = flow;
            entry.inbound = !inbound;
            if node == leave {
                break;
            }
        }

        let stop = self.nodes[last_out].thread;
        let mut node = non_root;
        loop {
            let depth = self.nodes[self.nodes[node].pred].depth + 1;
            self.nodes[node].depth = depth;
            node = self.nodes[node].thread;
            if node == stop {
                break;
            }
        }
    }

    fn pivot(&mut self, k: usize, l: usize, leave: usize, root: usize) {
        let reduced = self.reduced_cost(k, l);
        let flow = self.nodes[leave].flow;
        self.augment_cycle(k, l, root, flow);

        if !self.is_predecessor_of(leave, k) {
            self.shift_potentials(leave, -reduced);
            self.rehang_subtree(k, l, leave, true, flow);
        } else {
            self.shift_potentials(leave, reduced);
            self.rehang_subtree(l, k, leave, false, flow);
        }
    }

    /// Moves the clocks still hanging on an artificial arc without flow onto
    /// their lower bound, as far as their subtree allows.
    fn remove_artificial_arcs(&mut self) {
        for node in 1..self.nodes.len() {
            let entry = &self.nodes[node];
            if entry.potential != ARTIFICIAL || entry.pred != 0 || entry.flow != 0 {
                continue;
            }
            self.nodes[node].inbound = true;

            let depth = self.nodes[node].depth;
            let mut lowest = ARTIFICIAL + self.cost(0, node);
            let mut current = self.nodes[node].thread;
            while self.nodes[current].depth > depth {
                lowest = lowest.min(self.nodes[current].potential);
                current = self.nodes[current].thread;
            }
            trace!(clock = node, shift = lowest, "removed artificial arc");
            self.shift_potentials(node, -lowest);
        }
    }

    fn solve(mut self) -> Optimum {
        let mut pivots = 0usize;
        while let Some((k, l)) = self.entering_arc() {
            let root = self.cycle_root(k, l);
            let Some(leave) = self.leaving_node(k, l, root) else {
                debug!(pivots, "no blocking arc in cycle");
                break;
            };
            self.pivot(k, l, leave, root);
            pivots += 1;
        }
        self.remove_artificial_arcs();
        debug!(dimension = self.nodes.len(), arcs = self.arcs.len(), pivots, "network simplex solved");

        let unbounded = self
            .nodes
            .iter()
            .skip(1)
            .any(|node| node.potential == ARTIFICIAL && node.pred == 0 && node.flow > 0);
        if unbounded {
            return Optimum::Unbounded;
        }

        let mut valuation = Vec::with_capacity(self.nodes.len());
        valuation.push(0);
        valuation.extend(self.nodes.iter().skip(1).map(|node| node.potential as Limit));
        Optimum::Bounded(valuation)
    }
}

fn check_rates(dbm: &DBM<Canonical>, rates: &[Limit]) {
    if rates.len() != dbm.dimension() as usize {
        panic!("inconsistent dimension between rates and DBM")
    }
}

/// The lowest valuation of the zone.
pub fn offset(dbm: &DBM<Canonical>) -> Vec<Limit> {
    (REFERENCE..dbm.dimension())
        .map(|clock| -dbm.lower(clock).limit())
        .collect()
}

/// A point of the closure of the zone minimising the cost with the rates.
pub fn optimum(dbm: &DBM<Canonical>, rates: &[Limit]) -> Optimum {
    check_rates(dbm, rates);
    if rates.iter().all(|rate| *rate >= 0) {
        return Optimum::Bounded(offset(dbm));
    }
    NetworkSimplex::new(dbm, rates).solve()
}

/// The infimum of the cost function which has the given cost at the offset
/// of the zone and changes with the rates along each clock.
pub fn infimum(dbm: &DBM<Canonical>, cost_at_offset: Cost, rates: &[Limit]) -> Infimum {
    match optimum(dbm, rates) {
        Optimum::Unbounded => Infimum::Unbounded,
        Optimum::Bounded(valuation) => {
            let cost = (REFERENCE + 1..dbm.dimension())
                .map(|clock| {
                    let index = clock as usize;
                    let lower = -dbm.lower(clock).limit() as Cost;
                    rates[index] as Cost * (valuation[index] as Cost - lower)
                })
                .sum::<Cost>();
            Infimum::Finite(cost_at_offset + cost)
        }
    }
}
