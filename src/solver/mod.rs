//! Route construction: the constrained CVRPTW solver and the greedy
//! heuristic it falls back to.

pub mod cvrptw;
pub mod greedy;
