//! Constrained CVRPTW solver.
//!
//! Cheapest-feasible-insertion construction under capacity, time-window,
//! waiting-allowance, and route-duration constraints, followed by
//! feasibility-preserving local search and a simulated-annealing refinement
//! bounded by a wall-clock budget. Stops that cannot be placed are dropped
//! into the unassigned set instead of failing the whole instance.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::SolverError;
use crate::matrix::TravelMatrix;
use crate::model::{Stop, Vehicle};

const EPSILON: f64 = 1e-6;
const ANNEAL_INITIAL_TEMP: f64 = 50.0;
const ANNEAL_MIN_TEMP: f64 = 0.1;
const ANNEAL_COOLING: f64 = 0.95;
const ANNEAL_MAX_ITERATIONS: usize = 5000;

#[derive(Debug, Clone)]
pub struct SolverConstraints {
    /// Maximum wait before a stop's window opens.
    pub wait_allowance_min: f64,
    pub max_route_duration_min: f64,
    /// Objective penalty per dropped stop.
    pub drop_penalty_min: f64,
    /// Wall-clock budget; the best solution found so far is returned at the
    /// limit.
    pub time_limit: Duration,
    pub seed: u64,
}

/// One solver instance over a shared node list.
///
/// The matrix covers the node list; `starts[v]` is vehicle `v`'s start/end
/// node and `stop_nodes[i]` is stop `i`'s node.
pub struct SolverInstance<'a> {
    pub stops: &'a [Stop],
    pub vehicles: &'a [Vehicle],
    pub matrix: &'a TravelMatrix,
    pub starts: &'a [usize],
    pub stop_nodes: &'a [usize],
    pub constraints: &'a SolverConstraints,
}

#[derive(Debug, Clone)]
pub struct SolverRoute {
    pub vehicle_index: usize,
    /// Stop indices into the instance's stop slice, in visit order.
    pub stops: Vec<usize>,
    pub load: u32,
    pub distance_km: f64,
    pub duration_min: f64,
}

#[derive(Debug, Clone)]
pub struct SolverSolution {
    pub routes: Vec<SolverRoute>,
    /// Stop indices the solver dropped.
    pub unassigned: Vec<usize>,
}

pub fn solve(inst: &SolverInstance<'_>) -> Result<SolverSolution, SolverError> {
    if inst.vehicles.is_empty() {
        return Err(SolverError::NoVehicles);
    }
    let needed = inst
        .starts
        .iter()
        .chain(inst.stop_nodes.iter())
        .copied()
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);
    if needed > inst.matrix.size() {
        return Err(SolverError::MatrixShape {
            expected: needed,
            got: inst.matrix.size(),
        });
    }

    let deadline = Instant::now() + inst.constraints.time_limit;
    let mut state = State::new(inst);

    for stop_index in construction_order(inst.stops) {
        if !state.insert_cheapest(stop_index) {
            state.unassigned.push(stop_index);
        }
    }

    state.local_search(deadline);
    state.reinsert_unassigned();

    let mut rng = StdRng::seed_from_u64(inst.constraints.seed);
    state.anneal(&mut rng, deadline);
    state.reinsert_unassigned();

    Ok(state.into_solution())
}

/// Tight windows first, then heavy demands, then input order. Deterministic.
fn construction_order(stops: &[Stop]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..stops.len()).collect();
    order.sort_by(|&a, &b| {
        let due_a = stops[a].time_window.map(|tw| tw.due()).unwrap_or(f64::INFINITY);
        let due_b = stops[b].time_window.map(|tw| tw.due()).unwrap_or(f64::INFINITY);
        due_a
            .partial_cmp(&due_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(stops[b].demand.cmp(&stops[a].demand))
            .then(a.cmp(&b))
    });
    order
}

#[derive(Clone)]
struct State<'a> {
    inst: &'a SolverInstance<'a>,
    routes: Vec<SolverRoute>,
    unassigned: Vec<usize>,
}

impl<'a> State<'a> {
    fn new(inst: &'a SolverInstance<'a>) -> Self {
        let routes = inst
            .vehicles
            .iter()
            .enumerate()
            .map(|(vehicle_index, _)| SolverRoute {
                vehicle_index,
                stops: Vec::new(),
                load: 0,
                distance_km: 0.0,
                duration_min: 0.0,
            })
            .collect();
        Self {
            inst,
            routes,
            unassigned: Vec::new(),
        }
    }

    fn total_duration(&self) -> f64 {
        self.routes.iter().map(|r| r.duration_min).sum()
    }

    /// Walks a candidate visit sequence for one vehicle, accumulating travel
    /// and service time. Returns `None` when any constraint breaks: window
    /// missed, wait beyond the allowance, shift end exceeded, or route
    /// duration over the cap.
    fn simulate(&self, vehicle_index: usize, seq: &[usize]) -> Option<(f64, f64)> {
        let inst = self.inst;
        let vehicle = &inst.vehicles[vehicle_index];
        let c = inst.constraints;
        let start_node = inst.starts[vehicle_index];
        let shift_start = vehicle.shift.map(|s| s.ready()).unwrap_or(0.0);

        let mut time = shift_start;
        let mut distance = 0.0;
        let mut prev = start_node;
        for &stop_index in seq {
            let node = inst.stop_nodes[stop_index];
            distance += inst.matrix.distance_km(prev, node);
            let arrival = time + inst.matrix.duration_min(prev, node);

            let stop = &inst.stops[stop_index];
            let service_start = match stop.time_window {
                Some(tw) => {
                    if tw.is_violated(arrival) {
                        return None;
                    }
                    let wait = tw.waiting_time(arrival);
                    if wait > c.wait_allowance_min {
                        return None;
                    }
                    arrival + wait
                }
                None => arrival,
            };
            time = service_start + stop.service_min;
            prev = node;
        }

        distance += inst.matrix.distance_km(prev, start_node);
        time += inst.matrix.duration_min(prev, start_node);

        if let Some(shift) = vehicle.shift {
            if shift.is_violated(time) {
                return None;
            }
        }
        let duration = time - shift_start;
        if duration > c.max_route_duration_min {
            return None;
        }
        Some((distance, duration))
    }

    fn fits_capacity(&self, route_index: usize, extra_demand: u32) -> bool {
        let route = &self.routes[route_index];
        let capacity = self.inst.vehicles[route.vehicle_index].capacity;
        route.load + extra_demand <= capacity
    }

    /// Cheapest feasible insertion of one stop across all routes/positions.
    fn insert_cheapest(&mut self, stop_index: usize) -> bool {
        let demand = self.inst.stops[stop_index].demand;
        let mut best: Option<(usize, Vec<usize>, f64, f64, f64)> = None;

        for route_index in 0..self.routes.len() {
            if !self.fits_capacity(route_index, demand) {
                continue;
            }
            let route = &self.routes[route_index];
            for position in 0..=route.stops.len() {
                let mut candidate = route.stops.clone();
                candidate.insert(position, stop_index);
                if let Some((distance, duration)) =
                    self.simulate(route.vehicle_index, &candidate)
                {
                    let delta = duration - route.duration_min;
                    if best
                        .as_ref()
                        .map(|(_, _, _, _, best_delta)| delta + EPSILON < *best_delta)
                        .unwrap_or(true)
                    {
                        best = Some((route_index, candidate, distance, duration, delta));
                    }
                }
            }
        }

        if let Some((route_index, candidate, distance, duration, _)) = best {
            let route = &mut self.routes[route_index];
            route.stops = candidate;
            route.load += demand;
            route.distance_km = distance;
            route.duration_min = duration;
            true
        } else {
            false
        }
    }

    /// Tries to place every dropped stop back; keeps the rest unassigned.
    fn reinsert_unassigned(&mut self) {
        let unassigned = std::mem::take(&mut self.unassigned);
        for stop_index in unassigned {
            if !self.insert_cheapest(stop_index) {
                self.unassigned.push(stop_index);
            }
        }
    }

    fn local_search(&mut self, deadline: Instant) {
        loop {
            if Instant::now() >= deadline {
                break;
            }
            if self.relocate_first_improvement() {
                continue;
            }
            if self.two_opt_first_improvement() {
                continue;
            }
            if self.swap_first_improvement() {
                continue;
            }
            break;
        }
    }

    fn apply_route(&mut self, route_index: usize, stops: Vec<usize>, load_delta: i64) {
        let vehicle_index = self.routes[route_index].vehicle_index;
        let (distance, duration) = self
            .simulate(vehicle_index, &stops)
            .expect("apply_route called with a feasible sequence");
        let route = &mut self.routes[route_index];
        route.stops = stops;
        route.load = (route.load as i64 + load_delta) as u32;
        route.distance_km = distance;
        route.duration_min = duration;
    }

    /// Moves one stop to the best improving position anywhere.
    fn relocate_first_improvement(&mut self) -> bool {
        for from in 0..self.routes.len() {
            for position in 0..self.routes[from].stops.len() {
                let stop_index = self.routes[from].stops[position];
                let demand = self.inst.stops[stop_index].demand;

                let mut reduced = self.routes[from].stops.clone();
                reduced.remove(position);
                let reduced_sim = match self.simulate(self.routes[from].vehicle_index, &reduced) {
                    Some(sim) => sim,
                    None => continue,
                };
                let freed = self.routes[from].duration_min - reduced_sim.1;

                for to in 0..self.routes.len() {
                    if to == from {
                        // Same-route repositioning.
                        for insert_pos in 0..=reduced.len() {
                            if insert_pos == position {
                                continue;
                            }
                            let mut candidate = reduced.clone();
                            candidate.insert(insert_pos, stop_index);
                            if let Some((_, duration)) =
                                self.simulate(self.routes[from].vehicle_index, &candidate)
                            {
                                if duration + EPSILON < self.routes[from].duration_min {
                                    self.apply_route(from, candidate, 0);
                                    return true;
                                }
                            }
                        }
                        continue;
                    }
                    if !self.fits_capacity(to, demand) {
                        continue;
                    }
                    for insert_pos in 0..=self.routes[to].stops.len() {
                        let mut candidate = self.routes[to].stops.clone();
                        candidate.insert(insert_pos, stop_index);
                        if let Some((_, duration)) =
                            self.simulate(self.routes[to].vehicle_index, &candidate)
                        {
                            let added = duration - self.routes[to].duration_min;
                            if added + EPSILON < freed {
                                self.apply_route(from, reduced.clone(), -(demand as i64));
                                self.apply_route(to, candidate, demand as i64);
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Intra-route segment reversal; re-simulated because reversing can
    /// break time windows even when it shortens distance.
    fn two_opt_first_improvement(&mut self) -> bool {
        for route_index in 0..self.routes.len() {
            let len = self.routes[route_index].stops.len();
            if len < 2 {
                continue;
            }
            for i in 0..len - 1 {
                for j in i + 1..len {
                    let mut candidate = self.routes[route_index].stops.clone();
                    candidate[i..=j].reverse();
                    if let Some((_, duration)) =
                        self.simulate(self.routes[route_index].vehicle_index, &candidate)
                    {
                        if duration + EPSILON < self.routes[route_index].duration_min {
                            self.apply_route(route_index, candidate, 0);
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn swap_first_improvement(&mut self) -> bool {
        for a in 0..self.routes.len() {
            for b in a + 1..self.routes.len() {
                for pos_a in 0..self.routes[a].stops.len() {
                    for pos_b in 0..self.routes[b].stops.len() {
                        if let Some((seq_a, seq_b, demand_a, demand_b)) =
                            self.feasible_swap(a, b, pos_a, pos_b)
                        {
                            let (_, dur_a) = self
                                .simulate(self.routes[a].vehicle_index, &seq_a)
                                .expect("checked feasible");
                            let (_, dur_b) = self
                                .simulate(self.routes[b].vehicle_index, &seq_b)
                                .expect("checked feasible");
                            let old = self.routes[a].duration_min + self.routes[b].duration_min;
                            if dur_a + dur_b + EPSILON < old {
                                self.apply_route(a, seq_a, demand_b as i64 - demand_a as i64);
                                self.apply_route(b, seq_b, demand_a as i64 - demand_b as i64);
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Builds the swapped sequences when capacity and timing both hold.
    fn feasible_swap(
        &self,
        a: usize,
        b: usize,
        pos_a: usize,
        pos_b: usize,
    ) -> Option<(Vec<usize>, Vec<usize>, u32, u32)> {
        let stop_a = self.routes[a].stops[pos_a];
        let stop_b = self.routes[b].stops[pos_b];
        let demand_a = self.inst.stops[stop_a].demand;
        let demand_b = self.inst.stops[stop_b].demand;

        let cap_a = self.inst.vehicles[self.routes[a].vehicle_index].capacity;
        let cap_b = self.inst.vehicles[self.routes[b].vehicle_index].capacity;
        if self.routes[a].load - demand_a + demand_b > cap_a
            || self.routes[b].load - demand_b + demand_a > cap_b
        {
            return None;
        }

        let mut seq_a = self.routes[a].stops.clone();
        let mut seq_b = self.routes[b].stops.clone();
        seq_a[pos_a] = stop_b;
        seq_b[pos_b] = stop_a;

        self.simulate(self.routes[a].vehicle_index, &seq_a)?;
        self.simulate(self.routes[b].vehicle_index, &seq_b)?;
        Some((seq_a, seq_b, demand_a, demand_b))
    }

    /// Simulated-annealing refinement while wall-clock budget remains; the
    /// best state seen is kept.
    fn anneal(&mut self, rng: &mut StdRng, deadline: Instant) {
        if Instant::now() >= deadline {
            return;
        }
        let mut best = self.clone();
        let mut current = self.clone();
        let mut temperature = ANNEAL_INITIAL_TEMP;

        for _ in 0..ANNEAL_MAX_ITERATIONS {
            if Instant::now() >= deadline {
                break;
            }
            let mut candidate = current.clone();
            let moved = match rng.gen_range(0..3) {
                0 => candidate.random_relocate(rng),
                1 => candidate.random_two_opt(rng),
                _ => candidate.random_swap(rng),
            };
            if !moved {
                temperature = (temperature * ANNEAL_COOLING).max(ANNEAL_MIN_TEMP);
                continue;
            }

            let delta = candidate.total_duration() - current.total_duration();
            let accept = if delta < -EPSILON {
                true
            } else if temperature > ANNEAL_MIN_TEMP {
                rng.gen::<f64>() < (-delta / temperature).exp()
            } else {
                false
            };
            if accept {
                current = candidate;
                if current.total_duration() + EPSILON < best.total_duration() {
                    best = current.clone();
                }
            }
            temperature = (temperature * ANNEAL_COOLING).max(ANNEAL_MIN_TEMP);
        }

        *self = best;
    }

    fn random_relocate(&mut self, rng: &mut StdRng) -> bool {
        let sources: Vec<usize> = (0..self.routes.len())
            .filter(|&r| !self.routes[r].stops.is_empty())
            .collect();
        let from = match sources.choose(rng) {
            Some(&r) => r,
            None => return false,
        };
        let position = rng.gen_range(0..self.routes[from].stops.len());
        let stop_index = self.routes[from].stops[position];
        let demand = self.inst.stops[stop_index].demand;

        let mut reduced = self.routes[from].stops.clone();
        reduced.remove(position);
        if self.simulate(self.routes[from].vehicle_index, &reduced).is_none() {
            return false;
        }

        let mut targets: Vec<usize> = (0..self.routes.len()).collect();
        targets.shuffle(rng);
        for to in targets {
            let base = if to == from { reduced.clone() } else { self.routes[to].stops.clone() };
            if to != from && !self.fits_capacity(to, demand) {
                continue;
            }
            let mut positions: Vec<usize> = (0..=base.len()).collect();
            positions.shuffle(rng);
            for insert_pos in positions {
                if to == from && insert_pos == position {
                    continue;
                }
                let mut candidate = base.clone();
                candidate.insert(insert_pos, stop_index);
                if self.simulate(self.routes[to].vehicle_index, &candidate).is_some() {
                    if to == from {
                        self.apply_route(from, candidate, 0);
                    } else {
                        self.apply_route(from, reduced, -(demand as i64));
                        self.apply_route(to, candidate, demand as i64);
                    }
                    return true;
                }
            }
        }
        false
    }

    fn random_two_opt(&mut self, rng: &mut StdRng) -> bool {
        let eligible: Vec<usize> = (0..self.routes.len())
            .filter(|&r| self.routes[r].stops.len() >= 2)
            .collect();
        let route_index = match eligible.choose(rng) {
            Some(&r) => r,
            None => return false,
        };
        let len = self.routes[route_index].stops.len();
        let i = rng.gen_range(0..len - 1);
        let j = rng.gen_range(i + 1..len);
        let mut candidate = self.routes[route_index].stops.clone();
        candidate[i..=j].reverse();
        if candidate == self.routes[route_index].stops {
            return false;
        }
        if self
            .simulate(self.routes[route_index].vehicle_index, &candidate)
            .is_some()
        {
            self.apply_route(route_index, candidate, 0);
            return true;
        }
        false
    }

    fn random_swap(&mut self, rng: &mut StdRng) -> bool {
        let eligible: Vec<usize> = (0..self.routes.len())
            .filter(|&r| !self.routes[r].stops.is_empty())
            .collect();
        if eligible.len() < 2 {
            return false;
        }
        let mut picks = eligible;
        picks.shuffle(rng);
        let (a, b) = (picks[0].min(picks[1]), picks[0].max(picks[1]));
        let pos_a = rng.gen_range(0..self.routes[a].stops.len());
        let pos_b = rng.gen_range(0..self.routes[b].stops.len());
        if let Some((seq_a, seq_b, demand_a, demand_b)) = self.feasible_swap(a, b, pos_a, pos_b) {
            self.apply_route(a, seq_a, demand_b as i64 - demand_a as i64);
            self.apply_route(b, seq_b, demand_a as i64 - demand_b as i64);
            return true;
        }
        false
    }

    fn into_solution(mut self) -> SolverSolution {
        self.unassigned.sort_unstable();
        SolverSolution {
            routes: self.routes,
            unassigned: self.unassigned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point;
    use crate::model::TimeWindow;

    fn constraints(time_limit_ms: u64) -> SolverConstraints {
        SolverConstraints {
            wait_allowance_min: 5.0,
            max_route_duration_min: 600.0,
            drop_penalty_min: 1000.0,
            time_limit: Duration::from_millis(time_limit_ms),
            seed: 7,
        }
    }

    /// Depot at node 0, stops at nodes 1..; durations at 30 km/h.
    fn grid_instance(
        stops: Vec<Stop>,
        vehicles: Vec<Vehicle>,
        depot: Point,
    ) -> (Vec<Stop>, Vec<Vehicle>, TravelMatrix, Vec<usize>, Vec<usize>) {
        let mut points = vec![depot];
        points.extend(stops.iter().map(|s| s.location));
        let matrix = TravelMatrix::geometric(&points, 30.0);
        let starts = vec![0; vehicles.len()];
        let stop_nodes: Vec<usize> = (1..=stops.len()).collect();
        (stops, vehicles, matrix, starts, stop_nodes)
    }

    fn run(
        stops: Vec<Stop>,
        vehicles: Vec<Vehicle>,
        depot: Point,
        c: &SolverConstraints,
    ) -> SolverSolution {
        let (stops, vehicles, matrix, starts, stop_nodes) = grid_instance(stops, vehicles, depot);
        let inst = SolverInstance {
            stops: &stops,
            vehicles: &vehicles,
            matrix: &matrix,
            starts: &starts,
            stop_nodes: &stop_nodes,
            constraints: c,
        };
        solve(&inst).expect("solvable instance")
    }

    fn stop_at(id: &str, lat: f64, lon: f64, demand: u32) -> Stop {
        Stop::new(id, Point::new(lat, lon), demand)
    }

    #[test]
    fn no_vehicles_is_an_error() {
        let stops = vec![stop_at("a", 0.01, 0.0, 1)];
        let (stops, _, matrix, _, stop_nodes) =
            grid_instance(stops, vec![], Point::new(0.0, 0.0));
        let c = constraints(100);
        let inst = SolverInstance {
            stops: &stops,
            vehicles: &[],
            matrix: &matrix,
            starts: &[],
            stop_nodes: &stop_nodes,
            constraints: &c,
        };
        assert!(matches!(solve(&inst), Err(SolverError::NoVehicles)));
    }

    #[test]
    fn undersized_matrix_is_an_error() {
        let stops = vec![stop_at("a", 0.01, 0.0, 1)];
        let vehicles = vec![Vehicle::new("v", 10, Point::new(0.0, 0.0))];
        let small = TravelMatrix::new(1);
        let c = constraints(100);
        let inst = SolverInstance {
            stops: &stops,
            vehicles: &vehicles,
            matrix: &small,
            starts: &[0],
            stop_nodes: &[1],
            constraints: &c,
        };
        assert!(matches!(
            solve(&inst),
            Err(SolverError::MatrixShape { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn capacity_is_never_violated() {
        let stops = vec![
            stop_at("a", 0.01, 0.0, 4),
            stop_at("b", 0.02, 0.0, 4),
            stop_at("c", 0.03, 0.0, 4),
            stop_at("d", 0.04, 0.0, 4),
        ];
        let vehicles = vec![
            Vehicle::new("v1", 8, Point::new(0.0, 0.0)),
            Vehicle::new("v2", 8, Point::new(0.0, 0.0)),
        ];
        let solution = run(stops.clone(), vehicles.clone(), Point::new(0.0, 0.0), &constraints(200));
        for route in &solution.routes {
            let load: u32 = route.stops.iter().map(|&i| stops[i].demand).sum();
            assert!(load <= vehicles[route.vehicle_index].capacity);
            assert_eq!(load, route.load);
        }
        // Complete partition: every stop is routed or unassigned, once.
        let mut seen: Vec<usize> = solution
            .routes
            .iter()
            .flat_map(|r| r.stops.iter().copied())
            .chain(solution.unassigned.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn overcapacity_demand_is_dropped_not_violated() {
        // Capacity 5, three stops of demand 3: only one fits.
        let stops = vec![
            stop_at("a", 0.01, 0.0, 3),
            stop_at("b", 0.02, 0.0, 3),
            stop_at("c", 0.03, 0.0, 3),
        ];
        let vehicles = vec![Vehicle::new("v1", 5, Point::new(0.0, 0.0))];
        let solution = run(stops.clone(), vehicles.clone(), Point::new(0.0, 0.0), &constraints(200));
        assert!(!solution.unassigned.is_empty());
        for route in &solution.routes {
            let load: u32 = route.stops.iter().map(|&i| stops[i].demand).sum();
            assert!(load <= 5);
        }
        let routed: usize = solution.routes.iter().map(|r| r.stops.len()).sum();
        assert_eq!(routed + solution.unassigned.len(), 3);
    }

    #[test]
    fn unreachable_time_window_is_dropped() {
        // Window closes long before any vehicle can arrive (~0.03 deg is a
        // few kilometers; at 30 km/h the drive takes minutes, window is 1).
        let reachable = stop_at("ok", 0.01, 0.0, 1);
        let impossible = stop_at("late", 0.5, 0.0, 1)
            .with_time_window(TimeWindow::new(0.0, 1.0).expect("valid"));
        let stops = vec![reachable, impossible];
        let vehicles = vec![Vehicle::new("v1", 10, Point::new(0.0, 0.0))];
        let solution = run(stops.clone(), vehicles, Point::new(0.0, 0.0), &constraints(200));
        assert_eq!(solution.unassigned, vec![1]);
        assert_eq!(solution.routes[0].stops, vec![0]);
    }

    #[test]
    fn waiting_beyond_allowance_is_infeasible() {
        // Window opens hours after arrival; wait allowance is 5 minutes.
        let distant_window = stop_at("wait", 0.01, 0.0, 1)
            .with_time_window(TimeWindow::new(500.0, 600.0).expect("valid"));
        let vehicles = vec![Vehicle::new("v1", 10, Point::new(0.0, 0.0))];
        let solution = run(vec![distant_window], vehicles, Point::new(0.0, 0.0), &constraints(200));
        assert_eq!(solution.unassigned, vec![0]);
    }

    #[test]
    fn feasible_window_is_served_within_bounds() {
        // ~1.1 km away, ~2.2 min at 30 km/h. Window [0, 30] is easy.
        let stop = stop_at("tw", 0.01, 0.0, 1)
            .with_time_window(TimeWindow::new(0.0, 30.0).expect("valid"));
        let vehicles = vec![Vehicle::new("v1", 10, Point::new(0.0, 0.0))];
        let solution = run(vec![stop], vehicles, Point::new(0.0, 0.0), &constraints(200));
        assert!(solution.unassigned.is_empty());
        assert_eq!(solution.routes[0].stops, vec![0]);
        assert!(solution.routes[0].duration_min > 0.0);
    }

    #[test]
    fn zero_time_budget_still_returns_a_solution() {
        let stops: Vec<Stop> = (0..20)
            .map(|i| stop_at(&format!("s{i}"), 0.01 + 0.005 * i as f64, 0.0, 1))
            .collect();
        let vehicles = vec![
            Vehicle::new("v1", 50, Point::new(0.0, 0.0)),
            Vehicle::new("v2", 50, Point::new(0.0, 0.0)),
        ];
        let solution = run(stops, vehicles, Point::new(0.0, 0.0), &constraints(0));
        let placed: usize = solution.routes.iter().map(|r| r.stops.len()).sum();
        assert_eq!(placed + solution.unassigned.len(), 20);
    }

    #[test]
    fn deterministic_given_same_seed() {
        let stops: Vec<Stop> = (0..8)
            .map(|i| stop_at(&format!("s{i}"), 0.01 * (i + 1) as f64, 0.005 * i as f64, 2))
            .collect();
        let vehicles = vec![
            Vehicle::new("v1", 10, Point::new(0.0, 0.0)),
            Vehicle::new("v2", 10, Point::new(0.0, 0.0)),
        ];
        // Generous budget but identical seeds must agree.
        let a = run(stops.clone(), vehicles.clone(), Point::new(0.0, 0.0), &constraints(50));
        let b = run(stops, vehicles, Point::new(0.0, 0.0), &constraints(50));
        // Construction and local search are deterministic; annealing is
        // seed-fixed but time-boxed, so compare the completeness invariant
        // rather than exact layouts.
        let count = |s: &SolverSolution| {
            s.routes.iter().map(|r| r.stops.len()).sum::<usize>() + s.unassigned.len()
        };
        assert_eq!(count(&a), count(&b));
    }
}
