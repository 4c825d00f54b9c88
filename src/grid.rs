use epidemic_common::{SimParams, Vec2};
use rayon::prelude::*;

/// Uniform grid over the world rectangle, bucketing agents by cell for radius queries.
///
/// The index is rebuilt from the authoritative agent positions every epoch and never
/// outlives that epoch's positions. Agent indices inside a cell stay in ascending order,
/// so queries visit neighbors in a deterministic order.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    inv_cell_size: f32,
    dim_x: u32,
    dim_y: u32,
    // Positions captured at the last rebuild, indexed by agent index
    positions: Vec<Vec2>,
    // Grid cell index for each agent
    agent_cells: Vec<u32>,
    // Number of agents in each grid cell
    cell_counts: Vec<u32>,
    // Start index in cell_agent_indices for each grid cell (prefix sum)
    cell_starts: Vec<u32>,
    // Agent indices sorted by grid cell
    cell_agent_indices: Vec<u32>,
}

impl SpatialIndex {
    pub fn new(params: &SimParams) -> Self {
        let num_cells = (params.grid_dim_x * params.grid_dim_y) as usize;
        SpatialIndex {
            inv_cell_size: params.inv_grid_cell_size,
            dim_x: params.grid_dim_x.max(1),
            dim_y: params.grid_dim_y.max(1),
            positions: Vec::new(),
            agent_cells: Vec::new(),
            cell_counts: vec![0; num_cells.max(1)],
            cell_starts: vec![0; num_cells.max(1)],
            cell_agent_indices: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Grid coordinates of the cell holding `pos`, clamped to the grid.
    #[inline(always)]
    fn cell_coords(&self, pos: Vec2) -> (u32, u32) {
        let gx = ((pos.x * self.inv_cell_size).floor() as i64).clamp(0, self.dim_x as i64 - 1);
        let gy = ((pos.y * self.inv_cell_size).floor() as i64).clamp(0, self.dim_y as i64 - 1);
        (gx as u32, gy as u32)
    }

    #[inline(always)]
    fn cell_idx(&self, pos: Vec2) -> u32 {
        let (gx, gy) = self.cell_coords(pos);
        gy * self.dim_x + gx
    }

    /// Rebuilds the buckets from `positions`; agent `i` is the one at `positions[i]`.
    pub fn rebuild(&mut self, positions: &[Vec2]) {
        let num_agents = positions.len();
        self.positions.clear();
        self.positions.extend_from_slice(positions);

        // Phase 1: Assign grid indices to each agent (Parallel).
        let index = &*self;
        let cells: Vec<u32> = positions.par_iter().map(|&pos| index.cell_idx(pos)).collect();
        self.agent_cells = cells;

        // Phase 2: Count agents in each grid cell (Serial).
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        for &cell in &self.agent_cells {
            self.cell_counts[cell as usize] += 1;
        }

        // Phase 3: Calculate cell start indices using a prefix sum on cell counts (Serial).
        let mut total_sum = 0;
        for (start, &count) in self.cell_starts.iter_mut().zip(&self.cell_counts) {
            *start = total_sum;
            total_sum += count;
        }
        debug_assert_eq!(total_sum as usize, num_agents);

        // Phase 4: Scatter agent indices into their cell blocks.
        // Serial and in agent order, which keeps every block sorted.
        self.cell_agent_indices.resize(num_agents, 0);
        let mut cursors = self.cell_starts.clone();
        for (agent_idx, &cell) in self.agent_cells.iter().enumerate() {
            let slot = &mut cursors[cell as usize];
            self.cell_agent_indices[*slot as usize] = agent_idx as u32;
            *slot += 1;
        }
    }

    /// Calls `f` for every indexed agent within `radius` (inclusive) of `center`.
    /// Stops early when `f` returns `false`.
    pub fn for_each_within<F>(&self, center: Vec2, radius: f32, mut f: F)
    where
        F: FnMut(u32) -> bool,
    {
        if self.positions.is_empty() || !(radius >= 0.0) {
            return;
        }
        let radius_sq = radius * radius;
        let (min_x, min_y) = self.cell_coords(Vec2::new(center.x - radius, center.y - radius));
        let (max_x, max_y) = self.cell_coords(Vec2::new(center.x + radius, center.y + radius));

        for gy in min_y..=max_y {
            for gx in min_x..=max_x {
                let cell = (gy * self.dim_x + gx) as usize;
                let start = self.cell_starts[cell] as usize;
                let end = start + self.cell_counts[cell] as usize;

                for &agent_idx in &self.cell_agent_indices[start..end] {
                    let pos = self.positions[agent_idx as usize];
                    if pos.distance_squared(center) <= radius_sq && !f(agent_idx) {
                        return;
                    }
                }
            }
        }
    }

    /// Every indexed agent within `radius` of `center`.
    pub fn query(&self, center: Vec2, radius: f32) -> Vec<u32> {
        let mut found = Vec::new();
        self.for_each_within(center, radius, |idx| {
            found.push(idx);
            true
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epidemic_common::SimulationConfig;
    use rand::prelude::*;

    fn index_for(radius: f32) -> SpatialIndex {
        let config = SimulationConfig::new(10, 0, 10.0, radius, 10.0, 5);
        SpatialIndex::new(&config.get_sim_params())
    }

    fn brute_force(positions: &[Vec2], center: Vec2, radius: f32) -> Vec<u32> {
        positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance_squared(center) <= radius * radius)
            .map(|(i, _)| i as u32)
            .collect()
    }

    #[test]
    fn query_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(7);
        let positions: Vec<Vec2> = (0..500)
            .map(|_| Vec2::new(rng.random_range(0.0..600.0), rng.random_range(0.0..600.0)))
            .collect();
        let mut index = index_for(25.0);
        index.rebuild(&positions);
        assert_eq!(index.len(), 500);

        for _ in 0..50 {
            let center = Vec2::new(rng.random_range(0.0..600.0), rng.random_range(0.0..600.0));
            let mut found = index.query(center, 25.0);
            found.sort_unstable();
            assert_eq!(found, brute_force(&positions, center, 25.0));
        }
    }

    #[test]
    fn query_radius_larger_than_cell_size() {
        let positions = vec![Vec2::new(10.0, 10.0), Vec2::new(90.0, 10.0), Vec2::new(300.0, 300.0)];
        let mut index = index_for(5.0);
        index.rebuild(&positions);

        let mut found = index.query(Vec2::new(50.0, 10.0), 40.0);
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn radius_is_inclusive() {
        let positions = vec![Vec2::new(100.0, 100.0), Vec2::new(110.0, 100.0)];
        let mut index = index_for(10.0);
        index.rebuild(&positions);
        assert_eq!(index.query(Vec2::new(100.0, 100.0), 10.0), vec![0, 1]);
    }

    #[test]
    fn clustered_agents_share_one_cell() {
        let positions = vec![Vec2::new(42.0, 42.0); 1_000];
        let mut index = index_for(10.0);
        index.rebuild(&positions);

        let found = index.query(Vec2::new(42.5, 42.0), 1.0);
        assert_eq!(found.len(), 1_000);
        // Cell blocks keep agent order.
        assert!(found.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn early_stop_and_out_of_world_centers() {
        let positions = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let mut index = index_for(10.0);
        index.rebuild(&positions);

        let mut visited = 0;
        index.for_each_within(Vec2::new(0.0, 0.0), 5.0, |_| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);

        assert_eq!(index.query(Vec2::new(-3.0, 0.0), 3.0), vec![0]);
        assert!(index.query(Vec2::new(5_000.0, 5_000.0), 3.0).is_empty());
    }

    #[test]
    fn rebuild_forgets_previous_positions() {
        let mut index = index_for(10.0);
        index.rebuild(&[Vec2::new(5.0, 5.0), Vec2::new(6.0, 5.0)]);
        index.rebuild(&[Vec2::new(500.0, 500.0)]);
        assert!(index.query(Vec2::new(5.0, 5.0), 5.0).is_empty());
        assert_eq!(index.query(Vec2::new(500.0, 500.0), 1.0), vec![0]);
    }
}
