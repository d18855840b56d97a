use itertools::iproduct;
use log::debug;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::error::{MosaicError, Result};
use super::features::{self, Features};

/// A tile placed on a cell may not reappear anywhere in the cell's
/// redundancy mask, the centered `MASK_SIZE` x `MASK_SIZE` block of cells
/// (grid offsets strictly below the radius on both axes).
pub const REDUNDANCY_RADIUS: usize = 5;
pub const MASK_SIZE: usize = 2 * REDUNDANCY_RADIUS - 1;
/// Distinct tiles needed to fill a worst-case redundancy mask, and the
/// per-cell candidate list length that guarantees a feasible assignment: a
/// mask holds at most `MASK_SIZE`^2 cells, so 81 candidates per cell always
/// leave one unblocked.
pub const REDUNDANCY_TILES: usize = MASK_SIZE * MASK_SIZE;

const REDUNDANCY_DIST: usize = REDUNDANCY_RADIUS - 1;

/// Tile index per mosaic cell, row-major.
pub struct Assignment {
    grid_w: usize,
    ids: Vec<usize>,
}

impl Assignment {
    pub fn tile_for(&self, cell: usize) -> usize {
        self.ids[cell]
    }

    pub fn cells(&self) -> usize {
        self.ids.len()
    }

    pub fn grid_position(&self, cell: usize) -> (usize, usize) {
        (cell / self.grid_w, cell % self.grid_w)
    }
}

#[derive(Clone, Copy)]
struct Candidate {
    id: usize,
    dist: f64,
}

/// Greedy, cost-ordered assignment of catalog tiles to grid cells under the
/// non-repetition constraint. Heuristic: it guarantees that no tile repeats
/// inside a redundancy mask and that every cell is assigned, not that the
/// total cost is optimal.
pub struct MatchSolver {
    grid_w: usize,
    grid_h: usize,
}

impl MatchSolver {
    pub fn new(grid: (u32, u32)) -> MatchSolver {
        MatchSolver {
            grid_w: grid.0 as usize,
            grid_h: grid.1 as usize,
        }
    }

    /// Minimum catalog size for a feasible solve on this grid: one distinct
    /// tile per cell of the largest redundancy mask that fits.
    pub fn required_tiles(&self) -> usize {
        MASK_SIZE.min(self.grid_w) * MASK_SIZE.min(self.grid_h)
    }

    pub fn solve(&self, cell_features: &[Features], tile_features: &[Features]) -> Result<Assignment> {
        assert_eq!(cell_features.len(), self.grid_w * self.grid_h);
        let candidates = self.find_candidates(cell_features, tile_features);
        let candidates = self.reduce_candidates(candidates);
        self.find_solution(&candidates)
    }

    /// Per-cell shortlist: distances to every tile, best first, capped at the
    /// feasibility bound.
    fn find_candidates(
        &self,
        cell_features: &[Features],
        tile_features: &[Features],
    ) -> Vec<Vec<Candidate>> {
        let keep = REDUNDANCY_TILES.min(tile_features.len());
        (0..cell_features.len())
            .into_par_iter()
            .map(|m| {
                let mut list: Vec<Candidate> = tile_features
                    .iter()
                    .enumerate()
                    .map(|(id, tile)| Candidate {
                        id,
                        dist: features::distance(&cell_features[m], tile),
                    })
                    .collect();
                list.sort_by(|a, b| a.dist.total_cmp(&b.dist));
                list.truncate(keep);
                list
            })
            .collect()
    }

    /// Iteratively shorten the shortlists: when a cell has a candidate no
    /// other cell in its neighborhood is also considering, that cell can
    /// never be forced past it, so everything ranked below is dead weight.
    /// Sweeps repeat until a complete pass over the grid reduces nothing.
    fn reduce_candidates(&self, mut candidates: Vec<Vec<Candidate>>) -> Vec<Vec<Candidate>> {
        let sorted_ids = |list: &[Candidate]| {
            let mut ids: Vec<usize> = list.iter().map(|c| c.id).collect();
            ids.sort_unstable();
            ids
        };
        let mut id_index: Vec<Vec<usize>> = candidates.iter().map(|l| sorted_ids(l)).collect();

        loop {
            let mut reduced = false;
            for (i, j) in iproduct!(0..self.grid_h, 0..self.grid_w) {
                let m = i * self.grid_w + j;
                if candidates[m].len() < 2 {
                    continue;
                }
                for t in 0..candidates[m].len() - 1 {
                    let id = candidates[m][t].id;
                    let contested = self
                        .neighborhood(i, j)
                        .any(|n| n != m && id_index[n].binary_search(&id).is_ok());
                    if !contested {
                        candidates[m].truncate(t + 1);
                        id_index[m] = sorted_ids(&candidates[m]);
                        reduced = true;
                        break;
                    }
                }
            }
            if !reduced {
                return candidates;
            }
        }
    }

    /// Flatten every (cell, tile) pair, walk them in cost order, and accept
    /// each pair whose cell is still open and whose tile is absent from the
    /// cell's neighborhood. Ties keep their flattening order (stable sort).
    fn find_solution(&self, candidates: &[Vec<Candidate>]) -> Result<Assignment> {
        let mut flat: Vec<(usize, Candidate)> = candidates
            .iter()
            .enumerate()
            .flat_map(|(m, list)| list.iter().map(move |&c| (m, c)))
            .collect();
        flat.sort_by(|(_, a), (_, b)| a.dist.total_cmp(&b.dist));

        let mut assigned: Vec<Option<usize>> = vec![None; candidates.len()];
        let mut total_cost = 0.0;
        for (m, candidate) in flat {
            if assigned[m].is_some() {
                continue;
            }
            let (i, j) = (m / self.grid_w, m % self.grid_w);
            let repeated = self
                .neighborhood(i, j)
                .any(|n| assigned[n] == Some(candidate.id));
            if !repeated {
                assigned[m] = Some(candidate.id);
                total_cost += candidate.dist;
            }
        }

        let ids: Vec<usize> = assigned
            .into_iter()
            .collect::<Option<Vec<usize>>>()
            .ok_or(MosaicError::Incomplete)?;
        debug!(
            "matching solved with mean cost {:.2}",
            total_cost / ids.len() as f64
        );
        Ok(Assignment {
            grid_w: self.grid_w,
            ids,
        })
    }

    /// Cell indices inside the redundancy mask of (i, j), clipped at the
    /// grid edges; includes (i, j) itself.
    fn neighborhood(&self, i: usize, j: usize) -> impl Iterator<Item = usize> + '_ {
        let i0 = i.saturating_sub(REDUNDANCY_DIST);
        let i1 = (i + REDUNDANCY_DIST).min(self.grid_h - 1);
        let j0 = j.saturating_sub(REDUNDANCY_DIST);
        let j1 = (j + REDUNDANCY_DIST).min(self.grid_w - 1);
        iproduct!(i0..=i1, j0..=j1).map(move |(ni, nj)| ni * self.grid_w + nj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::features::NB_FEATURES;

    /// Descriptor whose blocks all read one constant intensity.
    fn flat_features(level: f64) -> Features {
        [level; NB_FEATURES]
    }

    fn chebyshev(a: (usize, usize), b: (usize, usize)) -> usize {
        (a.0.abs_diff(b.0)).max(a.1.abs_diff(b.1))
    }

    fn check_invariants(assignment: &Assignment) {
        for m1 in 0..assignment.cells() {
            for m2 in (m1 + 1)..assignment.cells() {
                let close = chebyshev(
                    assignment.grid_position(m1),
                    assignment.grid_position(m2),
                ) < REDUNDANCY_RADIUS;
                if close {
                    assert_ne!(
                        assignment.tile_for(m1),
                        assignment.tile_for(m2),
                        "cells {m1} and {m2} share a tile"
                    );
                }
            }
        }
    }

    #[test]
    fn test_required_tiles_scales_with_the_grid() {
        assert_eq!(MatchSolver::new((1, 1)).required_tiles(), 1);
        assert_eq!(MatchSolver::new((3, 3)).required_tiles(), 9);
        assert_eq!(MatchSolver::new((4, 20)).required_tiles(), 36);
        assert_eq!(MatchSolver::new((40, 40)).required_tiles(), REDUNDANCY_TILES);
    }

    #[test]
    fn test_single_cell_takes_the_best_tile() {
        let solver = MatchSolver::new((1, 1));
        let cells = vec![flat_features(100.0)];
        let tiles = vec![
            flat_features(0.0),
            flat_features(99.0),
            flat_features(220.0),
        ];
        let assignment = solver.solve(&cells, &tiles).unwrap();
        assert_eq!(assignment.tile_for(0), 1);
    }

    #[test]
    fn test_small_grid_assigns_all_cells_without_repeats() {
        // 3x3 grid with the radius covering the whole grid: all nine tiles
        // must be pairwise distinct.
        let solver = MatchSolver::new((3, 3));
        let cells: Vec<Features> = (0..9).map(|m| flat_features(m as f64 * 10.0)).collect();
        let tiles: Vec<Features> = (0..81).map(|t| flat_features(t as f64 * 3.0)).collect();
        let assignment = solver.solve(&cells, &tiles).unwrap();
        assert_eq!(assignment.cells(), 9);
        check_invariants(&assignment);
        let mut ids: Vec<usize> = (0..9).map(|m| assignment.tile_for(m)).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 9);
    }

    #[test]
    fn test_exact_minimum_catalog_is_feasible() {
        // A grid wider than the mask with exactly the worst-case tile count.
        let solver = MatchSolver::new((12, 12));
        let cells: Vec<Features> = (0..144)
            .map(|m| flat_features((m % 97) as f64 * 2.5))
            .collect();
        let tiles: Vec<Features> = (0..REDUNDANCY_TILES)
            .map(|t| flat_features(t as f64 * 3.1))
            .collect();
        assert_eq!(solver.required_tiles(), REDUNDANCY_TILES);
        let assignment = solver.solve(&cells, &tiles).unwrap();
        check_invariants(&assignment);
    }

    #[test]
    fn test_greedy_prefers_lower_cost_pairs() {
        // Both cells sit in one mask, so they cannot share the good tile;
        // the globally cheaper pair wins it and the other cell takes the
        // leftover.
        let solver = MatchSolver::new((2, 1));
        let cells = vec![flat_features(10.0), flat_features(12.0)];
        let tiles = vec![flat_features(10.0), flat_features(50.0)];
        let assignment = solver.solve(&cells, &tiles).unwrap();
        assert_eq!(assignment.tile_for(0), 0);
        assert_eq!(assignment.tile_for(1), 1);
    }
}
