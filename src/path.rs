//! Walkability grid, any-angle (theta*) search, and the world-space path query.

use crate::assets::Walkmap;
use glam::{IVec2, Vec2};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

const NEIGHBOURS: [IVec2; 8] = [
    IVec2::new(1, 0),
    IVec2::new(-1, 0),
    IVec2::new(0, 1),
    IVec2::new(0, -1),
    IVec2::new(1, 1),
    IVec2::new(1, -1),
    IVec2::new(-1, 1),
    IVec2::new(-1, -1),
];

/// Byte-per-cell walkability grid unpacked from a bit-packed bitmap.
#[derive(Debug, Default)]
pub struct WalkGrid {
    width: i32,
    height: i32,
    cells: Vec<bool>,
    source: Option<Arc<[u8]>>,
}

#[derive(Debug, PartialEq)]
struct OpenCell {
    estimate: f32,
    index: usize,
}

impl Eq for OpenCell {}

impl Ord for OpenCell {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on the estimate.
        other.estimate.total_cmp(&self.estimate).then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for OpenCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl WalkGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unpack `bitmap` (row-major, LSB first, set bit = walkable).
    /// Returns false when the same bitmap is already loaded.
    pub fn load(&mut self, bitmap: &Arc<[u8]>, width: u32, height: u32) -> bool {
        let same_source = self.source.as_ref().map_or(false, |source| Arc::ptr_eq(source, bitmap));
        if same_source && self.width == width as i32 && self.height == height as i32 {
            return false;
        }
        let count = width as usize * height as usize;
        self.cells = (0..count)
            .map(|index| bitmap.get(index >> 3).map_or(false, |byte| byte & (1 << (index & 7)) != 0))
            .collect();
        self.width = width as i32;
        self.height = height as i32;
        self.source = Some(bitmap.clone());
        log::debug!("[path] loaded {width}x{height} walk grid");
        true
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn index(&self, cell: IVec2) -> Option<usize> {
        let inside = cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height;
        inside.then(|| (cell.y * self.width + cell.x) as usize)
    }

    fn cell_at(&self, index: usize) -> IVec2 {
        IVec2::new(index as i32 % self.width, index as i32 / self.width)
    }

    pub fn is_walkable(&self, cell: IVec2) -> bool {
        self.index(cell).map_or(false, |index| self.cells[index])
    }

    /// Closest walkable cell by euclidean distance; ties go to the first cell in row order.
    pub fn nearest_walkable(&self, cell: IVec2) -> Option<IVec2> {
        if self.is_walkable(cell) {
            return Some(cell);
        }
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, walkable)| **walkable)
            .map(|(index, _)| self.cell_at(index))
            .min_by_key(|candidate| (*candidate - cell).length_squared())
    }

    /// Whether the segment between two cell centres crosses only walkable cells. The first cell
    /// is not checked, so a search may start inside a wall. A segment passing exactly through a
    /// corner needs both cells beside that corner.
    pub fn line_of_sight(&self, from: IVec2, to: IVec2) -> bool {
        let delta = (to - from).abs();
        let step = (to - from).signum();
        let mut cell = from;
        let (mut ix, mut iy) = (0, 0);
        while ix < delta.x || iy < delta.y {
            let decision = (1 + 2 * ix) * delta.y - (1 + 2 * iy) * delta.x;
            if decision == 0 {
                if !self.is_walkable(IVec2::new(cell.x + step.x, cell.y))
                    || !self.is_walkable(IVec2::new(cell.x, cell.y + step.y))
                {
                    return false;
                }
                cell += step;
                ix += 1;
                iy += 1;
            } else if decision < 0 {
                cell.x += step.x;
                ix += 1;
            } else {
                cell.y += step.y;
                iy += 1;
            }
            if !self.is_walkable(cell) {
                return false;
            }
        }
        true
    }

    /// Theta* from `start` to `goal`. Returns the turning points, both ends included.
    pub fn find_path(&self, start: IVec2, goal: IVec2, heuristic_weight: f32) -> Option<Vec<IVec2>> {
        let start_index = self.index(start)?;
        let goal_index = self.index(goal)?;
        if !self.cells[goal_index] {
            return None;
        }
        if start_index == goal_index {
            return Some(vec![start]);
        }
        let count = self.cells.len();
        let mut cost = vec![f32::INFINITY; count];
        let mut parent = vec![usize::MAX; count];
        let mut closed = vec![false; count];
        let mut open = BinaryHeap::new();
        let heuristic = |cell: IVec2| (goal - cell).as_vec2().length() * heuristic_weight;

        cost[start_index] = 0.0;
        parent[start_index] = start_index;
        open.push(OpenCell { estimate: heuristic(start), index: start_index });

        while let Some(OpenCell { index, .. }) = open.pop() {
            if closed[index] {
                continue;
            }
            if index == goal_index {
                return Some(self.trace(&parent, start_index, goal_index));
            }
            closed[index] = true;
            let cell = self.cell_at(index);
            for offset in NEIGHBOURS {
                let next = cell + offset;
                let Some(next_index) = self.index(next) else {
                    continue;
                };
                if closed[next_index] || !self.cells[next_index] {
                    continue;
                }
                let diagonal = offset.x != 0 && offset.y != 0;
                let cuts_corner = !self.is_walkable(IVec2::new(next.x, cell.y))
                    || !self.is_walkable(IVec2::new(cell.x, next.y));
                if diagonal && cuts_corner {
                    continue;
                }
                let grand = parent[index];
                let grand_cell = self.cell_at(grand);
                let (via, via_cost) = if grand != index && self.line_of_sight(grand_cell, next) {
                    (grand, cost[grand] + distance(grand_cell, next))
                } else {
                    (index, cost[index] + distance(cell, next))
                };
                if via_cost < cost[next_index] {
                    cost[next_index] = via_cost;
                    parent[next_index] = via;
                    open.push(OpenCell { estimate: via_cost + heuristic(next), index: next_index });
                }
            }
        }
        None
    }

    fn trace(&self, parent: &[usize], start: usize, goal: usize) -> Vec<IVec2> {
        let mut path = vec![self.cell_at(goal)];
        let mut index = goal;
        while index != start {
            index = parent[index];
            path.push(self.cell_at(index));
        }
        path.reverse();
        path
    }
}

fn distance(a: IVec2, b: IVec2) -> f32 {
    (b - a).as_vec2().length()
}

/// World-space path queries over walkmap sprites.
#[derive(Debug)]
pub struct PathBridge {
    grid: WalkGrid,
    heuristic_weight: f32,
}

impl PathBridge {
    pub fn new(heuristic_weight: f32) -> Self {
        Self { grid: WalkGrid::new(), heuristic_weight }
    }

    pub fn grid(&self) -> &WalkGrid {
        &self.grid
    }

    fn to_cell(&self, walkmap: &Walkmap, point: Vec2) -> IVec2 {
        let cell = ((point - walkmap.offset) / walkmap.scale).floor().as_ivec2();
        cell.clamp(IVec2::ZERO, IVec2::new(self.grid.width - 1, self.grid.height - 1).max(IVec2::ZERO))
    }

    fn to_world(walkmap: &Walkmap, cell: IVec2) -> Vec2 {
        walkmap.offset + (cell.as_vec2() + Vec2::splat(0.5)) * walkmap.scale
    }

    /// Path from `from` to `to`, or `None` when the goal cannot be reached.
    ///
    /// The goal snaps to the nearest walkable cell. The first point is always `from`; the last is
    /// `to` when the goal's own cell was walkable, otherwise the centre of the snapped cell.
    pub fn find_path(&mut self, walkmap: &Walkmap, from: Vec2, to: Vec2) -> Option<Vec<Vec2>> {
        if walkmap.width == 0 || walkmap.height == 0 {
            return None;
        }
        self.grid.load(&walkmap.bitmap, walkmap.width, walkmap.height);
        let start = self.to_cell(walkmap, from);
        let goal = self.to_cell(walkmap, to);
        let Some(snapped) = self.grid.nearest_walkable(goal) else {
            log::debug!("[path] walk grid has no walkable cells");
            return None;
        };
        let Some(cells) = self.grid.find_path(start, snapped, self.heuristic_weight) else {
            log::debug!("[path] no path from {start} to {snapped}");
            return None;
        };
        let mut points: Vec<Vec2> = cells.iter().map(|cell| Self::to_world(walkmap, *cell)).collect();
        points[0] = from;
        if snapped == goal {
            if points.len() == 1 {
                points.push(to);
            } else if let Some(last) = points.last_mut() {
                *last = to;
            }
        }
        Some(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `.` walkable, `#` blocked.
    fn grid(rows: &[&str]) -> (Arc<[u8]>, u32, u32) {
        let width = rows[0].len();
        let mut bytes = vec![0u8; (width * rows.len() + 7) / 8];
        for (y, row) in rows.iter().enumerate() {
            for (x, cell) in row.chars().enumerate() {
                if cell == '.' {
                    let index = y * width + x;
                    bytes[index >> 3] |= 1 << (index & 7);
                }
            }
        }
        (Arc::from(bytes), width as u32, rows.len() as u32)
    }

    fn loaded(rows: &[&str]) -> WalkGrid {
        let (bits, width, height) = grid(rows);
        let mut walk = WalkGrid::new();
        walk.load(&bits, width, height);
        walk
    }

    #[test]
    fn open_grid_path_is_a_single_segment() {
        let walk = loaded(&[".....", ".....", "....."]);
        let path = walk.find_path(IVec2::new(0, 0), IVec2::new(4, 2), 1.2).expect("path");
        assert_eq!(path, vec![IVec2::new(0, 0), IVec2::new(4, 2)]);
    }

    #[test]
    fn wall_forces_a_detour() {
        let walk = loaded(&[".......", "...#...", "...#...", "...#...", "......."]);
        let path = walk.find_path(IVec2::new(0, 2), IVec2::new(6, 2), 1.2).expect("detour exists");
        assert_eq!(path.first(), Some(&IVec2::new(0, 2)));
        assert_eq!(path.last(), Some(&IVec2::new(6, 2)));
        assert!(path.len() >= 3, "straight line is blocked: {path:?}");
        for pair in path.windows(2) {
            assert!(walk.line_of_sight(pair[0], pair[1]), "segment {pair:?} crosses a wall");
        }
    }

    #[test]
    fn sealed_goal_has_no_path() {
        let walk = loaded(&["..#..", "..#..", "..#.."]);
        assert!(walk.find_path(IVec2::new(0, 1), IVec2::new(4, 1), 1.2).is_none());
    }

    #[test]
    fn diagonal_corner_is_not_cut() {
        let walk = loaded(&[".#", "#."]);
        assert!(!walk.line_of_sight(IVec2::new(0, 0), IVec2::new(1, 1)));
        assert!(walk.find_path(IVec2::new(0, 0), IVec2::new(1, 1), 1.0).is_none());
    }

    #[test]
    fn nearest_walkable_prefers_closest_cell() {
        let walk = loaded(&["#####", "##..#", "#####"]);
        assert_eq!(walk.nearest_walkable(IVec2::new(0, 1)), Some(IVec2::new(2, 1)));
        assert_eq!(walk.nearest_walkable(IVec2::new(3, 1)), Some(IVec2::new(3, 1)));
    }

    #[test]
    fn reload_is_skipped_for_the_same_bitmap() {
        let (bits, width, height) = grid(&["...", "..."]);
        let mut walk = WalkGrid::new();
        assert!(walk.load(&bits, width, height));
        assert!(!walk.load(&bits, width, height));
        let copy: Arc<[u8]> = Arc::from(bits.to_vec());
        assert!(walk.load(&copy, width, height), "a different allocation reloads");
    }

    #[test]
    fn bridge_maps_world_points_and_keeps_exact_ends() {
        let (bitmap, width, height) = grid(&["....", "....", "...."]);
        let walkmap = Walkmap { bitmap, width, height, scale: 10.0, offset: Vec2::new(100.0, 0.0) };
        let mut bridge = PathBridge::new(1.2);
        let from = Vec2::new(103.0, 4.0);
        let to = Vec2::new(137.0, 26.0);
        let path = bridge.find_path(&walkmap, from, to).expect("path");
        assert_eq!(path.first(), Some(&from));
        assert_eq!(path.last(), Some(&to));
    }

    #[test]
    fn bridge_snaps_blocked_goal_to_cell_centre() {
        let (bitmap, width, height) = grid(&["...#"]);
        let walkmap = Walkmap { bitmap, width, height, scale: 10.0, offset: Vec2::ZERO };
        let mut bridge = PathBridge::new(1.2);
        let path = bridge.find_path(&walkmap, Vec2::new(1.0, 1.0), Vec2::new(35.0, 5.0)).expect("path");
        assert_eq!(path.last(), Some(&Vec2::new(25.0, 5.0)));
    }
}
