use std::collections::BTreeMap;

use rand::Rng;
use shared::domain::{
    Cell, Dimension, Hsl, Position, HUE_MAX, LIGHT_MAX, LIGHT_MIN, SATURATION_MAX,
};

pub mod patterns;

const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Summary of one generation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub born: Vec<Cell>,
    pub died: Vec<Position>,
    /// Set when the step pushed `bottom_right` outwards.
    pub grown: bool,
}

#[derive(Default)]
struct Aggregate {
    own: Option<Hsl>,
    neighbors: Vec<Hsl>,
}

/// Sparse Game-of-Life state for one room.
///
/// Only living cells are stored, keyed by position. Iteration order is the position order,
/// which keeps `step` deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellularEngine {
    living: BTreeMap<Position, Hsl>,
    dimension: Dimension,
}

impl Default for CellularEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CellularEngine {
    pub fn new() -> Self {
        Self {
            living: BTreeMap::new(),
            dimension: Dimension::default(),
        }
    }

    pub fn with_cells(cells: impl IntoIterator<Item = Cell>) -> Self {
        let mut engine = Self::new();
        engine.add_living_cells(cells);
        engine
    }

    /// Inserts cells lying inside the current box. Re-adding a position overwrites its color.
    /// Returns how many cells were accepted.
    pub fn add_living_cells(&mut self, cells: impl IntoIterator<Item = Cell>) -> usize {
        let mut accepted = 0;
        for cell in cells {
            if !self.dimension.contains(cell.position) {
                continue;
            }
            self.living.insert(cell.position, cell.appearance);
            accepted += 1;
        }
        accepted
    }

    /// Returns how many of the positions were actually alive.
    pub fn remove_living_cells(&mut self, positions: impl IntoIterator<Item = Position>) -> usize {
        positions
            .into_iter()
            .filter(|position| self.living.remove(position).is_some())
            .count()
    }

    pub fn step(&mut self) -> Generation {
        let mut aggregates: BTreeMap<Position, Aggregate> = BTreeMap::new();

        for (&position, &color) in &self.living {
            aggregates.entry(position).or_default().own = Some(color);

            for (dx, dy) in NEIGHBOR_OFFSETS {
                let neighbor = Position::new(position.x + dx, position.y + dy);
                if !neighbor.is_non_negative() {
                    continue;
                }
                aggregates.entry(neighbor).or_default().neighbors.push(color);
            }
        }

        let mut next = BTreeMap::new();
        let mut generation = Generation::default();
        let mut furthest = self.dimension.bottom_right;

        for (position, aggregate) in aggregates {
            let live_neighbors = aggregate.neighbors.len();
            match aggregate.own {
                Some(color) if live_neighbors == 2 || live_neighbors == 3 => {
                    next.insert(position, color);
                }
                Some(_) => generation.died.push(position),
                None if live_neighbors == 3 => {
                    let color = blend(&aggregate.neighbors);
                    furthest.x = furthest.x.max(position.x);
                    furthest.y = furthest.y.max(position.y);
                    next.insert(position, color);
                    generation.born.push(Cell::living(position, color));
                }
                None => {}
            }
        }

        generation.grown = furthest != self.dimension.bottom_right;
        self.dimension.bottom_right = furthest;
        self.living = next;
        generation
    }

    pub fn current_living_cells(&self) -> Vec<Cell> {
        self.living
            .iter()
            .map(|(&position, &color)| Cell::living(position, color))
            .collect()
    }

    pub fn bottom_right_boundary(&self) -> Position {
        self.dimension.bottom_right
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_alive(&self, position: Position) -> bool {
        self.living.contains_key(&position)
    }

    pub fn len(&self) -> usize {
        self.living.len()
    }

    pub fn is_empty(&self) -> bool {
        self.living.is_empty()
    }
}

/// Per-channel floor average. Hue is averaged linearly, without wrap-around.
pub fn blend(colors: &[Hsl]) -> Hsl {
    if colors.is_empty() {
        return Hsl::default();
    }
    let count = colors.len() as u32;
    let (hue, saturation, light) = colors.iter().fold((0u32, 0u32, 0u32), |acc, color| {
        (
            acc.0 + u32::from(color.hue),
            acc.1 + u32::from(color.saturation),
            acc.2 + u32::from(color.light),
        )
    });
    Hsl {
        hue: (hue / count) as u16,
        saturation: (saturation / count) as u8,
        light: (light / count) as u8,
    }
}

/// A readable player color; lightness never drops below [`LIGHT_MIN`].
pub fn random_hsl<R: Rng + ?Sized>(rng: &mut R) -> Hsl {
    Hsl {
        hue: rng.gen_range(0..=HUE_MAX),
        saturation: rng.gen_range(0..=SATURATION_MAX),
        light: rng.gen_range(LIGHT_MIN..=LIGHT_MAX),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
