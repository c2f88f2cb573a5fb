use shared::domain::Position;

pub struct Pattern {
    pub name: &'static str,
    pub cells: &'static [(i64, i64)],
}

impl Pattern {
    /// Pattern cells shifted so the pattern's local (0, 0) lands on `origin`.
    pub fn at(&self, origin: Position) -> Vec<Position> {
        self.cells
            .iter()
            .map(|&(x, y)| Position::new(origin.x + x, origin.y + y))
            .collect()
    }
}

pub const PATTERNS: &[Pattern] = &[
    Pattern {
        name: "glider",
        cells: &[(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)],
    },
    Pattern {
        name: "blinker",
        cells: &[(0, 0), (1, 0), (2, 0)],
    },
    Pattern {
        name: "toad",
        cells: &[(1, 0), (2, 0), (3, 0), (0, 1), (1, 1), (2, 1)],
    },
    Pattern {
        name: "beacon",
        cells: &[(0, 0), (1, 0), (0, 1), (1, 1), (2, 2), (3, 2), (2, 3), (3, 3)],
    },
    Pattern {
        name: "r-pentomino",
        cells: &[(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)],
    },
    Pattern {
        name: "boat4",
        cells: &[
            (3, 0),
            (2, 1),
            (4, 1),
            (1, 2),
            (3, 2),
            (4, 2),
            (0, 3),
            (2, 3),
            (5, 3),
            (6, 3),
            (1, 4),
            (2, 4),
            (5, 4),
            (7, 4),
            (3, 5),
            (4, 5),
            (6, 5),
            (3, 6),
            (5, 6),
            (4, 7),
        ],
    },
];

pub fn find(name: &str) -> Option<&'static Pattern> {
    PATTERNS
        .iter()
        .find(|pattern| pattern.name.eq_ignore_ascii_case(name))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    PATTERNS.iter().map(|pattern| pattern.name)
}
