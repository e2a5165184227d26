//! IEEE 1164 nine-value logic with the LRM `resolved` table.
//!
//! The simulation kernel stores signal elements as raw bytes; for signals of
//! the standard-logic type each byte is the discriminant of a [`Logic`]
//! value. The [`Logic::resolve_pair`] table is the canonical resolution
//! function the kernel's memoizer is validated against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A single 9-state logic value following the IEEE 1164 standard.
///
/// The nine states represent:
/// - `U` — uninitialized
/// - `X` — forcing unknown
/// - `Zero` / `One` — forcing 0 / 1
/// - `Z` — high-impedance
/// - `W` — weak unknown
/// - `L` / `H` — weak 0 / weak 1
/// - `DontCare` — don't care (`-`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum Logic {
    /// Uninitialized.
    U = 0,
    /// Forcing unknown.
    X = 1,
    /// Forcing 0.
    Zero = 2,
    /// Forcing 1.
    One = 3,
    /// High-impedance.
    Z = 4,
    /// Weak unknown.
    W = 5,
    /// Weak 0.
    L = 6,
    /// Weak 1.
    H = 7,
    /// Don't care.
    DontCare = 8,
}

/// IEEE 1164 resolution table, indexed by the two discriminants.
///
/// ```text
///      U  X  0  1  Z  W  L  H  -
/// U  | U  U  U  U  U  U  U  U  U
/// X  | U  X  X  X  X  X  X  X  X
/// 0  | U  X  0  X  0  0  0  0  X
/// 1  | U  X  X  1  1  1  1  1  X
/// Z  | U  X  0  1  Z  W  L  H  X
/// W  | U  X  0  1  W  W  W  W  X
/// L  | U  X  0  1  L  W  L  W  X
/// H  | U  X  0  1  H  W  W  H  X
/// -  | U  X  X  X  X  X  X  X  X
/// ```
const RESOLUTION_TABLE: [[Logic; 9]; 9] = {
    use Logic::{DontCare as D, Zero as F0, One as F1, H, L, U, W, X, Z};
    [
        [U, U, U, U, U, U, U, U, U],
        [U, X, X, X, X, X, X, X, X],
        [U, X, F0, X, F0, F0, F0, F0, X],
        [U, X, X, F1, F1, F1, F1, F1, X],
        [U, X, F0, F1, Z, W, L, H, X],
        [U, X, F0, F1, W, W, W, W, X],
        [U, X, F0, F1, L, W, L, W, X],
        [U, X, F0, F1, H, W, W, H, X],
        [U, X, X, X, X, X, X, X, X],
    ]
};

impl Logic {
    /// Number of enumeration literals (the memoizer's domain size).
    pub const COUNT: usize = 9;

    /// Converts a raw byte (the in-memory element encoding) to a [`Logic`]
    /// value. Returns `None` for bytes outside the nine discriminants.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Logic::U),
            1 => Some(Logic::X),
            2 => Some(Logic::Zero),
            3 => Some(Logic::One),
            4 => Some(Logic::Z),
            5 => Some(Logic::W),
            6 => Some(Logic::L),
            7 => Some(Logic::H),
            8 => Some(Logic::DontCare),
            _ => None,
        }
    }

    /// Returns the in-memory byte encoding of this value.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Converts a character to a [`Logic`] value.
    ///
    /// Accepts the nine IEEE 1164 literals in either case.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'U' => Some(Logic::U),
            'X' => Some(Logic::X),
            '0' => Some(Logic::Zero),
            '1' => Some(Logic::One),
            'Z' => Some(Logic::Z),
            'W' => Some(Logic::W),
            'L' => Some(Logic::L),
            'H' => Some(Logic::H),
            '-' => Some(Logic::DontCare),
            _ => None,
        }
    }

    /// Resolves two simultaneously driven values per the IEEE 1164 table.
    pub fn resolve_pair(a: Logic, b: Logic) -> Logic {
        RESOLUTION_TABLE[a as usize][b as usize]
    }

    /// Resolves a set of driving values by folding
    /// [`resolve_pair`](Self::resolve_pair) starting from the `Z` identity,
    /// as the LRM's `resolved` function does. An empty set yields `Z`.
    pub fn resolve_all(values: &[Logic]) -> Logic {
        values.iter().fold(Logic::Z, |acc, &v| Logic::resolve_pair(acc, v))
    }

    /// Strength-strips this value to the `X01U` subset: weak 0/1 map to
    /// forcing 0/1, `U` is preserved, everything else becomes `X`.
    pub fn to_x01(self) -> Logic {
        match self {
            Logic::Zero | Logic::L => Logic::Zero,
            Logic::One | Logic::H => Logic::One,
            Logic::U => Logic::U,
            _ => Logic::X,
        }
    }

    /// Returns `true` for the two forcing, driven values `0` and `1`.
    pub fn is_driven(self) -> bool {
        matches!(self, Logic::Zero | Logic::One)
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Logic::U => 'U',
            Logic::X => 'X',
            Logic::Zero => '0',
            Logic::One => '1',
            Logic::Z => 'Z',
            Logic::W => 'W',
            Logic::L => 'L',
            Logic::H => 'H',
            Logic::DontCare => '-',
        };
        write!(f, "{c}")
    }
}

/// IEEE 1164 AND: a driven 0 dominates, then `U` propagates, then two
/// driven 1s give 1; every other combination is unknown.
impl BitAnd for Logic {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        let (a, b) = (self.to_x01(), rhs.to_x01());
        match (a, b) {
            (Logic::Zero, _) | (_, Logic::Zero) => Logic::Zero,
            (Logic::U, _) | (_, Logic::U) => Logic::U,
            (Logic::One, Logic::One) => Logic::One,
            _ => Logic::X,
        }
    }
}

/// IEEE 1164 OR: a driven 1 dominates, then `U` propagates, then two
/// driven 0s give 0; every other combination is unknown.
impl BitOr for Logic {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let (a, b) = (self.to_x01(), rhs.to_x01());
        match (a, b) {
            (Logic::One, _) | (_, Logic::One) => Logic::One,
            (Logic::U, _) | (_, Logic::U) => Logic::U,
            (Logic::Zero, Logic::Zero) => Logic::Zero,
            _ => Logic::X,
        }
    }
}

/// IEEE 1164 NOT: `U` propagates, driven values invert, the rest is `X`.
impl Not for Logic {
    type Output = Self;

    fn not(self) -> Self {
        match self.to_x01() {
            Logic::Zero => Logic::One,
            Logic::One => Logic::Zero,
            Logic::U => Logic::U,
            _ => Logic::X,
        }
    }
}
