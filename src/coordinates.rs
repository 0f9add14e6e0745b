// src/coordinates.rs - Eight axis coordinate vector
use std::fmt;
use std::ops::{Add, Div, Index, Mul, Neg, Sub};

/// Number of controllable axes.
pub const AXIS_COUNT: usize = 8;

/// Values are kept at ten fractional digits.
const PRECISION: f64 = 1e10;

/// Machine axes in storage order.
///
/// `X`, `Y`, `Z` are the tool's Cartesian axes, `E` and `Q` the primary and
/// secondary extruders, `N` the rotary nozzle selector and `A`/`B` the heated
/// bed tilt and rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
    Q,
    N,
    A,
    B,
}

impl Axis {
    pub const ALL: [Axis; AXIS_COUNT] = [
        Axis::X,
        Axis::Y,
        Axis::Z,
        Axis::E,
        Axis::Q,
        Axis::N,
        Axis::A,
        Axis::B,
    ];

    pub const CARTESIAN: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
            Axis::Q => 'Q',
            Axis::N => 'N',
            Axis::A => 'A',
            Axis::B => 'B',
        }
    }

    /// Lowercase name used as configuration key.
    pub const fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::E => "e",
            Axis::Q => "q",
            Axis::N => "n",
            Axis::A => "a",
            Axis::B => "b",
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        let letter = letter.to_ascii_uppercase();
        Self::ALL.into_iter().find(|axis| axis.letter() == letter)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|axis| axis.name() == name)
    }

    pub const fn is_cartesian(self) -> bool {
        matches!(self, Axis::X | Axis::Y | Axis::Z)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

fn normalize(value: f64) -> f64 {
    // adding 0.0 folds negative zero into positive zero
    (value * PRECISION).round() / PRECISION + 0.0
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Immutable eight component vector. Every constructor normalizes its
/// components to ten fractional digits, so results of repeated arithmetic
/// compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinates {
    values: [f64; AXIS_COUNT],
}

impl Coordinates {
    #[allow(clippy::too_many_arguments)]
    pub fn new(x: f64, y: f64, z: f64, e: f64, q: f64, n: f64, a: f64, b: f64) -> Self {
        Self::from_array([x, y, z, e, q, n, a, b])
    }

    pub fn from_array(values: [f64; AXIS_COUNT]) -> Self {
        Self { values: values.map(normalize) }
    }

    pub const fn zero() -> Self {
        Self { values: [0.0; AXIS_COUNT] }
    }

    /// Same value on every axis.
    pub fn splat(value: f64) -> Self {
        Self::from_array([value; AXIS_COUNT])
    }

    pub fn from_fn(f: impl FnMut(Axis) -> f64) -> Self {
        Self::from_array(Axis::ALL.map(f))
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.values[axis.index()]
    }

    /// Copy with one component replaced.
    pub fn with(&self, axis: Axis, value: f64) -> Self {
        let mut values = self.values;
        values[axis.index()] = value;
        Self::from_array(values)
    }

    pub fn to_array(&self) -> [f64; AXIS_COUNT] {
        self.values
    }

    pub fn x(&self) -> f64 {
        self.get(Axis::X)
    }
    pub fn y(&self) -> f64 {
        self.get(Axis::Y)
    }
    pub fn z(&self) -> f64 {
        self.get(Axis::Z)
    }
    pub fn e(&self) -> f64 {
        self.get(Axis::E)
    }
    pub fn q(&self) -> f64 {
        self.get(Axis::Q)
    }
    pub fn n(&self) -> f64 {
        self.get(Axis::N)
    }
    pub fn a(&self) -> f64 {
        self.get(Axis::A)
    }
    pub fn b(&self) -> f64 {
        self.get(Axis::B)
    }

    /// Cartesian part as an array.
    pub fn xyz(&self) -> [f64; 3] {
        [self.x(), self.y(), self.z()]
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Plain axis aligned box test on every component. Corners may be given
    /// in any order.
    pub fn is_in_aabb(&self, p1: &Coordinates, p2: &Coordinates) -> bool {
        Axis::ALL.into_iter().all(|axis| {
            let (low, high) = ordered(p1.get(axis), p2.get(axis));
            let value = self.get(axis);
            value >= low && value <= high
        })
    }

    /// Working volume test. `X` and `Y` are checked radially against the
    /// larger `X` corner; everything else is an ordinary min/max check.
    ///
    /// When `N` sits on one of its two extremes the tool centre is shifted
    /// along `X` by `pivot_offset`: positive at the lower extreme, negative at
    /// the upper one.
    pub fn is_in_bounding_volume(&self, p1: &Coordinates, p2: &Coordinates, pivot_offset: f64) -> bool {
        let radius = p1.x().max(p2.x());
        let (min_n, max_n) = ordered(p1.n(), p2.n());
        let x = if self.n() == min_n {
            self.x() + pivot_offset
        } else if self.n() == max_n {
            self.x() - pivot_offset
        } else {
            self.x()
        };
        if x * x + self.y() * self.y() > radius * radius {
            return false;
        }
        Axis::ALL
            .into_iter()
            .filter(|axis| !matches!(axis, Axis::X | Axis::Y))
            .all(|axis| {
                let (low, high) = ordered(p1.get(axis), p2.get(axis));
                let value = self.get(axis);
                value >= low && value <= high
            })
    }

    /// Euclidean norm over all eight components.
    pub fn length(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Rounds every component to the nearest multiple of the matching base.
    /// A zero base leaves the component untouched.
    pub fn round_to_grid(&self, bases: &[f64; AXIS_COUNT]) -> Self {
        let mut values = self.values;
        for (value, base) in values.iter_mut().zip(bases) {
            if *base != 0.0 {
                *value = (*value / base).round() * base;
            }
        }
        Self::from_array(values)
    }

    /// Largest single component.
    pub fn find_max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn abs(&self) -> Self {
        Self::from_array(self.values.map(f64::abs))
    }

    pub fn map(&self, mut f: impl FnMut(Axis, f64) -> f64) -> Self {
        Self::from_fn(|axis| f(axis, self.get(axis)))
    }
}

impl Index<Axis> for Coordinates {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        &self.values[axis.index()]
    }
}

impl Add for Coordinates {
    type Output = Coordinates;

    fn add(self, other: Coordinates) -> Coordinates {
        Coordinates::from_fn(|axis| self[axis] + other[axis])
    }
}

impl Sub for Coordinates {
    type Output = Coordinates;

    fn sub(self, other: Coordinates) -> Coordinates {
        Coordinates::from_fn(|axis| self[axis] - other[axis])
    }
}

impl Mul<f64> for Coordinates {
    type Output = Coordinates;

    fn mul(self, scale: f64) -> Coordinates {
        Coordinates::from_fn(|axis| self[axis] * scale)
    }
}

impl Div<f64> for Coordinates {
    type Output = Coordinates;

    fn div(self, divisor: f64) -> Coordinates {
        Coordinates::from_fn(|axis| self[axis] / divisor)
    }
}

impl Neg for Coordinates {
    type Output = Coordinates;

    fn neg(self) -> Coordinates {
        Coordinates::from_fn(|axis| -self[axis])
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, axis) in Axis::ALL.into_iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", axis.letter(), self[axis])?;
        }
        Ok(())
    }
}

/// Per axis on/off flags, e.g. which axes a calibration run touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisMask([bool; AXIS_COUNT]);

impl AxisMask {
    pub const NONE: AxisMask = AxisMask([false; AXIS_COUNT]);
    pub const ALL: AxisMask = AxisMask([true; AXIS_COUNT]);

    pub fn from_axes(axes: &[Axis]) -> Self {
        let mut mask = Self::NONE;
        for axis in axes {
            mask.0[axis.index()] = true;
        }
        mask
    }

    pub fn with(mut self, axis: Axis, enabled: bool) -> Self {
        self.0[axis.index()] = enabled;
        self
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.0[axis.index()]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|on| *on)
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::ALL.into_iter().filter(|axis| self.contains(*axis))
    }
}
