//! Commutation functions and premiums derived from them
//!
//! All series cover the ages `x..=x+n` of one policy. The forward pass
//! builds survivors and discounted quantities age by age; the backward pass
//! then accumulates `N`, `Np`, `M` and `M0` from the terminal age down, each
//! value depending only on the next-higher age.

pub mod discount;
pub mod distribution;

pub use discount::DiscountCurve;
pub use distribution::{
    distribute_lapse_and_reinstatement, distribute_mortality_table,
    distribute_standard_lapse_and_reinstatement, RateByAge, MAX_TABLE_AGE,
};

use serde::{Deserialize, Serialize};

/// Survivors at entry age
pub const RADIX: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub const ALL: [Sex; 2] = [Sex::Male, Sex::Female];

    pub fn index(self) -> usize {
        match self {
            Sex::Male => 0,
            Sex::Female => 1,
        }
    }
}

/// Age-indexed commutation series for one entry age and term
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommutationFunctions {
    pub start_age: u32,
    /// Survivors
    pub lx: Vec<f64>,
    /// Premium payers
    pub lpx: Vec<f64>,
    /// Discounted survivors
    pub dx: Vec<f64>,
    /// Discounted premium payers
    pub dpx: Vec<f64>,
    /// Present value of the death benefit
    pub cx: Vec<f64>,
    /// Lapse-adjusted present value of the death benefit
    pub c0x: Vec<f64>,
    pub nx: Vec<f64>,
    pub npx: Vec<f64>,
    pub mx: Vec<f64>,
    pub m0x: Vec<f64>,
}

/// One age of a commutation table, for tabular output
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommutationRow {
    pub age: u32,
    pub lx: f64,
    pub lpx: f64,
    pub dx: f64,
    pub dpx: f64,
    pub cx: f64,
    pub c0x: f64,
    pub nx: f64,
    pub npx: f64,
    pub mx: f64,
    pub m0x: f64,
}

macro_rules! age_accessors {
    ($($name:ident => $series:ident),* $(,)?) => {
        $(
            /// Value at `age`; ages outside the table read as 0
            pub fn $name(&self, age: u32) -> f64 {
                self.slot(age).map_or(0.0, |i| self.$series[i])
            }
        )*
    };
}

impl CommutationFunctions {
    fn with_span(start_age: u32, len: usize) -> Self {
        let zeros = vec![0.0; len];
        Self {
            start_age,
            lx: zeros.clone(),
            lpx: zeros.clone(),
            dx: zeros.clone(),
            dpx: zeros.clone(),
            cx: zeros.clone(),
            c0x: zeros.clone(),
            nx: zeros.clone(),
            npx: zeros.clone(),
            mx: zeros.clone(),
            m0x: zeros,
        }
    }

    pub fn len(&self) -> usize {
        self.lx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lx.is_empty()
    }

    /// Highest age in the table
    pub fn end_age(&self) -> u32 {
        self.start_age + self.len().saturating_sub(1) as u32
    }

    fn slot(&self, age: u32) -> Option<usize> {
        let i = age.checked_sub(self.start_age)? as usize;
        (i < self.len()).then_some(i)
    }

    age_accessors! {
        l => lx,
        lp => lpx,
        d => dx,
        dp => dpx,
        c => cx,
        c0 => c0x,
        n => nx,
        np => npx,
        m => mx,
        m0 => m0x,
    }

    pub fn rows(&self) -> Vec<CommutationRow> {
        (0..self.len())
            .map(|i| CommutationRow {
                age: self.start_age + i as u32,
                lx: self.lx[i],
                lpx: self.lpx[i],
                dx: self.dx[i],
                dpx: self.dpx[i],
                cx: self.cx[i],
                c0x: self.c0x[i],
                nx: self.nx[i],
                npx: self.npx[i],
                mx: self.mx[i],
                m0x: self.m0x[i],
            })
            .collect()
    }

    /// Backward accumulation, seeded at the terminal age
    fn accumulate(&mut self) {
        let Some(last) = self.len().checked_sub(1) else {
            return;
        };
        self.nx[last] = self.dx[last];
        self.npx[last] = self.dpx[last];
        self.mx[last] = self.cx[last];
        self.m0x[last] = self.c0x[last];
        for i in (0..last).rev() {
            self.nx[i] = self.nx[i + 1] + self.dx[i];
            self.npx[i] = self.npx[i + 1] + self.dpx[i];
            self.mx[i] = self.mx[i + 1] + self.cx[i];
            self.m0x[i] = self.m0x[i + 1] + self.c0x[i];
        }
    }

    /// Level monthly premium for `face_amount`, term `n` and payment period
    /// `m` from entry age `x`, rounded half away from zero.
    ///
    /// The denominator is not guarded; a zero payment period yields a
    /// non-finite result.
    pub fn monthly_premium(&self, x: u32, n: u32, m: u32, face_amount: f64) -> f64 {
        let numerator = self.m(x) - self.m(x + n);
        let denominator =
            12.0 * (self.n(x) - self.n(x + m) - 11.0 / 24.0 * (self.d(x) - self.d(x + m)));
        (numerator / denominator * face_amount).round()
    }
}

/// Full commutation table for entry age `x` over `n` years.
///
/// `mortality` and `lapse` are indexed by attained age, the discount
/// functions by policy year. Survivors decrement by mortality only;
/// premium payers follow survivors.
pub fn compute_commutation(
    x: u32,
    n: u32,
    mortality: impl Fn(u32) -> f64,
    lapse: impl Fn(u32) -> f64,
    v0: impl Fn(u32) -> f64,
    v1: impl Fn(u32) -> f64,
) -> CommutationFunctions {
    let mut cf = CommutationFunctions::with_span(x, n as usize + 1);

    for t in 0..=n {
        let i = t as usize;
        let age = x + t;
        if t == 0 {
            cf.lx[i] = RADIX;
        } else {
            cf.lx[i] = cf.lx[i - 1] * (1.0 - mortality(age - 1));
        }
        cf.lpx[i] = cf.lx[i];

        let q = mortality(age);
        cf.dx[i] = cf.lx[i] * v0(t);
        cf.dpx[i] = cf.lpx[i] * v0(t);
        cf.cx[i] = cf.lx[i] * q * v1(t);
        cf.c0x[i] = cf.cx[i] * (1.0 - lapse(age) / 2.0);
    }

    cf.accumulate();
    cf
}

/// Monthly term premium for one sex.
///
/// `mortality` is indexed by sex and attained age; see
/// [`CommutationFunctions::monthly_premium`] for the formula.
#[allow(clippy::too_many_arguments)]
pub fn compute_term_premium(
    x: u32,
    n: u32,
    m: u32,
    face_amount: f64,
    sex: Sex,
    mortality: impl Fn(Sex, u32) -> f64,
    v0: impl Fn(u32) -> f64,
    v1: impl Fn(u32) -> f64,
) -> f64 {
    let cf = compute_commutation(x, n, |age| mortality(sex, age), |_| 0.0, v0, v1);
    cf.monthly_premium(x, n, m, face_amount)
}
