//! Subjective-logic opinions.
//!
//! An opinion is a 4-tuple `(belief, disbelief, uncertainty, base_rate)` with
//! `belief + disbelief + uncertainty = 1` and every component in `[0, 1]`.
//! Values are immutable; every operator returns a freshly validated opinion.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tolerance for the opinion invariant and for approximate equality.
pub const PRECISION: f64 = 1e-12;

/// A subjective-logic opinion about a single proposition.
///
/// Equality is approximate: two opinions are equal when every component
/// differs by at most [`PRECISION`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawOpinion")]
pub struct SubjectiveOpinion {
    belief: f64,
    disbelief: f64,
    uncertainty: f64,
    base_rate: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpinion {
    belief: f64,
    disbelief: f64,
    uncertainty: f64,
    base_rate: f64,
}

impl TryFrom<RawOpinion> for SubjectiveOpinion {
    type Error = CoreError;

    fn try_from(raw: RawOpinion) -> Result<Self, Self::Error> {
        Self::new(raw.belief, raw.disbelief, raw.uncertainty, raw.base_rate)
    }
}

impl SubjectiveOpinion {
    /// `(1, 0, 0, 0.5)`
    pub const FULL_BELIEF: Self = Self::raw(1.0, 0.0, 0.0, 0.5);
    /// `(0, 1, 0, 0.5)`
    pub const FULL_DISBELIEF: Self = Self::raw(0.0, 1.0, 0.0, 0.5);
    /// `(0, 0, 1, 0.5)`
    pub const FULL_UNCERTAINTY: Self = Self::raw(0.0, 0.0, 1.0, 0.5);

    const fn raw(belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64) -> Self {
        Self { belief, disbelief, uncertainty, base_rate }
    }

    /// Creates a validated opinion.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidOpinion`] if any component is outside
    /// `[0, 1]` (NaN included) or if `belief + disbelief + uncertainty`
    /// differs from 1 by more than [`PRECISION`].
    pub fn new(
        belief: f64,
        disbelief: f64,
        uncertainty: f64,
        base_rate: f64,
    ) -> Result<Self, CoreError> {
        validate(belief, disbelief, uncertainty, base_rate)?;
        Ok(Self::raw(belief, disbelief, uncertainty, base_rate))
    }

    /// Creates an opinion whose uncertainty is the mass left over by
    /// `belief` and `disbelief`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidOpinion`] if `belief + disbelief > 1`
    /// beyond rounding noise, or if any component is out of range.
    pub fn from_belief_disbelief(
        belief: f64,
        disbelief: f64,
        base_rate: f64,
    ) -> Result<Self, CoreError> {
        let mut uncertainty = 1.0 - belief - disbelief;
        if uncertainty < 0.0 && uncertainty > -PRECISION {
            uncertainty = 0.0;
        }
        Self::new(belief, disbelief, uncertainty, base_rate)
    }

    /// Replaces all four components at once.
    ///
    /// Either every field is replaced or, on error, none is.
    ///
    /// # Errors
    /// Same conditions as [`SubjectiveOpinion::new`].
    pub fn modify(
        &mut self,
        belief: f64,
        disbelief: f64,
        uncertainty: f64,
        base_rate: f64,
    ) -> Result<(), CoreError> {
        *self = Self::new(belief, disbelief, uncertainty, base_rate)?;
        Ok(())
    }

    #[must_use]
    pub fn belief(&self) -> f64 {
        self.belief
    }

    #[must_use]
    pub fn disbelief(&self) -> f64 {
        self.disbelief
    }

    #[must_use]
    pub fn uncertainty(&self) -> f64 {
        self.uncertainty
    }

    #[must_use]
    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// `P = belief + uncertainty * base_rate`
    #[must_use]
    pub fn projected_probability(&self) -> f64 {
        self.belief + self.uncertainty * self.base_rate
    }

    /// Componentwise comparison within [`PRECISION`].
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.belief - other.belief).abs() <= PRECISION
            && (self.disbelief - other.disbelief).abs() <= PRECISION
            && (self.uncertainty - other.uncertainty).abs() <= PRECISION
            && (self.base_rate - other.base_rate).abs() <= PRECISION
    }

    /// Returns `true` if the opinion carries no evidence at all.
    #[must_use]
    pub fn is_vacuous(&self) -> bool {
        (self.uncertainty - 1.0).abs() <= PRECISION
    }

    /// Returns `true` if the opinion carries no uncertainty.
    #[must_use]
    pub fn is_dogmatic(&self) -> bool {
        self.uncertainty <= PRECISION
    }

    /// Cumulative fusion of two independent opinions on the same proposition.
    ///
    /// When both inputs are dogmatic the result is their componentwise average
    /// with zero uncertainty.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidOpinion`] only if the inputs were
    /// constructed unchecked and produce a non-finite result.
    pub fn cumulative_fusion(&self, other: &Self) -> Result<Self, CoreError> {
        let (ua, ub) = (self.uncertainty, other.uncertainty);
        if self.is_dogmatic() && other.is_dogmatic() {
            return settle(
                (self.belief + other.belief) / 2.0,
                (self.disbelief + other.disbelief) / 2.0,
                0.0,
                (self.base_rate + other.base_rate) / 2.0,
            );
        }

        let k = ua + ub - ua * ub;
        let belief = (self.belief * ub + other.belief * ua) / k;
        let disbelief = (self.disbelief * ub + other.disbelief * ua) / k;
        let uncertainty = ua * ub / k;

        let denominator = ua + ub - 2.0 * ua * ub;
        let base_rate = if denominator.abs() <= PRECISION {
            (self.base_rate + other.base_rate) / 2.0
        } else {
            (self.base_rate * ub + other.base_rate * ua
                - (self.base_rate + other.base_rate) * ua * ub)
                / denominator
        };
        settle(belief, disbelief, uncertainty, base_rate)
    }

    /// Averaging fusion of two dependent opinions on the same proposition.
    ///
    /// # Errors
    /// See [`SubjectiveOpinion::cumulative_fusion`].
    pub fn averaging_fusion(&self, other: &Self) -> Result<Self, CoreError> {
        let (ua, ub) = (self.uncertainty, other.uncertainty);
        let base_rate = (self.base_rate + other.base_rate) / 2.0;
        if self.is_dogmatic() && other.is_dogmatic() {
            return settle(
                (self.belief + other.belief) / 2.0,
                (self.disbelief + other.disbelief) / 2.0,
                0.0,
                base_rate,
            );
        }

        let k = ua + ub;
        settle(
            (self.belief * ub + other.belief * ua) / k,
            (self.disbelief * ub + other.disbelief * ua) / k,
            2.0 * ua * ub / k,
            base_rate,
        )
    }

    /// Propagates `opinion` through `self` as a referral edge, treating
    /// distrust in the advisor as belief in the opposite of its advice.
    ///
    /// `b = bA·bB + dA·dB`, `d = bA·dB + dA·bB`, `u = uA + (bA + dA)·uB`,
    /// `a = aB`.
    ///
    /// # Errors
    /// See [`SubjectiveOpinion::cumulative_fusion`].
    pub fn opposite_belief_discount(&self, opinion: &Self) -> Result<Self, CoreError> {
        settle(
            self.belief * opinion.belief + self.disbelief * opinion.disbelief,
            self.belief * opinion.disbelief + self.disbelief * opinion.belief,
            self.uncertainty + (self.belief + self.disbelief) * opinion.uncertainty,
            opinion.base_rate,
        )
    }

    /// Propagates `opinion` through `self`, scaling its evidence by the
    /// projected probability of the referral edge.
    ///
    /// # Errors
    /// See [`SubjectiveOpinion::cumulative_fusion`].
    pub fn probability_sensitive_discount(&self, opinion: &Self) -> Result<Self, CoreError> {
        let p = self.projected_probability();
        settle(
            p * opinion.belief,
            p * opinion.disbelief,
            1.0 - p * (opinion.belief + opinion.disbelief),
            opinion.base_rate,
        )
    }
}

impl Default for SubjectiveOpinion {
    fn default() -> Self {
        Self::FULL_UNCERTAINTY
    }
}

impl PartialEq for SubjectiveOpinion {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other)
    }
}

impl fmt::Display for SubjectiveOpinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(b={:.4}, d={:.4}, u={:.4}, a={:.4})",
            self.belief, self.disbelief, self.uncertainty, self.base_rate
        )
    }
}

fn validate(belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64) -> Result<(), CoreError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    let components_ok = [belief, disbelief, uncertainty, base_rate].into_iter().all(in_unit);
    if !components_ok || ((belief + disbelief + uncertainty) - 1.0).abs() > PRECISION {
        return Err(CoreError::InvalidOpinion { belief, disbelief, uncertainty, base_rate });
    }
    Ok(())
}

/// Clamps operator output into range and removes floating-point drift in the sum.
fn settle(belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64) -> Result<SubjectiveOpinion, CoreError> {
    let invalid = || CoreError::InvalidOpinion { belief, disbelief, uncertainty, base_rate };
    if ![belief, disbelief, uncertainty, base_rate].iter().all(|v| v.is_finite()) {
        return Err(invalid());
    }
    let (b, d, u) = (belief.clamp(0.0, 1.0), disbelief.clamp(0.0, 1.0), uncertainty.clamp(0.0, 1.0));
    let sum = b + d + u;
    if sum <= 0.0 {
        return Err(invalid());
    }
    SubjectiveOpinion::new(b / sum, d / sum, u / sum, base_rate.clamp(0.0, 1.0))
}
