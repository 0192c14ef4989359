use serde::Deserialize;
use tracing::warn;

use crate::color::{Color, Palette, Ramp};
use crate::values::AreaCode;

/// Closed numeric range a scale is calibrated against. Always `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "[f64; 2]")]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Domain {
    /// Fallback used when a configured fallback is itself unusable.
    pub const UNIT: Domain = Domain { min: 0.0, max: 1.0 };

    /// Orders the endpoints.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_degenerate(&self) -> bool {
        self.span() == 0.0
    }

    /// Where `value` sits between `min` (0) and `max` (1), unclamped. Stays
    /// finite when the span itself overflows.
    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.span();
        if span.is_finite() {
            return (value - self.min) / span;
        }
        let scale = self.min.abs().max(self.max.abs());
        (value / scale - self.min / scale) / (self.max / scale - self.min / scale)
    }
}

impl TryFrom<[f64; 2]> for Domain {
    type Error = String;

    fn try_from([a, b]: [f64; 2]) -> Result<Self, Self::Error> {
        if a.is_finite() && b.is_finite() {
            Ok(Domain::new(a, b))
        } else {
            Err(format!("domain bounds must be finite, got [{a}, {b}]"))
        }
    }
}

/// How the observed values become a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainPolicy {
    /// `[min(values), max(values)]`.
    #[default]
    Observed,
    /// `[min(0, min(values)), max(0, max(values))]`, for counts.
    ZeroBased,
}

/// Continuous value → colour mapping derived from one snapshot of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueScale {
    domain: Domain,
    ramp: Ramp,
    reversed: bool,
    fallback: bool,
}

impl ValueScale {
    /// Derive a scale from `values`. Non-finite values are ignored; if nothing
    /// is left the `fallback` domain is used instead.
    pub fn from_values(
        values: impl IntoIterator<Item = f64>,
        ramp: Ramp,
        policy: DomainPolicy,
        fallback: Domain,
    ) -> Self {
        let observed = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<Domain>, v| {
                Some(match acc {
                    Some(d) => Domain::new(d.min.min(v), d.max.max(v)),
                    None => Domain::new(v, v),
                })
            });

        let (domain, fallback) = match observed {
            Some(d) => {
                let d = match policy {
                    DomainPolicy::Observed => d,
                    DomainPolicy::ZeroBased => Domain::new(d.min.min(0.0), d.max.max(0.0)),
                };
                (d, false)
            }
            None if fallback.span() > 0.0 && fallback.span().is_finite() => (fallback, true),
            None => {
                warn!(min = fallback.min, max = fallback.max, "unusable fallback domain, using [0, 1]");
                (Domain::UNIT, true)
            }
        };

        Self {
            domain,
            ramp,
            reversed: false,
            fallback,
        }
    }

    /// Run the ramp from high to low instead.
    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn min(&self) -> f64 {
        self.domain.min
    }

    pub fn max(&self) -> f64 {
        self.domain.max
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn ramp(&self) -> Ramp {
        self.ramp
    }

    /// Whether the domain came from the fallback rather than observations.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Normalised position of `value` in the domain, clamped to `[0, 1]`.
    /// A zero-width domain and a non-finite value both sit at `0.5`.
    pub fn position(&self, value: f64) -> f64 {
        if self.domain.is_degenerate() || !value.is_finite() {
            return 0.5;
        }
        self.domain.fraction(value).clamp(0.0, 1.0)
    }

    /// Colour at normalised position `t`, honouring reversal.
    pub fn color_at(&self, t: f64) -> Color {
        let t = if self.reversed { 1.0 - t } else { t };
        self.ramp.at(t)
    }

    pub fn color_of(&self, value: f64) -> Color {
        self.color_at(self.position(value))
    }
}

/// Category → palette slot mapping.
///
/// Codes listed in the domain get consecutive slots in listing order. Codes
/// outside it fall back to a stable FNV-1a hash of the code text, so the same
/// code always receives the same colour across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct OrdinalScale {
    palette: Palette,
    domain: Vec<AreaCode>,
}

impl OrdinalScale {
    pub fn new(palette: Palette) -> Self {
        Self {
            palette,
            domain: Vec::new(),
        }
    }

    /// Register codes in order of first appearance; repeats are ignored.
    pub fn with_domain<'a>(mut self, codes: impl IntoIterator<Item = &'a AreaCode>) -> Self {
        for code in codes {
            if !self.domain.contains(code) {
                self.domain.push(code.clone());
            }
        }
        self
    }

    pub fn domain(&self) -> &[AreaCode] {
        &self.domain
    }

    pub fn color_of(&self, code: &AreaCode) -> Color {
        let slot = match self.domain.iter().position(|c| c == code) {
            Some(i) => i,
            None => fnv1a(code.as_str().as_bytes()) as usize,
        };
        self.palette.slot(slot)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Positional scale from a domain onto a pixel range, used for legend axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    domain: Domain,
    range: (f64, f64),
}

impl LinearScale {
    pub fn new(domain: Domain, range: (f64, f64)) -> Self {
        Self { domain, range }
    }

    /// A zero-width domain maps everything to the middle of the range.
    pub fn map(&self, value: f64) -> f64 {
        let (r0, r1) = self.range;
        let t = if self.domain.is_degenerate() {
            0.5
        } else {
            self.domain.fraction(value)
        };
        r0 + (r1 - r0) * t
    }

    /// Round tick values (multiples of 1, 2 or 5 × 10ⁿ) inside the domain,
    /// at most `max_count` of them.
    pub fn ticks(&self, max_count: usize) -> Vec<f64> {
        if max_count == 0 {
            return Vec::new();
        }
        let Domain { min, max } = self.domain;
        if !(min.is_finite() && max.is_finite()) {
            return Vec::new();
        }
        if min == max {
            return vec![min];
        }
        let mut count = max_count;
        loop {
            let ticks = nice_ticks(min, max, count as f64);
            if ticks.len() <= max_count || count == 1 {
                return ticks.into_iter().take(max_count).collect();
            }
            count -= 1;
        }
    }

    /// Format tick values with just enough decimals for their spacing.
    pub fn tick_labels(ticks: &[f64]) -> Vec<String> {
        let decimals = match ticks {
            [a, b, ..] => decimals_for_step((b - a).abs()),
            [v] if v.fract() != 0.0 => 2,
            _ => 0,
        };
        ticks.iter().map(|v| format!("{:.*}", decimals, v)).collect()
    }
}

fn decimals_for_step(step: f64) -> usize {
    if step <= 0.0 || !step.is_finite() {
        return 0;
    }
    (-step.log10().floor()).max(0.0) as usize
}

/// Tick increment for `count` intervals over `[start, stop]`, as in the
/// classic 1-2-5 nice-number scheme. Negative increments denote the inverse
/// step (`1 / -inc`) to avoid floating point error for small steps.
fn tick_spec(start: f64, stop: f64, count: f64) -> (f64, f64, f64) {
    let step = (stop - start) / count.max(0.0);
    let power = step.log10().floor();
    let error = step / 10f64.powf(power);
    let factor = if error >= 50f64.sqrt() {
        10.0
    } else if error >= 10f64.sqrt() {
        5.0
    } else if error >= 2f64.sqrt() {
        2.0
    } else {
        1.0
    };

    let (mut i1, mut i2, inc);
    if power < 0.0 {
        let inv = 10f64.powf(-power) / factor;
        i1 = (start * inv).round();
        i2 = (stop * inv).round();
        if i1 / inv < start {
            i1 += 1.0;
        }
        if i2 / inv > stop {
            i2 -= 1.0;
        }
        inc = -inv;
    } else {
        inc = 10f64.powf(power) * factor;
        i1 = (start / inc).round();
        i2 = (stop / inc).round();
        if i1 * inc < start {
            i1 += 1.0;
        }
        if i2 * inc > stop {
            i2 -= 1.0;
        }
    }

    if i2 < i1 && (0.5..2.0).contains(&count) {
        return tick_spec(start, stop, count * 2.0);
    }
    (i1, i2, inc)
}

fn nice_ticks(start: f64, stop: f64, count: f64) -> Vec<f64> {
    let (i1, i2, inc) = tick_spec(start, stop, count);
    if !(i2 >= i1) || inc == 0.0 || !inc.is_finite() {
        return Vec::new();
    }
    let n = (i2 - i1 + 1.0) as usize;
    (0..n)
        .map(|i| {
            let k = i1 + i as f64;
            if inc < 0.0 { k / -inc } else { k * inc }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn observed(values: &[f64]) -> ValueScale {
        ValueScale::from_values(
            values.iter().copied(),
            Ramp::Warm,
            DomainPolicy::Observed,
            Domain::new(25.0, 130.0),
        )
    }

    #[test]
    fn domain_spans_observed_values() {
        let s = observed(&[10.0, 20.0]);
        assert_eq!((s.min(), s.max()), (10.0, 20.0));
        assert_eq!(s.color_of(10.0), Ramp::Warm.at(0.0));
        assert_eq!(s.color_of(20.0), Ramp::Warm.at(1.0));
        assert!(!s.is_fallback());
    }

    #[test]
    fn empty_values_use_fallback_bounds() {
        let s = observed(&[]);
        assert_eq!((s.min(), s.max()), (25.0, 130.0));
        assert!(s.min() < s.max());
        assert!(s.is_fallback());
        assert_eq!(s.color_of(25.0), Ramp::Warm.at(0.0));
    }

    #[test]
    fn unusable_fallback_becomes_unit_domain() {
        let s = ValueScale::from_values(
            std::iter::empty(),
            Ramp::Greens,
            DomainPolicy::Observed,
            Domain::new(3.0, 3.0),
        );
        assert_eq!(s.domain(), Domain::UNIT);
    }

    #[test]
    fn single_valued_domain_uses_midpoint_color() {
        let s = observed(&[15.0, 15.0]);
        assert_eq!((s.min(), s.max()), (15.0, 15.0));
        assert_eq!(s.color_of(15.0), Ramp::Warm.at(0.5));
        assert_eq!(s.color_of(99.0), Ramp::Warm.at(0.5));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let s = observed(&[f64::NAN, 4.0, f64::INFINITY, 8.0]);
        assert_eq!((s.min(), s.max()), (4.0, 8.0));
        let only_nan = observed(&[f64::NAN]);
        assert!(only_nan.is_fallback());
    }

    #[test]
    fn zero_based_policy_anchors_at_zero() {
        let s = ValueScale::from_values(
            [12.0, 40.0],
            Ramp::Greens,
            DomainPolicy::ZeroBased,
            Domain::UNIT,
        );
        assert_eq!((s.min(), s.max()), (0.0, 40.0));
    }

    #[test]
    fn reversal_swaps_ramp_ends() {
        let s = observed(&[0.0, 10.0]).reversed(true);
        assert_eq!(s.color_of(0.0), Ramp::Warm.at(1.0));
        assert_eq!(s.color_of(10.0), Ramp::Warm.at(0.0));
    }

    #[test]
    fn out_of_domain_values_clamp() {
        let s = observed(&[0.0, 10.0]);
        assert_eq!(s.position(-5.0), 0.0);
        assert_eq!(s.position(50.0), 1.0);
        assert_eq!(s.position(f64::NAN), 0.5);
    }

    #[test]
    fn overflowing_span_keeps_positions_finite() {
        let s = observed(&[-1e308, 1e308]);
        assert!(s.domain().span().is_infinite());
        assert_eq!(s.position(-1e308), 0.0);
        assert_eq!(s.position(0.0), 0.5);
        assert_eq!(s.position(1e308), 1.0);
        assert_eq!(s.color_of(1e308), Ramp::Warm.at(1.0));
    }

    #[test]
    fn ordinal_scale_assigns_slots_in_order() {
        let codes: Vec<AreaCode> = ["3", "1", "3", "2"].into_iter().map(AreaCode::new).collect();
        let s = OrdinalScale::new(Palette::Tableau10).with_domain(&codes);
        assert_eq!(s.domain().len(), 3);
        assert_eq!(s.color_of(&AreaCode::new("3")), Palette::Tableau10.slot(0));
        assert_eq!(s.color_of(&AreaCode::new("1")), Palette::Tableau10.slot(1));
        assert_eq!(s.color_of(&AreaCode::new("2")), Palette::Tableau10.slot(2));
    }

    #[test]
    fn ordinal_scale_unknown_codes_are_stable() {
        let s = OrdinalScale::new(Palette::Tableau10);
        let a = s.color_of(&AreaCode::new("Vaugirard"));
        let b = s.color_of(&AreaCode::new("Vaugirard"));
        assert_eq!(a, b);
    }

    #[test]
    fn ticks_are_round_and_bounded() {
        let axis = LinearScale::new(Domain::new(0.0, 10.0), (0.0, 400.0));
        let ticks = axis.ticks(5);
        assert!(ticks.len() <= 5);
        assert_eq!(ticks, vec![0.0, 5.0, 10.0]);

        let axis = LinearScale::new(Domain::new(25.0, 130.0), (0.0, 400.0));
        assert_eq!(axis.ticks(5), vec![40.0, 60.0, 80.0, 100.0, 120.0]);

        let axis = LinearScale::new(Domain::new(0.0, 1.0), (0.0, 400.0));
        // 0.2 spacing would need six ticks, so the axis coarsens to 0.5.
        assert_eq!(axis.ticks(5), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn tick_labels_follow_step_precision() {
        assert_eq!(LinearScale::tick_labels(&[0.0, 0.5, 1.0]), vec!["0.0", "0.5", "1.0"]);
        assert_eq!(LinearScale::tick_labels(&[40.0, 60.0]), vec!["40", "60"]);
        assert_eq!(LinearScale::tick_labels(&[15.0]), vec!["15"]);
    }

    #[test]
    fn degenerate_axis_has_single_centred_tick() {
        let axis = LinearScale::new(Domain::new(15.0, 15.0), (0.0, 400.0));
        assert_eq!(axis.ticks(5), vec![15.0]);
        assert_eq!(axis.map(15.0), 200.0);
    }

    proptest! {
        #[test]
        fn observed_domain_matches_extremes(values in prop::collection::vec(-1e6f64..1e6, 1..64)) {
            let s = observed(&values);
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert_eq!(s.min(), min);
            prop_assert_eq!(s.max(), max);
            prop_assert!(s.min() <= s.max());
        }

        #[test]
        fn ticks_never_exceed_limit(a in -1e4f64..1e4, b in -1e4f64..1e4, n in 1usize..8) {
            let axis = LinearScale::new(Domain::new(a, b), (0.0, 100.0));
            let ticks = axis.ticks(n);
            prop_assert!(ticks.len() <= n);
            let d = Domain::new(a, b);
            for t in ticks {
                prop_assert!(t >= d.min - 1e-9 && t <= d.max + 1e-9);
            }
        }
    }
}
