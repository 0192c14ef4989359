use crate::color::Color;
use crate::config::LegendConfig;
use crate::scale::{LinearScale, ValueScale};

#[derive(Debug, Clone, PartialEq)]
pub struct GradientStop {
    /// Position along the bar in `[0, 1]`.
    pub offset: f64,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub value: f64,
    /// Pixel offset from the bar's left edge.
    pub position: f64,
    pub label: String,
}

/// A complete colour legend: gradient bar, tick axis and caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Legend {
    pub stops: Vec<GradientStop>,
    pub ticks: Vec<Tick>,
    pub caption: String,
    pub width: f64,
    pub bar_height: f64,
}

#[derive(Debug, Clone)]
pub struct LegendBuilder {
    config: LegendConfig,
}

impl LegendBuilder {
    pub fn new(config: LegendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LegendConfig {
        &self.config
    }

    /// Build a fresh legend for `scale`, `pixel_width` wide.
    ///
    /// Stops are sampled evenly from offset 0 to 1 inclusive through the
    /// scale's own colouring, so a reversed scale gets a reversed bar.
    pub fn build(&self, scale: &ValueScale, pixel_width: f64) -> Legend {
        let n = self.config.stops.max(2);
        let stops = (0..n)
            .map(|i| {
                let offset = i as f64 / (n - 1) as f64;
                GradientStop {
                    offset,
                    color: scale.color_at(offset),
                }
            })
            .collect();

        let axis = LinearScale::new(scale.domain(), (0.0, pixel_width));
        let values = axis.ticks(self.config.ticks);
        let labels = LinearScale::tick_labels(&values);
        let ticks = values
            .into_iter()
            .zip(labels)
            .map(|(value, label)| Tick {
                value,
                position: axis.map(value),
                label,
            })
            .collect();

        Legend {
            stops,
            ticks,
            caption: self.config.caption.clone(),
            width: pixel_width,
            bar_height: self.config.bar_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Ramp;
    use crate::scale::{Domain, DomainPolicy};

    fn builder() -> LegendBuilder {
        LegendBuilder::new(LegendConfig {
            caption: "Max Altitude (meters)".to_string(),
            ..LegendConfig::default()
        })
    }

    fn scale(values: &[f64]) -> ValueScale {
        ValueScale::from_values(
            values.iter().copied(),
            Ramp::Warm,
            DomainPolicy::Observed,
            Domain::new(25.0, 130.0),
        )
    }

    #[test]
    fn eleven_stops_span_zero_to_one() {
        let legend = builder().build(&scale(&[30.0, 120.0]), 400.0);
        assert_eq!(legend.stops.len(), 11);
        assert_eq!(legend.stops.first().unwrap().offset, 0.0);
        assert_eq!(legend.stops.last().unwrap().offset, 1.0);
        assert!(legend.stops.windows(2).all(|w| w[0].offset <= w[1].offset));
        assert_eq!(legend.stops[0].color, Ramp::Warm.at(0.0));
        assert_eq!(legend.stops[10].color, Ramp::Warm.at(1.0));
    }

    #[test]
    fn ticks_lie_on_the_bar() {
        let legend = builder().build(&scale(&[25.0, 130.0]), 400.0);
        assert!(!legend.ticks.is_empty() && legend.ticks.len() <= 5);
        for tick in &legend.ticks {
            assert!(tick.position >= 0.0 && tick.position <= 400.0);
        }
        assert_eq!(legend.ticks[0].label, "40");
        assert_eq!(legend.caption, "Max Altitude (meters)");
    }

    #[test]
    fn degenerate_domain_has_one_centred_tick() {
        let legend = builder().build(&scale(&[15.0, 15.0]), 400.0);
        assert_eq!(legend.ticks.len(), 1);
        assert_eq!(legend.ticks[0].position, 200.0);
        assert_eq!(legend.ticks[0].label, "15");
    }

    #[test]
    fn reversed_scale_reverses_the_bar() {
        let legend = builder().build(&scale(&[0.0, 1.0]).reversed(true), 100.0);
        assert_eq!(legend.stops[0].color, Ramp::Warm.at(1.0));
    }

    #[test]
    fn rebuilding_tracks_the_new_domain() {
        let b = builder();
        let first = b.build(&scale(&[0.0, 10.0]), 400.0);
        let second = b.build(&scale(&[0.0, 1000.0]), 400.0);
        assert_ne!(first.ticks, second.ticks);
        assert_eq!(first.stops.len(), second.stops.len());
    }
}
