use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::catalog::dataset_url;
use crate::color::{Color, Palette, Ramp};
use crate::feature::PropertySchema;
use crate::scale::{Domain, DomainPolicy};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub geometry: GeometryConfig,
    pub surface: SurfaceConfig,
    pub style: StyleConfig,
    /// Model key holding the area observations.
    pub value_key: String,
    pub fill: FillConfig,
    pub legend: Option<LegendConfig>,
    pub tooltip: TooltipConfig,
    pub points: Option<PointsConfig>,
    /// Draw group codes at group centroids.
    pub labels: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            surface: SurfaceConfig::default(),
            style: StyleConfig::default(),
            value_key: "data".to_string(),
            fill: FillConfig::default(),
            legend: None,
            tooltip: TooltipConfig::default(),
            points: None,
            labels: false,
        }
    }
}

impl WidgetConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub url: String,
    #[serde(flatten)]
    pub schema: PropertySchema,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            url: dataset_url("arrondissements"),
            schema: PropertySchema::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Prefix for element ids, unique per page.
    pub id: String,
    pub width: f64,
    pub height: f64,
    pub margin: Margins,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            id: "choropleth".to_string(),
            width: 800.0,
            height: 600.0,
            margin: Margins::uniform(20.0),
        }
    }
}

impl SurfaceConfig {
    /// Size left for the map once margins are removed.
    pub fn available(&self) -> (f64, f64) {
        let m = &self.margin;
        (
            (self.width - m.left - m.right).max(0.0),
            (self.height - m.top - m.bottom).max(0.0),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub const fn new(top: f64, right: f64, bottom: f64, left: f64) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub const fn uniform(m: f64) -> Self {
        Self::new(m, m, m, m)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub background: Option<Color>,
    pub stroke: Color,
    pub stroke_width: f64,
    pub highlight_stroke: Color,
    pub font_family: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            background: None,
            stroke: Color::rgb(0xd1, 0xd1, 0xd1),
            stroke_width: 1.0,
            highlight_stroke: Color::rgb(0x33, 0x33, 0x33),
            font_family: "PT Sans".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FillConfig {
    Sequential(SequentialFill),
    Categorical(CategoricalFill),
}

impl Default for FillConfig {
    fn default() -> Self {
        FillConfig::Sequential(SequentialFill::default())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SequentialFill {
    pub ramp: Ramp,
    pub reversed: bool,
    pub domain: DomainPolicy,
    /// Domain used when the model holds no usable observations.
    pub fallback_domain: Domain,
    pub missing: MissingFill,
}

impl Default for SequentialFill {
    fn default() -> Self {
        Self {
            ramp: Ramp::Greens,
            reversed: false,
            domain: DomainPolicy::Observed,
            fallback_domain: Domain::UNIT,
            missing: MissingFill::default(),
        }
    }
}

/// Fill for an area with no observation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFill {
    /// Colour this stand-in value through the scale.
    Value(f64),
    Color(Color),
}

impl Default for MissingFill {
    fn default() -> Self {
        MissingFill::Color(Color::rgb(0xd9, 0xd9, 0xd9))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct CategoricalFill {
    pub palette: Palette,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegendConfig {
    pub caption: String,
    pub stops: usize,
    pub ticks: usize,
    pub bar_height: f64,
    /// Left edge, as a fraction of the surface width.
    pub x_fraction: f64,
    pub width_fraction: f64,
    /// Distance of the bar's top edge from the bottom of the surface.
    pub bottom_offset: f64,
}

impl Default for LegendConfig {
    fn default() -> Self {
        Self {
            caption: String::new(),
            stops: 11,
            ticks: 5,
            bar_height: 15.0,
            x_fraction: 0.25,
            width_fraction: 0.5,
            bottom_offset: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TooltipConfig {
    /// Supports `{name}`, `{code}`, `{group}` and `{value}`.
    pub template: String,
    pub unavailable: String,
    pub precision: usize,
}

impl Default for TooltipConfig {
    fn default() -> Self {
        Self {
            template: "{name}: {value}".to_string(),
            unavailable: "N/A".to_string(),
            precision: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub key: String,
    pub radius: f64,
    pub ramp: Ramp,
    pub reversed: bool,
    pub fallback_domain: Domain,
    pub stroke: Color,
    pub stroke_width: f64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            key: "points".to_string(),
            radius: 4.0,
            ramp: Ramp::Spectral,
            reversed: true,
            fallback_domain: Domain::new(25.0, 130.0),
            stroke: Color::WHITE,
            stroke_width: 0.5,
        }
    }
}

/// Built-in configurations for the Paris open-data widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Green-space permits per arrondissement, drawn over quartier tiles.
    ArrondissementsPermits,
    /// Maximum altitude per quartier.
    QuartiersAltitude,
    /// Quartiers coloured by their arrondissement.
    QuartiersByArrondissement,
    /// Arrondissement outlines with sampled altitude points.
    AltitudePoints,
}

impl Preset {
    pub fn config(self) -> WidgetConfig {
        let arrondissements = GeometryConfig {
            url: dataset_url("arrondissements"),
            schema: PropertySchema::default(),
        };
        let quartiers = GeometryConfig {
            url: dataset_url("quartier_paris"),
            schema: PropertySchema {
                id_property: "c_qu".to_string(),
                code_property: "l_qu".to_string(),
                name_property: "l_qu".to_string(),
                group_property: Some("c_ar".to_string()),
            },
        };

        match self {
            Preset::ArrondissementsPermits => WidgetConfig {
                // Quartier tiles, each coloured by its arrondissement's count.
                geometry: GeometryConfig {
                    url: dataset_url("quartier_paris"),
                    schema: PropertySchema {
                        id_property: "c_qu".to_string(),
                        code_property: "c_ar".to_string(),
                        name_property: "l_qu".to_string(),
                        group_property: None,
                    },
                },
                surface: SurfaceConfig {
                    id: "green-permits".to_string(),
                    height: 550.0,
                    margin: Margins::new(10.0, 20.0, 90.0, 20.0),
                    ..SurfaceConfig::default()
                },
                value_key: "permission_data".to_string(),
                fill: FillConfig::Sequential(SequentialFill {
                    ramp: Ramp::Greens,
                    domain: DomainPolicy::ZeroBased,
                    fallback_domain: Domain::UNIT,
                    missing: MissingFill::Value(0.0),
                    ..SequentialFill::default()
                }),
                legend: Some(LegendConfig {
                    caption: "Green Permissions Count".to_string(),
                    bottom_offset: 60.0,
                    ..LegendConfig::default()
                }),
                tooltip: TooltipConfig {
                    template: "{name}: {value} permissions".to_string(),
                    ..TooltipConfig::default()
                },
                ..WidgetConfig::default()
            },
            Preset::QuartiersAltitude => WidgetConfig {
                geometry: quartiers,
                surface: SurfaceConfig {
                    id: "altitude".to_string(),
                    height: 700.0,
                    margin: Margins::new(10.0, 25.0, 140.0, 25.0),
                    ..SurfaceConfig::default()
                },
                value_key: "altitude_data".to_string(),
                fill: FillConfig::Sequential(SequentialFill {
                    ramp: Ramp::Warm,
                    domain: DomainPolicy::Observed,
                    fallback_domain: Domain::new(25.0, 130.0),
                    missing: MissingFill::Value(35.0),
                    ..SequentialFill::default()
                }),
                legend: Some(LegendConfig {
                    caption: "Max Altitude (meters)".to_string(),
                    ..LegendConfig::default()
                }),
                tooltip: TooltipConfig {
                    template: "{name}: ~{value}m".to_string(),
                    precision: 1,
                    ..TooltipConfig::default()
                },
                ..WidgetConfig::default()
            },
            Preset::QuartiersByArrondissement => WidgetConfig {
                geometry: quartiers,
                surface: SurfaceConfig {
                    id: "quartiers".to_string(),
                    ..SurfaceConfig::default()
                },
                fill: FillConfig::Categorical(CategoricalFill {
                    palette: Palette::Tableau10,
                }),
                tooltip: TooltipConfig {
                    template: "{name} ({group}e)".to_string(),
                    ..TooltipConfig::default()
                },
                labels: true,
                ..WidgetConfig::default()
            },
            Preset::AltitudePoints => WidgetConfig {
                geometry: arrondissements,
                surface: SurfaceConfig {
                    id: "altitude-points".to_string(),
                    height: 650.0,
                    margin: Margins::new(20.0, 20.0, 100.0, 20.0),
                    ..SurfaceConfig::default()
                },
                style: StyleConfig {
                    stroke_width: 1.5,
                    ..StyleConfig::default()
                },
                value_key: "altitude_data".to_string(),
                fill: FillConfig::Sequential(SequentialFill {
                    missing: MissingFill::Color(Color::rgb(0xfd, 0xfd, 0xfd)),
                    ..SequentialFill::default()
                }),
                tooltip: TooltipConfig {
                    template: "{name}".to_string(),
                    ..TooltipConfig::default()
                },
                points: Some(PointsConfig::default()),
                ..WidgetConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: WidgetConfig = toml::from_str("").unwrap();
        assert_eq!(config.value_key, "data");
        assert_eq!(config.surface.width, 800.0);
        assert!(config.legend.is_none());
        assert_eq!(config.fill, FillConfig::default());
    }

    #[test]
    fn parses_a_full_config() {
        let config: WidgetConfig = toml::from_str(
            r##"
            value_key = "altitude_data"
            labels = true

            [geometry]
            url = "https://example.org/quartiers.geojson"
            id_property = "c_qu"
            code_property = "l_qu"
            name_property = "l_qu"
            group_property = "c_ar"

            [surface]
            width = 640
            height = 480
            margin = { top = 5, right = 5, bottom = 60, left = 5 }

            [fill]
            mode = "sequential"
            ramp = "warm"
            domain = "observed"
            fallback_domain = [25, 130]
            missing = { value = 35 }

            [legend]
            caption = "Max Altitude (meters)"
            stops = 11

            [tooltip]
            template = "{name}: ~{value}m"
            precision = 1
            "##,
        )
        .unwrap();

        assert_eq!(config.geometry.schema.group_property.as_deref(), Some("c_ar"));
        assert_eq!(config.surface.available(), (630.0, 415.0));
        let FillConfig::Sequential(fill) = &config.fill else {
            panic!("expected sequential fill");
        };
        assert_eq!(fill.ramp, Ramp::Warm);
        assert_eq!(fill.fallback_domain, Domain::new(25.0, 130.0));
        assert_eq!(fill.missing, MissingFill::Value(35.0));
        assert_eq!(config.legend.unwrap().ticks, 5);
    }

    #[test]
    fn categorical_fill_and_missing_color_parse() {
        let config: WidgetConfig = toml::from_str(
            r##"
            [fill]
            mode = "categorical"
            palette = "category10"
            "##,
        )
        .unwrap();
        assert_eq!(
            config.fill,
            FillConfig::Categorical(CategoricalFill {
                palette: Palette::Category10
            })
        );

        let config: WidgetConfig = toml::from_str(
            r##"
            [fill]
            mode = "sequential"
            missing = { color = "#cccccc" }
            "##,
        )
        .unwrap();
        let FillConfig::Sequential(fill) = config.fill else {
            panic!("expected sequential fill");
        };
        assert_eq!(fill.missing, MissingFill::Color(Color::rgb(204, 204, 204)));
    }

    #[test]
    fn reversed_fallback_domain_is_reordered() {
        let config: WidgetConfig = toml::from_str(
            r##"
            [fill]
            mode = "sequential"
            fallback_domain = [130, 25]
            "##,
        )
        .unwrap();
        let FillConfig::Sequential(fill) = config.fill else {
            panic!("expected sequential fill");
        };
        assert_eq!(fill.fallback_domain, Domain::new(25.0, 130.0));
    }

    #[test]
    fn presets_have_consistent_surfaces() {
        for preset in [
            Preset::ArrondissementsPermits,
            Preset::QuartiersAltitude,
            Preset::QuartiersByArrondissement,
            Preset::AltitudePoints,
        ] {
            let config = preset.config();
            let (w, h) = config.surface.available();
            assert!(w > 0.0 && h > 0.0, "{preset:?}");
            assert!(config.geometry.url.starts_with("https://"));
        }
        assert!(Preset::QuartiersAltitude.config().legend.is_some());
        assert!(Preset::AltitudePoints.config().points.is_some());
    }

    #[test]
    fn permit_preset_colours_quartiers_by_arrondissement() {
        let geometry = Preset::ArrondissementsPermits.config().geometry;
        assert!(geometry.url.contains("quartier_paris"));
        assert_eq!(geometry.schema.id_property, "c_qu");
        assert_eq!(geometry.schema.code_property, "c_ar");
        assert_eq!(geometry.schema.name_property, "l_qu");
    }
}
