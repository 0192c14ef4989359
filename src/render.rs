use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Point};
use rayon::prelude::*;
use rstar::{AABB, RTree, RTreeObject};
use tracing::{debug, warn};

use crate::color::Color;
use crate::config::{MissingFill, PointsConfig, TooltipConfig};
use crate::feature::{AreaFeature, FeatureId};
use crate::projection::Projection;
use crate::scale::{DomainPolicy, OrdinalScale, ValueScale};
use crate::surface::{Circle, JoinStats, Shape, Surface};
use crate::values::{PointSample, ValueMap};

/// Per-feature fill and tooltip for one render pass.
pub trait FeatureStyle: Sync {
    /// Always yields a colour; a feature without data gets a fallback.
    fn fill(&self, feature: &AreaFeature) -> Color;
    fn title(&self, feature: &AreaFeature) -> String;
}

/// Fill through a [`ValueScale`] from the current observations.
pub struct SequentialStyle<'a> {
    pub scale: &'a ValueScale,
    pub values: &'a ValueMap,
    pub missing: MissingFill,
    pub tooltip: &'a TooltipConfig,
}

impl FeatureStyle for SequentialStyle<'_> {
    fn fill(&self, feature: &AreaFeature) -> Color {
        match (self.values.get(&feature.code), self.missing) {
            (Some(v), _) => self.scale.color_of(v),
            (None, MissingFill::Value(v)) => self.scale.color_of(v),
            (None, MissingFill::Color(c)) => c,
        }
    }

    fn title(&self, feature: &AreaFeature) -> String {
        format_tooltip(self.tooltip, feature, self.values.get(&feature.code))
    }
}

/// Fill by category: the feature's group code, or its own code when ungrouped.
pub struct CategoricalStyle<'a> {
    pub scale: &'a OrdinalScale,
    pub values: &'a ValueMap,
    pub tooltip: &'a TooltipConfig,
}

impl FeatureStyle for CategoricalStyle<'_> {
    fn fill(&self, feature: &AreaFeature) -> Color {
        self.scale
            .color_of(feature.group.as_ref().unwrap_or(&feature.code))
    }

    fn title(&self, feature: &AreaFeature) -> String {
        format_tooltip(self.tooltip, feature, self.values.get(&feature.code))
    }
}

/// Expand `{name}`, `{code}`, `{group}` and `{value}`. A missing value is shown
/// as the configured unavailable marker, never as a fallback number.
pub fn format_tooltip(config: &TooltipConfig, feature: &AreaFeature, value: Option<f64>) -> String {
    let value = value.map_or_else(
        || config.unavailable.clone(),
        |v| format!("{:.*}", config.precision, v),
    );
    let group = feature
        .group
        .as_ref()
        .map_or_else(String::new, |g| g.to_string());
    config
        .template
        .replace("{name}", &feature.name)
        .replace("{code}", feature.code.as_str())
        .replace("{group}", &group)
        .replace("{value}", &value)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub join: JoinStats,
    /// Features left undrawn because their geometry could not be projected.
    pub failed: usize,
}

struct Prepared {
    id: FeatureId,
    d: String,
    fill: Color,
    title: String,
}

/// Binds features to area shapes on a [`Surface`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ChoroplethRenderer;

impl ChoroplethRenderer {
    /// Reconcile the surface's shapes with `features`: one shape per feature,
    /// keyed by feature id, none for features that are gone. Safe to call any
    /// number of times; a failing feature never stops the others.
    pub fn render(
        &self,
        surface: &mut Surface,
        features: &[AreaFeature],
        projection: &Projection,
        style: &dyn FeatureStyle,
    ) -> RenderStats {
        let results: Vec<_> = features
            .par_iter()
            .map(|f| {
                projection.path(&f.geometry).map(|d| Prepared {
                    id: f.id.clone(),
                    d,
                    fill: style.fill(f),
                    title: style.title(f),
                })
            })
            .collect();

        let mut failed = 0;
        let prepared: Vec<Prepared> = results
            .into_iter()
            .zip(features)
            .filter_map(|(result, f)| match result {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(feature = %f.id, error = %e, "cannot project feature");
                    failed += 1;
                    None
                }
            })
            .collect();

        let (shapes, ids) = surface.shapes_mut();
        let join = shapes.join(
            prepared,
            |p| p.id.clone(),
            |p| Shape {
                node: ids.next(),
                feature: p.id,
                d: p.d,
                fill: p.fill,
                title: p.title,
                highlighted: false,
            },
            |shape, p| {
                shape.d = p.d;
                shape.fill = p.fill;
                shape.title = p.title;
            },
        );
        debug!(
            entered = join.entered,
            updated = join.updated,
            exited = join.exited,
            failed,
            "areas reconciled"
        );

        RenderStats { join, failed }
    }
}

/// Draws point samples as circles, keyed by sample index.
#[derive(Debug, Clone)]
pub struct PointRenderer {
    config: PointsConfig,
}

impl PointRenderer {
    pub fn new(config: PointsConfig) -> Self {
        Self { config }
    }

    pub fn scale_for(&self, samples: &[PointSample]) -> ValueScale {
        ValueScale::from_values(
            samples.iter().map(|s| s.alt),
            self.config.ramp,
            DomainPolicy::Observed,
            self.config.fallback_domain,
        )
        .reversed(self.config.reversed)
    }

    pub fn render(
        &self,
        surface: &mut Surface,
        samples: &[PointSample],
        projection: &Projection,
        scale: &ValueScale,
    ) -> JoinStats {
        let located: Vec<(usize, Coord<f64>, f64)> = samples
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                projection
                    .try_project(Coord { x: s.lon, y: s.lat })
                    .ok()
                    .map(|p| (i, p, s.alt))
            })
            .collect();

        let config = &self.config;
        let paint = |alt: f64| (scale.color_of(alt), format!("Altitude: {:.1}m", alt));
        let (points, ids) = surface.points_mut();
        points.join(
            located,
            |d| d.0,
            |(_, p, alt)| {
                let (fill, title) = paint(alt);
                Circle {
                    node: ids.next(),
                    cx: p.x,
                    cy: p.y,
                    r: config.radius,
                    fill,
                    stroke: config.stroke,
                    stroke_width: config.stroke_width,
                    title,
                }
            },
            |c, (_, p, alt)| {
                (c.fill, c.title) = paint(alt);
                c.cx = p.x;
                c.cy = p.y;
            },
        )
    }
}

struct HitEntry {
    envelope: AABB<[f64; 2]>,
    order: usize,
    id: FeatureId,
    geometry: MultiPolygon<f64>,
}

impl RTreeObject for HitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over projected feature geometry, for pointer hit-testing.
pub struct HitIndex {
    tree: RTree<HitEntry>,
}

impl HitIndex {
    pub fn build(features: &[AreaFeature], projection: &Projection) -> Self {
        let entries: Vec<HitEntry> = features
            .par_iter()
            .enumerate()
            .filter_map(|(order, f)| {
                let geometry = projection.project_geometry(&f.geometry).ok()?;
                let rect = geometry.bounding_rect()?;
                Some(HitEntry {
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    order,
                    id: f.id.clone(),
                    geometry,
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Feature under map-space point `(x, y)`. On shared borders the feature
    /// listed first in the collection wins.
    pub fn hit(&self, x: f64, y: f64) -> Option<&FeatureId> {
        let point = Point::new(x, y);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter(|e| e.geometry.intersects(&point))
            .min_by_key(|e| e.order)
            .map(|e| &e.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Palette, Ramp};
    use crate::config::{StyleConfig, SurfaceConfig};
    use crate::feature::tests::square;
    use crate::scale::Domain;
    use crate::values::AreaCode;
    use proptest::prelude::*;

    fn surface() -> Surface {
        Surface::new(&SurfaceConfig::default(), StyleConfig::default())
    }

    fn features(ids: &[&str]) -> Vec<AreaFeature> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| square(id, &format!("Area {id}"), 2.25 + 0.02 * i as f64, 48.85, 0.015))
            .collect()
    }

    fn values(pairs: &[(&str, f64)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (AreaCode::new(k), *v)).collect()
    }

    fn scale(values: &ValueMap) -> ValueScale {
        ValueScale::from_values(values.values(), Ramp::Greens, DomainPolicy::Observed, Domain::UNIT)
    }

    fn render(surface: &mut Surface, features: &[AreaFeature], values: &ValueMap) -> RenderStats {
        let projection = Projection::fit(features.iter().map(|f| &f.geometry), 760.0, 560.0);
        let scale = scale(values);
        let tooltip = TooltipConfig::default();
        let style = SequentialStyle {
            scale: &scale,
            values,
            missing: MissingFill::Value(0.0),
            tooltip: &tooltip,
        };
        ChoroplethRenderer.render(surface, features, &projection, &style)
    }

    fn fills(surface: &Surface) -> Vec<(String, Color)> {
        surface
            .shapes()
            .iter()
            .map(|(k, s)| (k.to_string(), s.fill))
            .collect()
    }

    #[test]
    fn two_features_take_the_ramp_ends() {
        let mut s = surface();
        let fc = features(&["1", "2"]);
        render(&mut s, &fc, &values(&[("1", 10.0), ("2", 20.0)]));
        assert_eq!(
            fills(&s),
            vec![("1".into(), Ramp::Greens.at(0.0)), ("2".into(), Ramp::Greens.at(1.0))]
        );

        let stats = render(&mut s, &fc, &values(&[("1", 15.0), ("2", 15.0)]));
        assert_eq!(stats.join.updated, 2);
        assert_eq!(stats.join.entered, 0);
        assert_eq!(s.shapes().len(), 2);
        assert!(fills(&s).iter().all(|(_, c)| *c == Ramp::Greens.at(0.5)));
    }

    #[test]
    fn missing_value_still_gets_a_shape() {
        let mut s = surface();
        let fc = features(&["1", "2"]);
        let vals = values(&[("1", 10.0)]);
        render(&mut s, &fc, &vals);
        assert_eq!(s.shapes().len(), 2);
        let two = s.shapes().get(&FeatureId::new("2")).unwrap();
        // Fallback value 0 under the single-valued domain [10, 10].
        assert_eq!(two.fill, Ramp::Greens.at(0.5));
        assert_eq!(two.title, "Area 2: N/A");
        let one = s.shapes().get(&FeatureId::new("1")).unwrap();
        assert_eq!(one.title, "Area 1: 10");
    }

    #[test]
    fn missing_color_policy_uses_fixed_color() {
        let fc = features(&["1"]);
        let vals = ValueMap::new();
        let scale = scale(&vals);
        let tooltip = TooltipConfig::default();
        let grey = Color::rgb(0xcc, 0xcc, 0xcc);
        let style = SequentialStyle {
            scale: &scale,
            values: &vals,
            missing: MissingFill::Color(grey),
            tooltip: &tooltip,
        };
        assert_eq!(style.fill(&fc[0]), grey);
    }

    #[test]
    fn rendering_twice_is_idempotent() {
        let mut s = surface();
        let fc = features(&["1", "2", "3"]);
        let vals = values(&[("1", 1.0), ("2", 5.0), ("3", 9.0)]);
        render(&mut s, &fc, &vals);
        let first = fills(&s);
        let nodes: Vec<_> = s.shapes().iter().map(|(_, sh)| sh.node).collect();
        render(&mut s, &fc, &vals);
        assert_eq!(fills(&s), first);
        let again: Vec<_> = s.shapes().iter().map(|(_, sh)| sh.node).collect();
        assert_eq!(nodes, again, "updates must not recreate shapes");
    }

    #[test]
    fn shrinking_and_growing_collections_reconcile() {
        let mut s = surface();
        render(&mut s, &features(&["1", "2", "3"]), &ValueMap::new());
        let stats = render(&mut s, &features(&["2"]), &ValueMap::new());
        assert_eq!(stats.join.exited, 2);
        assert_eq!(s.shapes().keys().map(|k| k.as_str()).collect::<Vec<_>>(), vec!["2"]);

        let stats = render(&mut s, &features(&["2", "4", "5"]), &ValueMap::new());
        assert_eq!(stats.join.entered, 2);
        assert_eq!(stats.join.updated, 1);
        assert_eq!(s.shapes().len(), 3);
    }

    #[test]
    fn unprojectable_feature_is_isolated() {
        let mut s = surface();
        let mut fc = features(&["1", "2", "3"]);
        let projection = Projection::fit(fc.iter().map(|f| &f.geometry), 760.0, 560.0);
        fc[1].geometry = geo::MapCoords::map_coords(&fc[1].geometry, |c| Coord { x: f64::NAN, y: c.y });

        let vals = ValueMap::new();
        let scale = scale(&vals);
        let tooltip = TooltipConfig::default();
        let style = SequentialStyle {
            scale: &scale,
            values: &vals,
            missing: MissingFill::Value(0.0),
            tooltip: &tooltip,
        };
        let stats = ChoroplethRenderer.render(&mut s, &fc, &projection, &style);
        assert_eq!(stats.failed, 1);
        assert_eq!(s.shapes().len(), 2);
        assert!(s.shapes().get(&FeatureId::new("2")).is_none());
    }

    #[test]
    fn categorical_style_colours_by_group() {
        let mut fc = features(&["1", "2", "3"]);
        fc[0].group = Some(AreaCode::new("7"));
        fc[1].group = Some(AreaCode::new("8"));
        fc[2].group = Some(AreaCode::new("7"));
        let scale = OrdinalScale::new(Palette::Tableau10)
            .with_domain(fc.iter().filter_map(|f| f.group.as_ref()));
        let tooltip = TooltipConfig {
            template: "{name} ({group}e)".to_string(),
            ..TooltipConfig::default()
        };
        let vals = ValueMap::new();
        let style = CategoricalStyle { scale: &scale, values: &vals, tooltip: &tooltip };
        assert_eq!(style.fill(&fc[0]), Palette::Tableau10.slot(0));
        assert_eq!(style.fill(&fc[1]), Palette::Tableau10.slot(1));
        assert_eq!(style.fill(&fc[2]), style.fill(&fc[0]));
        assert_eq!(style.title(&fc[1]), "Area 2 (8e)");
    }

    #[test]
    fn points_reconcile_by_index() {
        let mut s = surface();
        let fc = features(&["1"]);
        let projection = Projection::fit(fc.iter().map(|f| &f.geometry), 760.0, 560.0);
        let renderer = PointRenderer::new(PointsConfig::default());
        let samples = vec![
            PointSample { lon: 2.255, lat: 48.855, alt: 30.0 },
            PointSample { lon: 2.26, lat: 48.86, alt: 120.0 },
        ];
        let scale = renderer.scale_for(&samples);
        let stats = renderer.render(&mut s, &samples, &projection, &scale);
        assert_eq!(stats.entered, 2);
        // Reversed spectral: the highest sample takes the start of the ramp.
        assert_eq!(s.points().get(&1).unwrap().fill, Ramp::Spectral.at(0.0));
        assert_eq!(s.points().get(&0).unwrap().title, "Altitude: 30.0m");

        let stats = renderer.render(&mut s, &samples[..1], &projection, &scale);
        assert_eq!(stats.exited, 1);
        assert_eq!(s.points().len(), 1);
    }

    #[test]
    fn hit_index_finds_the_feature_under_the_pointer() {
        let fc = features(&["1", "2"]);
        let projection = Projection::fit(fc.iter().map(|f| &f.geometry), 760.0, 560.0);
        let index = HitIndex::build(&fc, &projection);
        assert_eq!(index.len(), 2);

        let inside = projection.project(Coord { x: 2.2575, y: 48.8575 });
        assert_eq!(index.hit(inside.x, inside.y), Some(&FeatureId::new("1")));
        let second = projection.project(Coord { x: 2.2775, y: 48.8575 });
        assert_eq!(index.hit(second.x, second.y), Some(&FeatureId::new("2")));
        // The gap between the squares.
        let gap = projection.project(Coord { x: 2.2675, y: 48.8575 });
        assert_eq!(index.hit(gap.x, gap.y), None);
    }

    proptest! {
        #[test]
        fn shape_set_mirrors_the_latest_collection(
            passes in prop::collection::vec(prop::collection::btree_set(0u8..12, 0..12), 1..6)
        ) {
            let mut s = surface();
            for ids in passes {
                let ids: Vec<String> = ids.into_iter().map(|i| i.to_string()).collect();
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                let fc = features(&refs);
                render(&mut s, &fc, &ValueMap::new());
                prop_assert_eq!(s.shapes().len(), fc.len());
                let keys: Vec<&str> = s.shapes().keys().map(|k| k.as_str()).collect();
                prop_assert_eq!(keys, refs);
            }
        }
    }
}
