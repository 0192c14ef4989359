use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Result, bail};
use geo::{MultiPolygon, Polygon};
use tracing::{debug, info, warn};

use crate::binder::{ReactiveBinder, Trigger};
use crate::config::{FillConfig, SequentialFill, WidgetConfig};
use crate::feature::{AreaFeature, FeatureCollection, FeatureId};
use crate::legend::LegendBuilder;
use crate::model::ReactiveModel;
use crate::projection::Projection;
use crate::render::{
    CategoricalStyle, ChoroplethRenderer, HitIndex, PointRenderer, RenderStats, SequentialStyle,
};
use crate::scale::{Domain, OrdinalScale, ValueScale};
use crate::surface::{JoinStats, Surface};
use crate::values::{AreaCode, PointSample, ValueMap, samples_from_json};

/// Result of one full recompute-and-redraw pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassReport {
    /// 1 for the first pass after mount.
    pub pass: u64,
    pub stats: RenderStats,
    /// Colour domain in effect, `None` for categorical fills.
    pub domain: Option<Domain>,
}

/// The area currently under the pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct Hover {
    pub feature: FeatureId,
    pub title: String,
}

enum Coloring {
    Sequential(SequentialFill),
    Categorical(OrdinalScale),
}

/// Everything one mounted map owns: its features, the projection fitted at
/// mount, and the surface it draws on.
pub struct ChoroplethMap {
    config: WidgetConfig,
    features: Vec<AreaFeature>,
    projection: Projection,
    surface: Surface,
    hits: HitIndex,
    coloring: Coloring,
    legend: Option<LegendBuilder>,
    points: Option<PointRenderer>,
    values: ValueMap,
    pass: u64,
}

impl ChoroplethMap {
    /// Fit the projection and prepare an empty surface. Nothing is coloured
    /// until the first [`ChoroplethMap::update_values`].
    pub fn mount(collection: FeatureCollection, config: WidgetConfig) -> Result<Self> {
        if collection.is_empty() {
            bail!("Cannot mount a map without features");
        }
        let features = collection.features().to_vec();
        let (width, height) = config.surface.available();
        let projection = Projection::fit(features.iter().map(|f| &f.geometry), width, height);
        let mut surface = Surface::new(&config.surface, config.style.clone());
        let hits = HitIndex::build(&features, &projection);

        if config.labels {
            surface.set_labels(group_labels(&features, &projection));
        }

        let (coloring, legend) = match &config.fill {
            FillConfig::Sequential(fill) => (
                Coloring::Sequential(fill.clone()),
                config.legend.clone().map(LegendBuilder::new),
            ),
            FillConfig::Categorical(fill) => (
                Coloring::Categorical(
                    OrdinalScale::new(fill.palette).with_domain(features.iter().map(category_of)),
                ),
                None,
            ),
        };
        let points = config.points.clone().map(PointRenderer::new);

        info!(
            surface = %config.surface.id,
            features = features.len(),
            width,
            height,
            "map mounted"
        );

        Ok(Self {
            config,
            features,
            projection,
            surface,
            hits,
            coloring,
            legend,
            points,
            values: ValueMap::new(),
            pass: 0,
        })
    }

    /// One full pass: derive the scale from `values`, rebuild the legend,
    /// then reconcile the area shapes.
    pub fn update_values(&mut self, values: ValueMap) -> PassReport {
        self.pass += 1;
        let tooltip = &self.config.tooltip;

        let (stats, domain) = match &self.coloring {
            Coloring::Categorical(scale) => {
                let style = CategoricalStyle {
                    scale,
                    values: &values,
                    tooltip,
                };
                let stats = ChoroplethRenderer.render(
                    &mut self.surface,
                    &self.features,
                    &self.projection,
                    &style,
                );
                (stats, None)
            }
            Coloring::Sequential(fill) => {
                let scale = ValueScale::from_values(
                    values.values(),
                    fill.ramp,
                    fill.domain,
                    fill.fallback_domain,
                )
                .reversed(fill.reversed);
                if scale.is_fallback() {
                    warn!(key = %self.config.value_key, "no usable values, colouring with fallback domain");
                }

                if let Some(builder) = &self.legend {
                    let (width, height) = self.surface.size();
                    let placement = builder.config();
                    let legend = builder.build(&scale, width * placement.width_fraction);
                    self.surface.replace_legend(
                        Some(legend),
                        width * placement.x_fraction,
                        height - placement.bottom_offset,
                    );
                }

                let style = SequentialStyle {
                    scale: &scale,
                    values: &values,
                    missing: fill.missing,
                    tooltip,
                };
                let stats = ChoroplethRenderer.render(
                    &mut self.surface,
                    &self.features,
                    &self.projection,
                    &style,
                );
                (stats, Some(scale.domain()))
            }
        };

        info!(
            pass = self.pass,
            values = values.len(),
            entered = stats.join.entered,
            updated = stats.join.updated,
            exited = stats.join.exited,
            "render pass complete"
        );
        self.values = values;

        PassReport {
            pass: self.pass,
            stats,
            domain,
        }
    }

    /// Redraw the point overlay. `None` when no overlay is configured.
    pub fn update_points(&mut self, samples: &[PointSample]) -> Option<JoinStats> {
        let renderer = self.points.as_ref()?;
        let scale = renderer.scale_for(samples);
        let stats = renderer.render(&mut self.surface, samples, &self.projection, &scale);
        info!(points = samples.len(), entered = stats.entered, exited = stats.exited, "points drawn");
        Some(stats)
    }

    /// Move the pointer to surface position `(x, y)`, highlighting the area
    /// beneath it.
    pub fn pointer_at(&mut self, x: f64, y: f64) -> Option<Hover> {
        let (ox, oy) = self.surface.origin();
        let hit = self.hits.hit(x - ox, y - oy).cloned();
        self.surface.set_highlight(hit.as_ref());
        let id = hit?;
        let title = self.surface.shapes().get(&id)?.title.clone();
        Some(Hover { feature: id, title })
    }

    pub fn pointer_left(&mut self) {
        self.surface.set_highlight(None);
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn to_svg(&self) -> String {
        self.surface.to_svg()
    }

    fn reset(&mut self) -> usize {
        self.surface.reset()
    }
}

fn category_of(feature: &AreaFeature) -> &AreaCode {
    feature.group.as_ref().unwrap_or(&feature.code)
}

/// One label per category, at the centroid of all its areas together.
fn group_labels(features: &[AreaFeature], projection: &Projection) -> Vec<(f64, f64, String)> {
    let mut groups: Vec<(&AreaCode, Vec<Polygon<f64>>)> = Vec::new();
    for feature in features {
        let code = category_of(feature);
        let polygons = feature.geometry.0.iter().cloned();
        match groups.iter_mut().find(|(c, _)| *c == code) {
            Some((_, existing)) => existing.extend(polygons),
            None => groups.push((code, polygons.collect())),
        }
    }
    groups
        .into_iter()
        .filter_map(|(code, polygons)| {
            projection
                .centroid(&MultiPolygon::new(polygons))
                .map(|c| (c.x, c.y, code.to_string()))
        })
        .collect()
}

type PassFn = dyn Fn(&mut ChoroplethMap, &Trigger);

/// A [`ChoroplethMap`] kept in sync with a reactive model: one pass at mount
/// and one per change of the bound keys.
///
/// A change announced while the map is borrowed through
/// [`ChoroplethWidget::with_map`] is held back and its pass runs as soon as
/// the borrow ends.
pub struct ChoroplethWidget {
    map: Rc<RefCell<ChoroplethMap>>,
    deferred: Rc<RefCell<VecDeque<Trigger>>>,
    pass: Rc<PassFn>,
    binder: ReactiveBinder,
}

impl ChoroplethWidget {
    pub fn mount<M>(model: &M, collection: FeatureCollection, config: WidgetConfig) -> Result<Self>
    where
        M: ReactiveModel + Clone + 'static,
    {
        let value_key = config.value_key.clone();
        let points_key = config.points.as_ref().map(|p| p.key.clone());
        let map = Rc::new(RefCell::new(ChoroplethMap::mount(collection, config)?));

        let mut keys = vec![value_key.as_str()];
        if let Some(key) = &points_key {
            keys.push(key.as_str());
        }

        let source = model.clone();
        let (vk, pk) = (value_key.clone(), points_key.clone());
        let pass: Rc<PassFn> = Rc::new(move |map: &mut ChoroplethMap, trigger: &Trigger| {
            let (values, points) = match trigger {
                Trigger::Mount => (true, pk.is_some()),
                Trigger::Change(key) => (*key == vk, pk.as_ref() == Some(key)),
            };
            if values {
                map.update_values(read_values(&source, &vk));
            }
            if let (true, Some(key)) = (points, &pk) {
                map.update_points(&read_samples(&source, key));
            }
        });
        let deferred = Rc::new(RefCell::new(VecDeque::new()));

        let binder = {
            let handle = Rc::downgrade(&map);
            let (deferred, pass) = (Rc::clone(&deferred), Rc::clone(&pass));
            ReactiveBinder::bind(model, &keys, move |trigger| {
                let Some(map) = handle.upgrade() else {
                    return;
                };
                deferred.borrow_mut().push_back(trigger.clone());
                run_deferred(&map, &deferred, pass.as_ref());
            })
        };

        Ok(Self {
            map,
            deferred,
            pass,
            binder,
        })
    }

    /// Read access to the mounted map. Passes for changes made inside `f`
    /// run once it returns.
    pub fn with_map<R>(&self, f: impl FnOnce(&ChoroplethMap) -> R) -> R {
        let out = f(&self.map.borrow());
        run_deferred(&self.map, &self.deferred, self.pass.as_ref());
        out
    }

    pub fn pointer_at(&self, x: f64, y: f64) -> Option<Hover> {
        self.map.borrow_mut().pointer_at(x, y)
    }

    pub fn pointer_left(&self) {
        self.map.borrow_mut().pointer_left();
    }

    pub fn to_svg(&self) -> String {
        self.map.borrow().to_svg()
    }

    pub fn is_bound(&self) -> bool {
        self.binder.is_bound()
    }

    /// Stop listening to the model and remove every drawn element. Returns
    /// how many elements were removed.
    pub fn teardown(mut self) -> usize {
        self.binder.teardown();
        self.deferred.borrow_mut().clear();
        let removed = self.map.borrow_mut().reset();
        info!(removed, "map torn down");
        removed
    }
}

/// Run held-back passes in order, unless the map is still borrowed.
fn run_deferred(
    map: &RefCell<ChoroplethMap>,
    deferred: &RefCell<VecDeque<Trigger>>,
    pass: &PassFn,
) {
    let Ok(mut map) = map.try_borrow_mut() else {
        debug!(queued = deferred.borrow().len(), "map borrowed, pass deferred");
        return;
    };
    loop {
        let Some(trigger) = deferred.borrow_mut().pop_front() else {
            break;
        };
        pass(&mut *map, &trigger);
    }
}

fn read_values<M: ReactiveModel>(model: &M, key: &str) -> ValueMap {
    model
        .get(key)
        .map(|v| ValueMap::from_json(&v))
        .unwrap_or_default()
}

fn read_samples<M: ReactiveModel>(model: &M, key: &str) -> Vec<PointSample> {
    model
        .get(key)
        .map(|v| samples_from_json(&v))
        .unwrap_or_default()
}
