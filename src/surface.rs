//! Retained drawing surface.
//!
//! The surface owns every element it draws: area shapes, point markers,
//! labels and the legend. Shapes and points live in [`ElementSet`]s and are
//! only ever changed through [`ElementSet::join`], which reconciles them
//! against a keyed data set so nothing accumulates across passes.
//!
//! Serialisation to SVG is a pure function of the current state.

use std::collections::HashMap;
use std::fmt::Write;
use std::hash::Hash;

use crate::color::Color;
use crate::config::{StyleConfig, SurfaceConfig};
use crate::feature::FeatureId;
use crate::legend::Legend;

/// Identity of a drawn element. Updated elements keep their id; only newly
/// entered elements get a fresh one.
pub type NodeId = u64;

#[derive(Debug, Default)]
pub struct NodeIds {
    last: NodeId,
}

impl NodeIds {
    pub fn next(&mut self) -> NodeId {
        self.last += 1;
        self.last
    }
}

/// Outcome of one [`ElementSet::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub entered: usize,
    pub updated: usize,
    pub exited: usize,
    /// Data items skipped because their key was already joined this pass.
    pub duplicates: usize,
}

/// Elements keyed by data identity, kept in data order.
#[derive(Debug, Clone)]
pub struct ElementSet<K, E> {
    order: Vec<K>,
    elements: HashMap<K, E>,
}

impl<K, E> Default for ElementSet<K, E> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            elements: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, E> ElementSet<K, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&E> {
        self.elements.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut E> {
        self.elements.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Elements in data order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &E)> {
        self.order
            .iter()
            .filter_map(|k| self.elements.get(k).map(|e| (k, e)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut E> {
        self.elements.values_mut()
    }

    /// Remove everything, returning how many elements were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.order.len();
        self.order.clear();
        self.elements.clear();
        n
    }

    /// Reconcile against `data`.
    ///
    /// Each datum whose key is already present updates that element in place;
    /// unseen keys enter through `enter`; elements whose key is absent from
    /// `data` exit. A key repeated within `data` is joined once, first wins.
    /// Afterwards the set holds exactly one element per distinct key, in data
    /// order.
    pub fn join<D>(
        &mut self,
        data: impl IntoIterator<Item = D>,
        key: impl Fn(&D) -> K,
        mut enter: impl FnMut(D) -> E,
        mut update: impl FnMut(&mut E, D),
    ) -> JoinStats {
        let mut previous = std::mem::take(&mut self.elements);
        self.order.clear();
        let mut stats = JoinStats::default();

        for datum in data {
            let k = key(&datum);
            if self.elements.contains_key(&k) {
                stats.duplicates += 1;
                continue;
            }
            let element = match previous.remove(&k) {
                Some(mut element) => {
                    update(&mut element, datum);
                    stats.updated += 1;
                    element
                }
                None => {
                    stats.entered += 1;
                    enter(datum)
                }
            };
            self.order.push(k.clone());
            self.elements.insert(k, element);
        }

        stats.exited = previous.len();
        stats
    }
}

/// A filled area path.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub node: NodeId,
    pub feature: FeatureId,
    /// SVG path data in map coordinates.
    pub d: String,
    pub fill: Color,
    pub title: String,
    pub highlighted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub node: NodeId,
    pub cx: f64,
    pub cy: f64,
    pub r: f64,
    pub fill: Color,
    pub stroke: Color,
    pub stroke_width: f64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub node: NodeId,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// A legend with its placement on the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLegend {
    pub node: NodeId,
    pub x: f64,
    pub y: f64,
    pub legend: Legend,
}

/// Fixed-size vector drawing surface.
#[derive(Debug)]
pub struct Surface {
    id: String,
    width: f64,
    height: f64,
    /// Top-left of the map area; shapes, points and labels are relative to it.
    origin: (f64, f64),
    style: StyleConfig,
    shapes: ElementSet<FeatureId, Shape>,
    points: ElementSet<usize, Circle>,
    labels: Vec<Label>,
    legend: Option<PlacedLegend>,
    ids: NodeIds,
}

impl Surface {
    pub fn new(config: &SurfaceConfig, style: StyleConfig) -> Self {
        Self {
            id: config.id.clone(),
            width: config.width,
            height: config.height,
            origin: (config.margin.left, config.margin.top),
            style,
            shapes: ElementSet::new(),
            points: ElementSet::new(),
            labels: Vec::new(),
            legend: None,
            ids: NodeIds::default(),
        }
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    pub fn shapes(&self) -> &ElementSet<FeatureId, Shape> {
        &self.shapes
    }

    pub fn points(&self) -> &ElementSet<usize, Circle> {
        &self.points
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn legend(&self) -> Option<&PlacedLegend> {
        self.legend.as_ref()
    }

    pub(crate) fn shapes_mut(&mut self) -> (&mut ElementSet<FeatureId, Shape>, &mut NodeIds) {
        (&mut self.shapes, &mut self.ids)
    }

    pub(crate) fn points_mut(&mut self) -> (&mut ElementSet<usize, Circle>, &mut NodeIds) {
        (&mut self.points, &mut self.ids)
    }

    /// Drop the previous legend, if any, and place `legend` at `(x, y)`.
    pub fn replace_legend(&mut self, legend: Option<Legend>, x: f64, y: f64) {
        self.legend = legend.map(|legend| PlacedLegend {
            node: self.ids.next(),
            x,
            y,
            legend,
        });
    }

    pub fn set_labels(&mut self, labels: impl IntoIterator<Item = (f64, f64, String)>) {
        let ids = &mut self.ids;
        self.labels = labels
            .into_iter()
            .map(|(x, y, text)| Label {
                node: ids.next(),
                x,
                y,
                text,
            })
            .collect();
    }

    /// Highlight the shape of `feature` only. Returns whether anything changed.
    pub fn set_highlight(&mut self, feature: Option<&FeatureId>) -> bool {
        let mut changed = false;
        for shape in self.shapes.values_mut() {
            let on = feature == Some(&shape.feature);
            if shape.highlighted != on {
                shape.highlighted = on;
                changed = true;
            }
        }
        changed
    }

    pub fn highlighted(&self) -> Option<&FeatureId> {
        self.shapes
            .iter()
            .find(|(_, s)| s.highlighted)
            .map(|(k, _)| k)
    }

    /// Remove every element this surface owns.
    pub fn reset(&mut self) -> usize {
        let removed = self.shapes.clear()
            + self.points.clear()
            + self.labels.len()
            + usize::from(self.legend.is_some());
        self.labels.clear();
        self.legend = None;
        removed
    }

    /// Number of drawn elements (shapes, points, labels, legend).
    pub fn element_count(&self) -> usize {
        self.shapes.len() + self.points.len() + self.labels.len() + usize::from(self.legend.is_some())
    }

    pub fn to_svg(&self) -> String {
        let mut out = String::new();
        let background = self
            .style
            .background
            .map_or_else(|| "transparent".to_string(), |c| c.to_string());
        let _ = writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" id="{}" width="{}" height="{}" viewBox="0 0 {} {}" style="background: {}">"#,
            xml_escape(&self.id),
            num(self.width),
            num(self.height),
            num(self.width),
            num(self.height),
            background,
        );

        if let Some(placed) = &self.legend {
            self.write_gradient(&mut out, &placed.legend);
        }
        self.write_shapes(&mut out);
        self.write_points(&mut out);
        self.write_labels(&mut out);
        if let Some(placed) = &self.legend {
            self.write_legend(&mut out, placed);
        }

        out.push_str("</svg>\n");
        out
    }

    fn gradient_id(&self) -> String {
        format!("{}-gradient", self.id)
    }

    fn translate(&self) -> String {
        format!("translate({},{})", num(self.origin.0), num(self.origin.1))
    }

    fn write_gradient(&self, out: &mut String, legend: &Legend) {
        let _ = writeln!(
            out,
            r#"<defs><linearGradient id="{}">"#,
            xml_escape(&self.gradient_id())
        );
        for stop in &legend.stops {
            let _ = writeln!(
                out,
                r#"<stop offset="{}%" stop-color="{}"/>"#,
                num(stop.offset * 100.0),
                stop.color
            );
        }
        out.push_str("</linearGradient></defs>\n");
    }

    fn write_shapes(&self, out: &mut String) {
        let _ = writeln!(
            out,
            r#"<g class="areas" transform="{}" stroke="{}" stroke-width="{}">"#,
            self.translate(),
            self.style.stroke,
            num(self.style.stroke_width)
        );
        for (id, shape) in self.shapes.iter() {
            let (class, emphasis) = if shape.highlighted {
                (
                    "area-tile highlighted",
                    format!(
                        r#" stroke="{}" stroke-width="{}""#,
                        self.style.highlight_stroke,
                        num(self.style.stroke_width * 2.0)
                    ),
                )
            } else {
                ("area-tile", String::new())
            };
            let _ = writeln!(
                out,
                r#"<path class="{}"{} data-id="{}" d="{}" fill="{}"><title>{}</title></path>"#,
                class,
                emphasis,
                xml_escape(id.as_str()),
                shape.d,
                shape.fill,
                xml_escape(&shape.title)
            );
        }
        out.push_str("</g>\n");
    }

    fn write_points(&self, out: &mut String) {
        if self.points.is_empty() {
            return;
        }
        let _ = writeln!(out, r#"<g class="points" transform="{}">"#, self.translate());
        for (_, c) in self.points.iter() {
            let _ = writeln!(
                out,
                r#"<circle cx="{}" cy="{}" r="{}" fill="{}" stroke="{}" stroke-width="{}"><title>{}</title></circle>"#,
                num(c.cx),
                num(c.cy),
                num(c.r),
                c.fill,
                c.stroke,
                num(c.stroke_width),
                xml_escape(&c.title)
            );
        }
        out.push_str("</g>\n");
    }

    fn write_labels(&self, out: &mut String) {
        if self.labels.is_empty() {
            return;
        }
        let _ = writeln!(
            out,
            r#"<g class="labels" transform="{}" font-family="{}" text-anchor="middle">"#,
            self.translate(),
            xml_escape(&self.style.font_family)
        );
        for label in &self.labels {
            let _ = writeln!(
                out,
                r#"<text transform="translate({},{})">{}</text>"#,
                num(label.x),
                num(label.y),
                xml_escape(&label.text)
            );
        }
        out.push_str("</g>\n");
    }

    fn write_legend(&self, out: &mut String, placed: &PlacedLegend) {
        let legend = &placed.legend;
        let _ = writeln!(
            out,
            r#"<g class="legend" transform="translate({},{})" font-family="{}">"#,
            num(placed.x),
            num(placed.y),
            xml_escape(&self.style.font_family)
        );
        let _ = writeln!(
            out,
            r##"<rect width="{}" height="{}" fill="url(#{})" stroke="#ccc"/>"##,
            num(legend.width),
            num(legend.bar_height),
            xml_escape(&self.gradient_id())
        );
        let _ = writeln!(
            out,
            r#"<g class="axis" transform="translate(0,{})" font-size="10" text-anchor="middle">"#,
            num(legend.bar_height)
        );
        let _ = writeln!(
            out,
            r#"<path class="domain" stroke="currentColor" d="M0,6V0H{}V6"/>"#,
            num(legend.width)
        );
        for tick in &legend.ticks {
            let _ = writeln!(
                out,
                r#"<g class="tick" transform="translate({},0)"><line stroke="currentColor" y2="6"/><text fill="currentColor" y="9" dy="0.71em">{}</text></g>"#,
                num(tick.position),
                xml_escape(&tick.label)
            );
        }
        out.push_str("</g>\n");
        if !legend.caption.is_empty() {
            let _ = writeln!(
                out,
                r#"<text x="{}" y="-10" text-anchor="middle" font-size="12">{}</text>"#,
                num(legend.width / 2.0),
                xml_escape(&legend.caption)
            );
        }
        out.push_str("</g>\n");
    }
}

/// Escape the five XML special characters for text and attribute values.
fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// At most two decimals, trailing zeros dropped.
fn num(v: f64) -> String {
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}
