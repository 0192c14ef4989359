use geo::{BoundingRect, Centroid, Coord, LineString, MapCoords, MultiPolygon, Rect};
use std::f64::consts::FRAC_PI_4;
use std::fmt::Write;
use thiserror::Error;

/// Latitude limit of the spherical Mercator square.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("non-finite coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

/// Spherical Mercator fitted to a surface: raw projected coordinates are
/// scaled by `k` and translated by `(tx, ty)`. Once fitted it never changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    k: f64,
    tx: f64,
    ty: f64,
}

/// Raw Mercator with y growing southwards, matching surface coordinates.
fn mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    Coord {
        x: c.x.to_radians(),
        y: -(FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

impl Projection {
    /// Fit so the union of `geometries` is centred in `[0, width] × [0, height]`
    /// with its aspect ratio preserved.
    ///
    /// With no coordinates at all the result maps the origin to the surface
    /// centre at unit scale. A zero-extent axis (a single point, or a
    /// perfectly flat shape) is fitted on the other axis alone.
    pub fn fit<'a>(
        geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>,
        width: f64,
        height: f64,
    ) -> Self {
        let width = width.max(0.0);
        let height = height.max(0.0);

        let bounds = geometries
            .into_iter()
            .filter_map(|mp| mp.map_coords(mercator).bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            });

        let Some(bounds) = bounds else {
            return Self {
                k: 1.0,
                tx: width / 2.0,
                ty: height / 2.0,
            };
        };

        let (dx, dy) = (bounds.width(), bounds.height());
        let k = match (dx > 0.0, dy > 0.0) {
            (true, true) => (width / dx).min(height / dy),
            (true, false) => width / dx,
            (false, true) => height / dy,
            (false, false) => 1.0,
        };
        let k = if k.is_finite() && k > 0.0 { k } else { 1.0 };

        Self {
            k,
            tx: (width - k * dx) / 2.0 - k * bounds.min().x,
            ty: (height - k * dy) / 2.0 - k * bounds.min().y,
        }
    }

    /// Map a longitude/latitude pair to surface coordinates.
    pub fn project(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        let m = mercator(lon_lat);
        Coord {
            x: self.k * m.x + self.tx,
            y: self.k * m.y + self.ty,
        }
    }

    /// Like [`Projection::project`], rejecting non-finite input.
    pub fn try_project(&self, lon_lat: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let p = self.project(lon_lat);
        if p.x.is_finite() && p.y.is_finite() {
            Ok(p)
        } else {
            Err(ProjectionError::NonFinite {
                x: lon_lat.x,
                y: lon_lat.y,
            })
        }
    }

    /// Geometry in surface coordinates.
    pub fn project_geometry(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, ProjectionError> {
        geometry.try_map_coords(|c| self.try_project(c))
    }

    /// SVG path data, one closed subpath per ring.
    pub fn path(&self, geometry: &MultiPolygon<f64>) -> Result<String, ProjectionError> {
        let projected = self.project_geometry(geometry)?;
        let mut d = String::new();
        for polygon in &projected.0 {
            write_ring(&mut d, polygon.exterior());
            for hole in polygon.interiors() {
                write_ring(&mut d, hole);
            }
        }
        Ok(d)
    }

    /// Planar centroid of the projected geometry, if it has any area or extent.
    pub fn centroid(&self, geometry: &MultiPolygon<f64>) -> Option<Coord<f64>> {
        let projected = self.project_geometry(geometry).ok()?;
        projected.centroid().map(|p| p.0)
    }
}

fn write_ring(d: &mut String, ring: &LineString<f64>) {
    let mut coords = ring.0.as_slice();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords = &coords[..coords.len() - 1];
    }
    let Some((first, rest)) = coords.split_first() else {
        return;
    };
    let _ = write!(d, "M{:.2},{:.2}", first.x, first.y);
    for c in rest {
        let _ = write!(d, "L{:.2},{:.2}", c.x, c.y);
    }
    d.push('Z');
}
