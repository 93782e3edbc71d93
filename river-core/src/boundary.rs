//! Domain outline: an outer loop plus optional holes, every edge tagged with a
//! [`Marker`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{GrowthError, GrowthResult},
    point::{PointExt, point_segment_distance, segments_intersect},
    types::{FRAME_REGION, Point, RegionTag},
};

/// Role of a boundary edge or vertex.
///
/// Field solvers key their boundary conditions on this value, so it is carried
/// verbatim through the mesh round trip.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Marker {
    #[default]
    None,
    Bottom,
    Right,
    Top,
    Left,
    /// Branch geometry inserted into the mesh input. Never on a boundary loop.
    River,
}

impl Marker {
    pub const ALL: [Marker; 6] = [
        Marker::None,
        Marker::Bottom,
        Marker::Right,
        Marker::Top,
        Marker::Left,
        Marker::River,
    ];

    /// Whether a source branch may be rooted on an edge with this marker.
    pub fn accepts_source(self) -> bool {
        !matches!(self, Marker::None | Marker::River)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marker::None => "none",
            Marker::Bottom => "bottom",
            Marker::Right => "right",
            Marker::Top => "top",
            Marker::Left => "left",
            Marker::River => "river",
        };
        f.write_str(name)
    }
}

/// One closed polygon. Edge `i` runs from `vertices[i]` to
/// `vertices[(i + 1) % n]` and carries `markers[i]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryLoop {
    pub vertices: Vec<Point>,
    pub markers: Vec<Marker>,
    /// A point strictly inside the loop; set for holes, `None` for the outer loop.
    pub hole: Option<Point>,
    pub region_tag: RegionTag,
}

impl BoundaryLoop {
    pub fn new(vertices: Vec<Point>, markers: Vec<Marker>) -> Self {
        Self {
            vertices,
            markers,
            hole: None,
            region_tag: FRAME_REGION,
        }
    }

    /// An inner loop with every edge tagged `marker`. The hole point defaults
    /// to the vertex centroid, which is inside for convex holes.
    pub fn hole(vertices: Vec<Point>, marker: Marker, hole_point: Option<Point>) -> Self {
        let markers = vec![marker; vertices.len()];
        let centroid = if vertices.is_empty() {
            Point::ZERO
        } else {
            vertices.iter().copied().sum::<Point>() / vertices.len() as f64
        };
        Self {
            vertices,
            markers,
            hole: Some(hole_point.unwrap_or(centroid)),
            region_tag: FRAME_REGION,
        }
    }

    pub fn with_region_tag(mut self, region_tag: RegionTag) -> Self {
        self.region_tag = region_tag;
        self
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edge(&self, i: usize) -> (Point, Point) {
        let n = self.vertices.len();
        (self.vertices[i], self.vertices[(i + 1) % n])
    }

    /// Shoelace area, positive for counter-clockwise loops.
    pub fn signed_area(&self) -> f64 {
        (0..self.len())
            .map(|i| {
                let (a, b) = self.edge(i);
                a.perp_dot(b)
            })
            .sum::<f64>()
            * 0.5
    }

    /// Even-odd point-in-polygon test. Points on an edge may go either way.
    pub fn contains(&self, p: Point) -> bool {
        let mut inside = false;
        for i in 0..self.len() {
            let (a, b) = self.edge(i);
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Whether no two non-adjacent edges touch and no edge is degenerate.
    pub fn is_simple(&self) -> bool {
        let n = self.len();
        for i in 0..n {
            let (a, b) = self.edge(i);
            if a.approx_eq(b, 0.0) {
                return false;
            }
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if adjacent {
                    continue;
                }
                let (c, d) = self.edge(j);
                if segments_intersect(a, b, c, d) {
                    return false;
                }
            }
        }
        true
    }

    fn validate(&self, what: &str) -> GrowthResult<()> {
        if self.len() < 3 {
            return Err(GrowthError::InvalidBoundary(format!(
                "{what} needs at least 3 vertices, got {}",
                self.len()
            )));
        }
        if self.markers.len() != self.len() {
            return Err(GrowthError::InvalidBoundary(format!(
                "{what} has {} vertices but {} edge markers",
                self.len(),
                self.markers.len()
            )));
        }
        if self.markers.contains(&Marker::River) {
            return Err(GrowthError::InvalidBoundary(format!(
                "{what} uses the river marker, which is reserved for branches"
            )));
        }
        if !self.is_simple() {
            return Err(GrowthError::InvalidBoundary(format!(
                "{what} is not a simple polygon"
            )));
        }
        Ok(())
    }
}

/// A boundary edge flattened out of its loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryEdge {
    pub a: Point,
    pub b: Point,
    pub marker: Marker,
    /// `0` is the outer loop, `1..` are holes.
    pub loop_index: usize,
    /// Edge index within its loop.
    pub index: usize,
}

/// The simulation domain. `loops[0]` is the outer frame, the rest are holes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    loops: Vec<BoundaryLoop>,
}

impl Boundary {
    /// A boundary made of the single `outer` loop.
    pub fn new(outer: BoundaryLoop) -> GrowthResult<Self> {
        outer.validate("outer loop")?;
        Ok(Self { loops: vec![outer] })
    }

    /// Axis-aligned rectangle. `markers` are given as `[bottom, right, top, left]`.
    pub fn rectangle(min: Point, max: Point, markers: [Marker; 4]) -> GrowthResult<Self> {
        if !(max.x > min.x && max.y > min.y) {
            return Err(GrowthError::InvalidBoundary(format!(
                "rectangle {min} .. {max} is empty"
            )));
        }
        let vertices = vec![
            min,
            Point::new(max.x, min.y),
            max,
            Point::new(min.x, max.y),
        ];
        Self::new(BoundaryLoop::new(vertices, markers.to_vec()))
    }

    /// Square `[0, size] x [0, size]`, `markers` as `[bottom, right, top, left]`.
    pub fn square(size: f64, markers: [Marker; 4]) -> GrowthResult<Self> {
        Self::rectangle(Point::ZERO, Point::splat(size), markers)
    }

    /// Adds an inner loop. It must lie inside the outer loop and must not touch
    /// any existing loop.
    pub fn add_hole(&mut self, hole: BoundaryLoop) -> GrowthResult<()> {
        hole.validate("hole")?;
        let Some(outer) = self.loops.first() else {
            return Err(GrowthError::InvalidBoundary(
                "cannot add a hole before the outer loop".into(),
            ));
        };
        let Some(hole_point) = hole.hole else {
            return Err(GrowthError::InvalidBoundary("hole has no hole point".into()));
        };
        if !hole.contains(hole_point) {
            return Err(GrowthError::InvalidBoundary(format!(
                "hole point {hole_point} is not inside the hole"
            )));
        }
        if !hole.vertices.iter().all(|&v| outer.contains(v)) {
            return Err(GrowthError::InvalidBoundary(
                "hole is not inside the outer loop".into(),
            ));
        }
        for existing in &self.loops {
            for i in 0..existing.len() {
                let (a, b) = existing.edge(i);
                for j in 0..hole.len() {
                    let (c, d) = hole.edge(j);
                    if segments_intersect(a, b, c, d) {
                        return Err(GrowthError::InvalidBoundary(
                            "hole intersects another boundary loop".into(),
                        ));
                    }
                }
            }
        }
        self.loops.push(hole);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn loops(&self) -> &[BoundaryLoop] {
        &self.loops
    }

    pub fn outer(&self) -> Option<&BoundaryLoop> {
        self.loops.first()
    }

    pub fn holes(&self) -> &[BoundaryLoop] {
        self.loops.get(1..).unwrap_or(&[])
    }

    /// All edges, outer loop first. [`crate::error::Obstacle::Boundary`]
    /// indexes into this list.
    pub fn edges(&self) -> Vec<BoundaryEdge> {
        self.loops
            .iter()
            .enumerate()
            .flat_map(|(loop_index, l)| {
                (0..l.len()).map(move |index| {
                    let (a, b) = l.edge(index);
                    BoundaryEdge {
                        a,
                        b,
                        marker: l.markers[index],
                        loop_index,
                        index,
                    }
                })
            })
            .collect()
    }

    /// Inside the outer loop and outside every hole. An empty boundary
    /// contains everything.
    pub fn contains(&self, p: Point) -> bool {
        match self.loops.split_first() {
            None => true,
            Some((outer, holes)) => outer.contains(p) && !holes.iter().any(|h| h.contains(p)),
        }
    }

    /// Distance to the closest edge, `f64::INFINITY` for an empty boundary.
    pub fn distance(&self, p: Point) -> f64 {
        self.nearest_edge(p).map_or(f64::INFINITY, |(_, d)| d)
    }

    /// Index (into [`Boundary::edges`]) and distance of the closest edge.
    pub fn nearest_edge(&self, p: Point) -> Option<(usize, f64)> {
        self.edges()
            .iter()
            .enumerate()
            .map(|(i, e)| (i, point_segment_distance(p, e.a, e.b)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Angle of the unit normal of edge `edge` pointing into the domain.
    pub fn inward_normal_angle(&self, edge: usize) -> Option<f64> {
        let e = *self.edges().get(edge)?;
        let ccw = self.loops[e.loop_index].signed_area() > 0.0;
        // Domain is left of a ccw outer loop and right of a ccw hole.
        let left = (e.b - e.a).perp();
        let inward = if ccw == (e.loop_index == 0) { left } else { -left };
        inward.heading()
    }

    /// Axis-aligned bounding box of the outer loop.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let outer = self.loops.first()?;
        let first = *outer.vertices.first()?;
        Some(
            outer
                .vertices
                .iter()
                .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
        )
    }
}
