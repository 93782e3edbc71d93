//! Input and output contracts of the external mesh generator.
//!
//! The core produces a [`Pslg`] (planar straight-line graph) from the current
//! geometry and receives a [`Mesh`] back. Markers and branch ids travel
//! through both unchanged so boundary conditions and branch reconstruction
//! can be keyed on them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    boundary::Marker,
    error::CollaboratorError,
    types::{BranchId, Point, RegionTag},
};

/// Mesh-size hints: a default element size, an optional finer size near tips,
/// and per-region overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshHints {
    pub default_size: f64,
    pub tip_size: Option<f64>,
    pub regions: BTreeMap<RegionTag, f64>,
}

impl Default for MeshHints {
    fn default() -> Self {
        Self {
            default_size: 1.0,
            tip_size: None,
            regions: BTreeMap::new(),
        }
    }
}

impl MeshHints {
    pub fn size_for(&self, region: RegionTag) -> f64 {
        self.regions
            .get(&region)
            .copied()
            .unwrap_or(self.default_size)
    }

    /// Size for a branch tip vertex in `region`.
    pub fn tip_size_for(&self, region: RegionTag) -> f64 {
        self.tip_size.unwrap_or_else(|| self.size_for(region))
    }

    /// Every size multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            default_size: self.default_size * factor,
            tip_size: self.tip_size.map(|s| s * factor),
            regions: self
                .regions
                .iter()
                .map(|(&tag, &size)| (tag, size * factor))
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PslgVertex {
    pub point: Point,
    pub marker: Marker,
    pub region_tag: RegionTag,
    pub mesh_size: f64,
    /// Branch this vertex belongs to, `None` for pure boundary vertices.
    /// A bifurcation vertex belongs to the parent branch.
    pub branch: Option<BranchId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslgSegment {
    pub a: usize,
    pub b: usize,
    pub marker: Marker,
    pub branch: Option<BranchId>,
}

/// Planar straight-line graph handed to the mesh generator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pslg {
    pub vertices: Vec<PslgVertex>,
    pub segments: Vec<PslgSegment>,
    pub holes: Vec<Point>,
}

impl Pslg {
    pub fn push_vertex(&mut self, vertex: PslgVertex) -> usize {
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    pub fn push_segment(&mut self, segment: PslgSegment) {
        self.segments.push(segment);
    }

    /// Segments carrying the river marker.
    pub fn river_segments(&self) -> impl Iterator<Item = &PslgSegment> {
        self.segments.iter().filter(|s| s.marker == Marker::River)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    pub point: Point,
    pub marker: Marker,
    pub branch: Option<BranchId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshEdge {
    pub a: usize,
    pub b: usize,
    pub marker: Marker,
    pub branch: Option<BranchId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub vertices: [usize; 3],
    pub region: RegionTag,
}

/// Conforming mesh returned by the generator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub edges: Vec<MeshEdge>,
    pub triangles: Vec<MeshTriangle>,
    pub holes: Vec<Point>,
}

impl Mesh {
    /// Vertices that lie on branch geometry.
    pub fn river_points(&self) -> impl Iterator<Item = Point> + '_ {
        self.vertices
            .iter()
            .filter(|v| v.marker == Marker::River)
            .map(|v| v.point)
    }

    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = self.vertices.first()?.point;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(lo, hi), v| (lo.min(v.point), hi.max(v.point))),
        )
    }
}

impl From<&Pslg> for Mesh {
    fn from(pslg: &Pslg) -> Self {
        Self {
            vertices: pslg
                .vertices
                .iter()
                .map(|v| MeshVertex {
                    point: v.point,
                    marker: v.marker,
                    branch: v.branch,
                })
                .collect(),
            edges: pslg
                .segments
                .iter()
                .map(|s| MeshEdge {
                    a: s.a,
                    b: s.b,
                    marker: s.marker,
                    branch: s.branch,
                })
                .collect(),
            triangles: Vec::new(),
            holes: pslg.holes.clone(),
        }
    }
}

/// External mesh generator.
pub trait MeshGenerator {
    fn generate(&mut self, pslg: &Pslg) -> Result<Mesh, CollaboratorError>;
}

impl<F> MeshGenerator for F
where
    F: FnMut(&Pslg) -> Result<Mesh, CollaboratorError>,
{
    fn generate(&mut self, pslg: &Pslg) -> Result<Mesh, CollaboratorError> {
        self(pslg)
    }
}

/// Identity generator: the constrained vertices and segments become the mesh,
/// with no triangles.
#[derive(Clone, Copy, Debug, Default)]
pub struct PslgMesher;

impl MeshGenerator for PslgMesher {
    fn generate(&mut self, pslg: &Pslg) -> Result<Mesh, CollaboratorError> {
        Ok(Mesh::from(pslg))
    }
}
