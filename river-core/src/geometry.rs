//! The running growth state: one [`Tree`] inside one [`Boundary`].
//!
//! [`Geometry`] is the only place the tree is mutated during a run. Every
//! growth operation is validated against the separation tolerance `eps`
//! before anything is committed, and batch operations are all-or-nothing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::{
    boundary::{Boundary, Marker},
    branch::Branch,
    error::{GrowthError, GrowthResult, Obstacle},
    mesh::{Mesh, MeshHints, Pslg, PslgSegment, PslgVertex},
    point::{
        Polar, PointExt, direction, point_segment_distance, segment_parameter,
        segment_segment_distance,
    },
    tree::Tree,
    types::{BranchId, INVALID_BRANCH, Point, RegionTag},
};

/// Default separation tolerance.
pub const DEFAULT_EPS: f64 = 1e-6;

/// An active growth front.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tip {
    pub id: BranchId,
    pub point: Point,
    /// Tail heading; `None` only for a detached root-only branch.
    pub heading: Option<f64>,
}

/// Everything about a branch except its points, as needed to rebuild the
/// tree from a mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchRecord {
    pub id: BranchId,
    pub parent: Option<BranchId>,
    pub source: bool,
    pub region_tag: RegionTag,
    pub width: f64,
    pub source_angle: Option<f64>,
    pub root: Point,
}

/// Snapshot of the tree structure, ascending by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeTopology {
    pub records: Vec<BranchRecord>,
    pub next_id: BranchId,
}

#[derive(Clone, Debug)]
pub struct Geometry {
    tree: Tree,
    boundary: Boundary,
    eps: f64,
    mesh_hints: MeshHints,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(Boundary::default(), DEFAULT_EPS)
    }
}

impl Geometry {
    pub fn new(boundary: Boundary, eps: f64) -> Self {
        Self {
            tree: Tree::new(),
            boundary,
            eps,
            mesh_hints: MeshHints::default(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn mesh_hints(&self) -> &MeshHints {
        &self.mesh_hints
    }

    pub fn set_mesh_hints(&mut self, hints: MeshHints) {
        self.mesh_hints = hints;
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.tree.branch(id)
    }

    /// Sets the separation tolerance used by every check.
    pub fn set_eps(&mut self, eps: f64) -> GrowthResult<()> {
        if !(eps.is_finite() && eps > 0.0) {
            return Err(GrowthError::InvalidConfig(format!(
                "eps must be positive, got {eps}"
            )));
        }
        self.eps = eps;
        Ok(())
    }

    /// Replaces the boundary with the square `[0, size]²`, markers given as
    /// `[bottom, right, top, left]`.
    pub fn set_square_boundary(&mut self, size: f64, markers: [Marker; 4]) -> GrowthResult<()> {
        self.boundary = Boundary::square(size, markers)?;
        Ok(())
    }

    pub fn set_boundary(&mut self, boundary: Boundary) {
        self.boundary = boundary;
    }

    /// Drops every branch. The boundary, tolerance and hints stay.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Seeds a source branch at `origin` heading along `heading`.
    ///
    /// `origin` must be within `eps` of a boundary edge whose marker accepts a
    /// source, and `heading` must point into the domain.
    pub fn initiate_root_branch(&mut self, origin: Point, heading: f64) -> GrowthResult<BranchId> {
        let (edge, distance) =
            self.boundary
                .nearest_edge(origin)
                .ok_or_else(|| GrowthError::BoundaryMismatch {
                    point: origin,
                    reason: "boundary is empty".into(),
                })?;
        if distance > self.eps {
            return Err(GrowthError::BoundaryMismatch {
                point: origin,
                reason: format!("{distance} away from the nearest boundary edge"),
            });
        }
        let marker = self.boundary.edges()[edge].marker;
        if !marker.accepts_source() {
            return Err(GrowthError::BoundaryMismatch {
                point: origin,
                reason: format!("edge {edge} is tagged {marker}, which cannot hold a source"),
            });
        }
        let inward = self
            .boundary
            .inward_normal_angle(edge)
            .ok_or_else(|| GrowthError::BoundaryMismatch {
                point: origin,
                reason: format!("edge {edge} is degenerate"),
            })?;
        if direction(heading).dot(direction(inward)) <= 0.0 {
            return Err(GrowthError::BoundaryMismatch {
                point: origin,
                reason: format!("heading {heading} does not point into the domain"),
            });
        }
        self.check_root_clearance(origin)?;

        let id = self.tree.add_source_branch(origin, heading);
        debug!(id, %origin, heading, %marker, "seeded source branch");
        Ok(id)
    }

    /// Seeds a source branch at `origin` heading along the inward normal of
    /// the closest boundary edge.
    pub fn initiate_root_branch_inward(&mut self, origin: Point) -> GrowthResult<BranchId> {
        let heading = self
            .boundary
            .nearest_edge(origin)
            .and_then(|(edge, _)| self.boundary.inward_normal_angle(edge))
            .ok_or_else(|| GrowthError::BoundaryMismatch {
                point: origin,
                reason: "no boundary edge to seed from".into(),
            })?;
        self.initiate_root_branch(origin, heading)
    }

    fn check_root_clearance(&self, origin: Point) -> GrowthResult<()> {
        for b in self.tree.branches() {
            for (segment, w) in b.points().windows(2).enumerate() {
                let distance = point_segment_distance(origin, w[0], w[1]);
                if distance < self.eps {
                    return Err(self.too_close(INVALID_BRANCH, origin, distance, Obstacle::Branch {
                        id: b.id(),
                        segment,
                    }));
                }
            }
            let distance = origin.distance(b.head());
            if distance < self.eps {
                return Err(self.too_close(INVALID_BRANCH, origin, distance, Obstacle::Branch {
                    id: b.id(),
                    segment: 0,
                }));
            }
        }
        Ok(())
    }

    fn too_close(
        &self,
        id: BranchId,
        point: Point,
        distance: f64,
        obstacle: Obstacle,
    ) -> GrowthError {
        GrowthError::TooClose {
            id,
            point,
            distance,
            eps: self.eps,
            obstacle,
        }
    }

    /// A branch that may be advanced: present and without children.
    fn growable(&self, id: BranchId) -> GrowthResult<&Branch> {
        let branch = self
            .tree
            .branch(id)
            .ok_or(GrowthError::UnknownBranch { id })?;
        if self.tree.has_sub_branches(id) {
            return Err(GrowthError::NotATip { id });
        }
        Ok(branch)
    }

    /// Checks that the segment `from → to` of branch `id` keeps `eps` of
    /// clearance from the boundary and from every existing branch segment.
    ///
    /// Segments sharing the endpoint `from` are only checked against `to`.
    pub fn check_segment(&self, id: BranchId, from: Point, to: Point) -> GrowthResult<()> {
        let eps = self.eps;
        let step = from.distance(to);
        if step < eps {
            return Err(self.too_close(id, to, step, Obstacle::Step));
        }

        let edges = self.boundary.edges();
        if !self.boundary.contains(to) {
            let edge = self.boundary.nearest_edge(to).map_or(0, |(e, _)| e);
            let marker = edges.get(edge).map_or(Marker::None, |e| e.marker);
            return Err(self.too_close(id, to, 0.0, Obstacle::Boundary { edge, marker }));
        }
        for (i, e) in edges.iter().enumerate() {
            let distance = if point_segment_distance(from, e.a, e.b) < eps {
                point_segment_distance(to, e.a, e.b)
            } else {
                segment_segment_distance(from, to, e.a, e.b)
            };
            if distance < eps {
                return Err(self.too_close(id, to, distance, Obstacle::Boundary {
                    edge: i,
                    marker: e.marker,
                }));
            }
        }

        let shared = eps * 1e-6;
        // Root-only branches have no segment here. Their root lies on the
        // boundary or on a parent tail, which the checks above and the
        // parent's last segment already cover.
        for b in self.tree.branches() {
            for (segment, w) in b.points().windows(2).enumerate() {
                let incident = w[0].approx_eq(from, shared) || w[1].approx_eq(from, shared);
                let distance = if incident {
                    point_segment_distance(to, w[0], w[1])
                } else {
                    segment_segment_distance(from, to, w[0], w[1])
                };
                if distance < eps {
                    return Err(self.too_close(id, to, distance, Obstacle::Branch {
                        id: b.id(),
                        segment,
                    }));
                }
            }
        }
        trace!(id, %to, "segment clear");
        Ok(())
    }

    fn push_checked(&mut self, id: BranchId, to: Point) -> GrowthResult<()> {
        let from = self.growable(id)?.tail();
        self.check_segment(id, from, to)?;
        if let Some(b) = self.tree.branch_mut(id) {
            b.push_point(to);
        }
        Ok(())
    }

    /// Applies `f` to every item in order; on the first failure every point
    /// appended so far is removed again.
    fn batch<T>(
        &mut self,
        items: &[(BranchId, T)],
        mut f: impl FnMut(&Self, BranchId, &T) -> GrowthResult<Point>,
    ) -> GrowthResult<Vec<Point>> {
        let mut applied = Vec::with_capacity(items.len());
        for (id, item) in items {
            let result = f(self, *id, item).and_then(|to| self.push_checked(*id, to).map(|_| to));
            match result {
                Ok(to) => applied.push((*id, to)),
                Err(err) => {
                    for (done, _) in applied.iter().rev() {
                        if let Some(b) = self.tree.branch_mut(*done) {
                            b.remove_tip_point();
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(applied.into_iter().map(|(_, p)| p).collect())
    }

    /// Appends the absolute point `p` to tip `id`.
    pub fn add_point(&mut self, id: BranchId, p: Point) -> GrowthResult<()> {
        self.push_checked(id, p)
    }

    pub fn add_points(&mut self, points: &[(BranchId, Point)]) -> GrowthResult<()> {
        self.batch(points, |_, _, p| Ok(*p)).map(|_| ())
    }

    /// Appends `tail + delta` to tip `id`.
    pub fn add_dpoint(&mut self, id: BranchId, delta: Point) -> GrowthResult<Point> {
        let to = self.growable(id)?.tail() + delta;
        self.push_checked(id, to)?;
        Ok(to)
    }

    pub fn add_dpoints(&mut self, deltas: &[(BranchId, Point)]) -> GrowthResult<Vec<Point>> {
        self.batch(deltas, |g, id, d| Ok(g.growable(id)?.tail() + *d))
    }

    /// Advances tip `id` by `step`, with `step.phi` relative to its heading.
    pub fn add_polar(&mut self, id: BranchId, step: Polar) -> GrowthResult<Point> {
        let to = self.growable(id)?.resolve_polar(step)?;
        self.push_checked(id, to)?;
        Ok(to)
    }

    pub fn add_polars(&mut self, steps: &[(BranchId, Polar)]) -> GrowthResult<Vec<Point>> {
        self.batch(steps, |g, id, s| g.growable(id)?.resolve_polar(*s))
    }

    /// Splits tip `id` into two children advanced by `a` and `b` (angles
    /// relative to the tip heading). Both new segments are validated, against
    /// the current geometry and against each other, before the tree changes.
    pub fn add_bifurcation(
        &mut self,
        id: BranchId,
        a: Polar,
        b: Polar,
    ) -> GrowthResult<(BranchId, BranchId)> {
        if !self.tree.is_valid_branch_id(id) {
            return Err(GrowthError::UnknownBranch { id });
        }
        let (tail, heading) = self.tree.check_bifurcation(id, a, b, self.eps)?;
        let to_a = a.to_point(tail, heading);
        let to_b = b.to_point(tail, heading);
        self.check_segment(id, tail, to_a)?;
        self.check_segment(id, tail, to_b)?;
        let apart = point_segment_distance(to_b, tail, to_a)
            .min(point_segment_distance(to_a, tail, to_b));
        if apart < self.eps {
            return Err(self.too_close(id, to_b, apart, Obstacle::Sibling));
        }
        let children = self.tree.add_sub_branches(id, a, b, self.eps)?;
        debug!(id, left = children.0, right = children.1, "bifurcated");
        Ok(children)
    }

    /// Links two detached branches as children of `parent`.
    pub fn add_branch_relation(
        &mut self,
        parent: BranchId,
        left: BranchId,
        right: BranchId,
    ) -> GrowthResult<()> {
        self.tree.add_branch_relation(parent, left, right)
    }

    /// Removes a branch with all its descendants.
    pub fn delete_branch(&mut self, id: BranchId) -> GrowthResult<Vec<BranchId>> {
        self.tree.delete_branch(id)
    }

    /// Reverts the last growth step of every tip.
    pub fn remove_tip_points(&mut self) {
        self.tree.remove_tip_points();
    }

    /// Shortens tip `id` by `length` of path, never past its root. A last
    /// segment left shorter than `eps` is dropped as well.
    ///
    /// Shrinking only ever shortens segments, so the separation invariant
    /// keeps holding without a check.
    ///
    /// ### Returns
    /// The remaining branch length.
    pub fn shrink_tip(&mut self, id: BranchId, length: f64) -> GrowthResult<f64> {
        self.growable(id)?;
        let eps = self.eps;
        let branch = self
            .tree
            .branch_mut(id)
            .ok_or(GrowthError::UnknownBranch { id })?;
        branch.shrink(length);
        let last = branch.len().saturating_sub(2);
        if branch.vector(last).is_some_and(|v| v.length() < eps) {
            branch.remove_tip_point();
        }
        trace!(id, length, left = branch.length(), "tip shrunk");
        Ok(branch.length())
    }

    /// Removes every descendant of `id`, which becomes a tip again.
    pub fn delete_sub_branches(&mut self, id: BranchId) -> GrowthResult<Vec<BranchId>> {
        self.tree.delete_sub_branches(id)
    }

    /// Parents of tips that have shrunk to at most `length`, ascending and
    /// without duplicates.
    pub fn collapsed_forks(&self, length: f64) -> Vec<BranchId> {
        let forks: BTreeSet<BranchId> = self
            .tip_ids()
            .into_iter()
            .filter_map(|id| {
                let b = self.tree.branch(id)?;
                (b.length() <= length).then_some(b.parent()?)
            })
            .collect();
        forks.into_iter().collect()
    }

    /// Active growth fronts, ascending by id.
    pub fn tip_ids(&self) -> Vec<BranchId> {
        self.tree.tip_ids()
    }

    pub fn tip_points(&self) -> Vec<Point> {
        self.tree.tip_points()
    }

    /// Tip points with their tail headings, ascending by id.
    pub fn tip_polars(&self) -> Vec<Tip> {
        self.tip_ids()
            .into_iter()
            .filter_map(|id| self.tip(id))
            .collect()
    }

    pub fn tip(&self, id: BranchId) -> Option<Tip> {
        if self.tree.has_sub_branches(id) {
            return None;
        }
        let b = self.tree.branch(id)?;
        Some(Tip {
            id,
            point: b.tail(),
            heading: b.tail_angle(),
        })
    }

    pub fn topology(&self) -> TreeTopology {
        TreeTopology {
            records: self
                .tree
                .branches()
                .map(|b| BranchRecord {
                    id: b.id(),
                    parent: b.parent(),
                    source: b.is_source(),
                    region_tag: b.region_tag(),
                    width: b.width(),
                    source_angle: b.source_angle(),
                    root: b.head(),
                })
                .collect(),
            next_id: self.tree.next_id(),
        }
    }

    /// Mesh-generator input for the current state with the configured hints.
    pub fn initiate_mesh(&self) -> Pslg {
        self.initiate_mesh_scaled(1.0)
    }

    /// Like [`Geometry::initiate_mesh`] with every size hint multiplied by
    /// `scale`.
    ///
    /// Boundary loops come first. A source root lying on a boundary edge splits
    /// that edge, both halves keeping its marker. Each branch then adds one
    /// river segment per step; children start from their parent's tail vertex.
    pub fn initiate_mesh_scaled(&self, scale: f64) -> Pslg {
        let hints = self.mesh_hints.scaled(scale);
        let mut pslg = Pslg::default();
        let mut root_vertex: BTreeMap<BranchId, usize> = BTreeMap::new();

        let roots: Vec<(BranchId, Point)> = self
            .tree
            .branches()
            .filter(|b| b.parent().is_none())
            .map(|b| (b.id(), b.head()))
            .collect();

        for l in self.boundary.loops() {
            let size = hints.size_for(l.region_tag);
            let first = pslg.vertices.len();
            for i in 0..l.len() {
                let (a, b) = l.edge(i);
                let marker = l.markers[i];
                pslg.push_vertex(PslgVertex {
                    point: a,
                    marker,
                    region_tag: l.region_tag,
                    mesh_size: size,
                    branch: None,
                });
                let mut on_edge: Vec<(f64, BranchId, Point)> = roots
                    .iter()
                    .filter(|(id, p)| {
                        !root_vertex.contains_key(id)
                            && point_segment_distance(*p, a, b) <= self.eps
                    })
                    .map(|&(id, p)| (segment_parameter(p, a, b), id, p))
                    .collect();
                on_edge.sort_by(|x, y| x.0.total_cmp(&y.0));
                for (t, id, p) in on_edge {
                    if t <= 0.0 {
                        // Root sits on the loop vertex itself.
                        let v = pslg.vertices.len() - 1;
                        pslg.vertices[v].branch = Some(id);
                        root_vertex.insert(id, v);
                        continue;
                    }
                    if t >= 1.0 {
                        // Claimed by the next edge's start vertex.
                        continue;
                    }
                    let v = pslg.push_vertex(PslgVertex {
                        point: p,
                        marker,
                        region_tag: l.region_tag,
                        mesh_size: hints.tip_size_for(l.region_tag).min(size),
                        branch: Some(id),
                    });
                    root_vertex.insert(id, v);
                }
            }
            let last = pslg.vertices.len();
            // Walk the emitted vertices, closing the loop. Each segment takes
            // the marker of the vertex it starts from.
            for v in first..last {
                let next = if v + 1 == last { first } else { v + 1 };
                let marker = pslg.vertices[v].marker;
                pslg.push_segment(PslgSegment {
                    a: v,
                    b: next,
                    marker,
                    branch: None,
                });
            }
            if let Some(hole) = l.hole {
                pslg.holes.push(hole);
            }
        }

        let mut tail_vertex: BTreeMap<BranchId, usize> = BTreeMap::new();
        for id in self.topological_order() {
            let Some(b) = self.tree.branch(id) else {
                continue;
            };
            let region = b.region_tag();
            let is_tip = !self.tree.has_sub_branches(id);
            let start = match b.parent().and_then(|p| tail_vertex.get(&p).copied()) {
                Some(v) => v,
                None => match root_vertex.get(&id) {
                    Some(&v) => v,
                    None => pslg.push_vertex(PslgVertex {
                        point: b.head(),
                        marker: Marker::River,
                        region_tag: region,
                        mesh_size: hints.size_for(region),
                        branch: Some(id),
                    }),
                },
            };
            let mut prev = start;
            let n = b.len();
            for (k, &p) in b.points().iter().enumerate().skip(1) {
                let mesh_size = if is_tip && k + 1 == n {
                    hints.tip_size_for(region)
                } else {
                    hints.size_for(region)
                };
                let v = pslg.push_vertex(PslgVertex {
                    point: p,
                    marker: Marker::River,
                    region_tag: region,
                    mesh_size,
                    branch: Some(id),
                });
                pslg.push_segment(PslgSegment {
                    a: prev,
                    b: v,
                    marker: Marker::River,
                    branch: Some(id),
                });
                prev = v;
            }
            tail_vertex.insert(id, prev);
        }
        trace!(
            vertices = pslg.vertices.len(),
            segments = pslg.segments.len(),
            "built mesh input"
        );
        pslg
    }

    /// Branch ids with every parent before its children.
    fn topological_order(&self) -> Vec<BranchId> {
        let mut order = Vec::with_capacity(self.tree.len());
        let mut stack: Vec<BranchId> = self
            .tree
            .branches()
            .filter(|b| b.parent().is_none())
            .map(Branch::id)
            .collect();
        stack.reverse();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.tree.sub_branch_ids(id).iter().rev().copied());
        }
        order
    }

    /// Rebuilds the tree from the river edges of `mesh`, using `topology` for
    /// everything the mesh does not carry. Replaces the current tree only if
    /// the whole reconstruction succeeds.
    pub fn insert_branch_tree(&mut self, mesh: &Mesh, topology: &TreeTopology) -> GrowthResult<()> {
        let mut adjacency: BTreeMap<BranchId, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
        for e in mesh.edges.iter().filter(|e| e.marker == Marker::River) {
            let Some(id) = e.branch else {
                return Err(GrowthError::Reconstruction(format!(
                    "river edge {}-{} carries no branch id",
                    e.a, e.b
                )));
            };
            if e.a >= mesh.vertices.len() || e.b >= mesh.vertices.len() {
                return Err(GrowthError::Reconstruction(format!(
                    "edge {}-{} of branch {id} references a missing vertex",
                    e.a, e.b
                )));
            }
            let adj = adjacency.entry(id).or_default();
            adj.entry(e.a).or_default().push(e.b);
            adj.entry(e.b).or_default().push(e.a);
        }

        let mut tree = Tree::new();
        for record in &topology.records {
            let mut branch = Branch::new(record.root)
                .with_region_tag(record.region_tag)
                .with_width(record.width);
            if record.source {
                branch = branch.as_source();
            }
            branch.set_source_angle(record.source_angle);
            if let Some(adj) = adjacency.remove(&record.id) {
                for p in self.walk_chain(mesh, record, &adj)? {
                    branch.push_point(p);
                }
            }
            tree.restore_branch(record.id, branch)?;
        }
        if let Some(&id) = adjacency.keys().next() {
            return Err(GrowthError::Reconstruction(format!(
                "mesh has river edges for unknown branch {id}"
            )));
        }

        let mut children: BTreeMap<BranchId, Vec<BranchId>> = BTreeMap::new();
        for record in &topology.records {
            if let Some(parent) = record.parent {
                children.entry(parent).or_default().push(record.id);
            }
        }
        for (parent, kids) in children {
            match kids.as_slice() {
                [only] => tree.attach_child(parent, *only)?,
                [left, right] => tree.add_branch_relation(parent, *left, *right)?,
                _ => {
                    return Err(GrowthError::Reconstruction(format!(
                        "branch {parent} has {} children",
                        kids.len()
                    )));
                }
            }
        }
        tree.reserve_ids(topology.next_id.max(self.tree.next_id()));
        debug!(branches = tree.len(), "rebuilt tree from mesh");
        self.tree = tree;
        Ok(())
    }

    /// Follows the river edges of one branch from the vertex at its root.
    /// Returns the points after the root.
    fn walk_chain(
        &self,
        mesh: &Mesh,
        record: &BranchRecord,
        adjacency: &BTreeMap<usize, Vec<usize>>,
    ) -> GrowthResult<Vec<Point>> {
        let start = adjacency
            .keys()
            .copied()
            .min_by(|&a, &b| {
                let da = mesh.vertices[a].point.distance(record.root);
                let db = mesh.vertices[b].point.distance(record.root);
                da.total_cmp(&db)
            })
            .filter(|&v| mesh.vertices[v].point.distance(record.root) <= self.eps)
            .ok_or_else(|| {
                GrowthError::Reconstruction(format!(
                    "no river vertex of branch {} at its root {}",
                    record.id, record.root
                ))
            })?;
        if adjacency[&start].len() != 1 {
            return Err(GrowthError::Reconstruction(format!(
                "root of branch {} is not a chain end",
                record.id
            )));
        }

        let edge_count: usize = adjacency.values().map(Vec::len).sum::<usize>() / 2;
        let mut visited = BTreeSet::from([start]);
        let mut points = Vec::with_capacity(edge_count);
        let mut current = start;
        while let Some(&next) = adjacency[&current].iter().find(|v| !visited.contains(*v)) {
            visited.insert(next);
            points.push(mesh.vertices[next].point);
            current = next;
        }
        if points.len() != edge_count {
            return Err(GrowthError::Reconstruction(format!(
                "river edges of branch {} do not form a single chain",
                record.id
            )));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshGenerator, PslgMesher};
    use std::f64::consts::PI;

    const FRAME: [Marker; 4] = [Marker::Bottom, Marker::Right, Marker::Top, Marker::Left];
    const UP: f64 = PI / 2.0;

    fn square() -> Geometry {
        let mut g = Geometry::default();
        g.set_square_boundary(10.0, FRAME).unwrap();
        g.set_eps(0.01).unwrap();
        g
    }

    #[test]
    fn root_branch_must_start_on_a_source_edge() {
        let mut g = square();
        assert!(matches!(
            g.initiate_root_branch(Point::new(5.0, 5.0), UP),
            Err(GrowthError::BoundaryMismatch { .. })
        ));
        // Heading out of the domain.
        assert!(matches!(
            g.initiate_root_branch(Point::new(5.0, 0.0), -UP),
            Err(GrowthError::BoundaryMismatch { .. })
        ));
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        assert!(g.tree().is_source_branch(id));
        assert_eq!(g.tip_ids(), vec![id]);
    }

    #[test]
    fn none_marked_edge_rejects_sources() {
        let mut g = Geometry::default();
        g.set_square_boundary(1.0, [Marker::None, Marker::Right, Marker::Top, Marker::Left])
            .unwrap();
        assert!(matches!(
            g.initiate_root_branch(Point::new(0.5, 0.0), UP),
            Err(GrowthError::BoundaryMismatch { .. })
        ));
    }

    #[test]
    fn inward_seed_uses_edge_normal() {
        let mut g = square();
        let id = g.initiate_root_branch_inward(Point::new(10.0, 3.0)).unwrap();
        let tip = g.tip(id).unwrap();
        assert!((tip.heading.unwrap() - PI).abs() < 1e-12);
    }

    #[test]
    fn polar_growth_follows_heading() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        let p = g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        assert!(p.approx_eq(Point::new(5.0, 1.0), 1e-12));
        let p = g.add_polar(id, Polar::new(1.0, -UP)).unwrap();
        assert!(p.approx_eq(Point::new(6.0, 1.0), 1e-12));
        let p = g.add_dpoint(id, Point::new(0.0, 1.0)).unwrap();
        assert!(p.approx_eq(Point::new(6.0, 2.0), 1e-12));
        g.add_point(id, Point::new(6.0, 3.0)).unwrap();
        assert_eq!(g.branch(id).unwrap().len(), 5);
    }

    #[test]
    fn step_leaving_domain_is_too_close_to_boundary() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        let err = g.add_polar(id, Polar::new(10.0, 0.0)).unwrap_err();
        match err {
            GrowthError::TooClose {
                obstacle: Obstacle::Boundary { marker, .. },
                ..
            } => assert_eq!(marker, Marker::Top),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(g.branch(id).unwrap().len(), 1);
    }

    #[test]
    fn tiny_step_is_rejected() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        assert!(matches!(
            g.add_polar(id, Polar::new(0.001, 0.0)),
            Err(GrowthError::TooClose {
                obstacle: Obstacle::Step,
                ..
            })
        ));
    }

    #[test]
    fn crossing_another_branch_is_rejected_and_state_kept() {
        let mut g = square();
        let a = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        g.add_polar(a, Polar::new(2.0, 0.0)).unwrap();
        let b = g.initiate_root_branch(Point::new(0.0, 1.0), 0.0).unwrap();
        g.add_polar(b, Polar::new(4.0, 0.0)).unwrap();
        let before = g.tree().clone();

        let err = g.add_polar(b, Polar::new(2.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            GrowthError::TooClose {
                obstacle: Obstacle::Branch { id, .. },
                ..
            } if id == a
        ));
        assert_eq!(g.tree(), &before);
    }

    #[test]
    fn batch_growth_rolls_back_on_failure() {
        let mut g = square();
        let a = g.initiate_root_branch(Point::new(2.0, 0.0), UP).unwrap();
        let b = g.initiate_root_branch(Point::new(8.0, 0.0), UP).unwrap();
        let before = g.tree().clone();

        let err = g
            .add_polars(&[(a, Polar::new(1.0, 0.0)), (b, Polar::new(20.0, 0.0))])
            .unwrap_err();
        assert!(matches!(err, GrowthError::TooClose { .. }));
        assert_eq!(g.tree(), &before);

        let points = g
            .add_dpoints(&[(a, Point::new(0.0, 1.0)), (b, Point::new(0.0, 1.0))])
            .unwrap();
        assert_eq!(points, vec![Point::new(2.0, 1.0), Point::new(8.0, 1.0)]);
        g.add_points(&[(a, Point::new(2.0, 2.0))]).unwrap();
        assert_eq!(g.tip_points(), vec![Point::new(2.0, 2.0), Point::new(8.0, 1.0)]);
    }

    #[test]
    fn bifurcation_replaces_tip_with_two_children() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        let (l, r) = g
            .add_bifurcation(id, Polar::new(0.5, PI / 5.0), Polar::new(0.5, -PI / 5.0))
            .unwrap();
        assert_eq!(g.tip_ids(), vec![l, r]);
        assert_eq!(g.tree().parent_id(l), Some(id));
        assert_eq!(g.tree().parent_id(r), Some(id));
        assert!(matches!(
            g.add_polar(id, Polar::new(0.5, 0.0)),
            Err(GrowthError::NotATip { .. })
        ));
        let tips = g.tip_polars();
        assert!((tips[0].heading.unwrap() - (UP + PI / 5.0)).abs() < 1e-9);
        assert!((tips[1].heading.unwrap() - (UP - PI / 5.0)).abs() < 1e-9);
    }

    #[test]
    fn bifurcation_into_wall_leaves_tree_untouched() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(0.5, 0.0), UP).unwrap();
        g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        let before = g.tree().clone();
        let err = g
            .add_bifurcation(id, Polar::new(1.0, UP), Polar::new(1.0, -UP))
            .unwrap_err();
        assert!(matches!(
            err,
            GrowthError::TooClose {
                obstacle: Obstacle::Boundary {
                    marker: Marker::Left,
                    ..
                },
                ..
            }
        ));
        assert_eq!(g.tree(), &before);
    }

    #[test]
    fn shrunk_children_leave_the_fork_guarded_by_the_parent() {
        let mut g = square();
        let a = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        g.add_polar(a, Polar::new(2.0, 0.0)).unwrap();
        let (l, r) = g
            .add_bifurcation(a, Polar::new(0.5, PI / 5.0), Polar::new(0.5, -PI / 5.0))
            .unwrap();
        assert!(g.shrink_tip(l, 1.0).unwrap().abs() < 1e-12);
        assert!((g.shrink_tip(r, 0.2).unwrap() - 0.3).abs() < 1e-12);
        // Leaving 0.005, below eps, drops the segment altogether.
        assert!(g.shrink_tip(r, 0.295).unwrap().abs() < 1e-12);
        assert_eq!(g.branch(r).unwrap().len(), 1);
        assert_eq!(g.branch(l).unwrap().len(), 1);
        assert_eq!(g.collapsed_forks(0.01), vec![a]);
        assert!(matches!(
            g.shrink_tip(a, 1.0),
            Err(GrowthError::NotATip { .. })
        ));

        // Passing 0.005 above the bare fork point still hits the parent.
        let b = g.initiate_root_branch(Point::new(0.0, 2.005), 0.0).unwrap();
        let err = g.add_point(b, Point::new(5.0, 2.005)).unwrap_err();
        assert!(matches!(
            err,
            GrowthError::TooClose {
                obstacle: Obstacle::Branch { id, .. },
                ..
            } if id == a
        ));

        assert_eq!(g.delete_sub_branches(a).unwrap(), vec![l, r]);
        assert_eq!(g.tip_ids(), vec![a, b]);
        assert!(g.collapsed_forks(0.01).is_empty());
    }

    #[test]
    fn mesh_input_splits_inlet_edge_and_shares_fork_vertex() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), UP).unwrap();
        g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        g.add_bifurcation(id, Polar::new(0.5, 0.6), Polar::new(0.5, -0.6))
            .unwrap();

        let pslg = g.initiate_mesh();
        // 4 corners + root + parent tail + two child tails.
        assert_eq!(pslg.vertices.len(), 8);
        // 5 boundary segments + 3 river segments.
        assert_eq!(pslg.segments.len(), 8);
        let boundary: Vec<_> = pslg.segments.iter().filter(|s| s.branch.is_none()).collect();
        assert_eq!(boundary.len(), 5);
        assert_eq!(
            boundary.iter().filter(|s| s.marker == Marker::Bottom).count(),
            2
        );

        let root = pslg.vertices[1];
        assert_eq!(root.point, Point::new(5.0, 0.0));
        assert_eq!(root.marker, Marker::Bottom);
        assert_eq!(root.branch, Some(id));

        let river: Vec<_> = pslg.river_segments().collect();
        assert_eq!(river.len(), 3);
        assert_eq!(river[1].a, river[2].a, "children start at the fork vertex");
        assert_eq!(river[0].b, river[1].a);
    }

    #[test]
    fn mesh_round_trip_restores_tips() {
        let mut g = square();
        let a = g.initiate_root_branch(Point::new(3.0, 0.0), UP).unwrap();
        let b = g.initiate_root_branch(Point::new(10.0, 5.0), PI).unwrap();
        g.add_polars(&[(a, Polar::new(1.0, 0.1)), (b, Polar::new(1.0, 0.0))])
            .unwrap();
        g.add_bifurcation(a, Polar::new(0.5, 0.6), Polar::new(0.5, -0.6))
            .unwrap();

        let tips = g.tip_polars();
        let topology = g.topology();
        let mesh = PslgMesher.generate(&g.initiate_mesh()).unwrap();

        let mut rebuilt = square();
        rebuilt.insert_branch_tree(&mesh, &topology).unwrap();
        let after = rebuilt.tip_polars();
        assert_eq!(after.len(), tips.len());
        for (x, y) in tips.iter().zip(&after) {
            assert_eq!(x.id, y.id);
            assert!(x.point.approx_eq(y.point, 1e-12));
            assert!((x.heading.unwrap() - y.heading.unwrap()).abs() < 1e-9);
        }
        assert_eq!(rebuilt.tree().next_id(), g.tree().next_id());
    }

    #[test]
    fn reconstruction_rejects_unknown_branch_edges() {
        let mut g = square();
        let id = g.initiate_root_branch(Point::new(3.0, 0.0), UP).unwrap();
        g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        let mesh = PslgMesher.generate(&g.initiate_mesh()).unwrap();

        let mut empty = square();
        let err = empty
            .insert_branch_tree(&mesh, &TreeTopology::default())
            .unwrap_err();
        assert!(matches!(err, GrowthError::Reconstruction(_)));
        assert!(empty.tree().is_empty());
    }
}
