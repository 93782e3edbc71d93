use glam::DVec2;

use crate::{
    error::{GrowthError, GrowthResult},
    point::{Polar, PointExt},
    types::{BranchId, INVALID_BRANCH, Point, RIVER_REGION, RegionTag},
};

/// Width given to branches that do not set one.
pub const DEFAULT_WIDTH: f64 = 0.0;

/// An ordered growth path from its root (head) to its tip (tail).
///
/// A branch always holds at least its root point. Points are only appended,
/// except through the explicit truncation calls ([`Branch::clear`],
/// [`Branch::shrink`], [`Branch::remove_tip_point`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    id: BranchId,
    parent: Option<BranchId>,
    source: bool,
    region_tag: RegionTag,
    width: f64,
    /// Heading used while the branch has no segment yet.
    source_angle: Option<f64>,
    points: Vec<Point>,
}

impl Branch {
    /// A detached branch with only its root and no heading.
    pub fn new(root: Point) -> Self {
        Self {
            id: INVALID_BRANCH,
            parent: None,
            source: false,
            region_tag: RIVER_REGION,
            width: DEFAULT_WIDTH,
            source_angle: None,
            points: vec![root],
        }
    }

    /// A detached branch whose initial heading is `heading`.
    pub fn with_heading(root: Point, heading: f64) -> Self {
        Self {
            source_angle: Some(heading),
            ..Self::new(root)
        }
    }

    pub fn with_region_tag(mut self, region_tag: RegionTag) -> Self {
        self.region_tag = region_tag;
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn as_source(mut self) -> Self {
        self.source = true;
        self
    }

    /// Id assigned by the owning tree, [`INVALID_BRANCH`] while detached.
    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// Whether this branch starts at a domain inlet.
    pub fn is_source(&self) -> bool {
        self.source
    }

    pub fn region_tag(&self) -> RegionTag {
        self.region_tag
    }

    pub fn set_region_tag(&mut self, region_tag: RegionTag) {
        self.region_tag = region_tag;
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn set_width(&mut self, width: f64) {
        self.width = width;
    }

    pub fn source_angle(&self) -> Option<f64> {
        self.source_angle
    }

    pub(crate) fn set_id(&mut self, id: BranchId) {
        self.id = id;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<BranchId>) {
        self.parent = parent;
    }

    pub(crate) fn set_source_angle(&mut self, angle: Option<f64>) {
        self.source_angle = angle;
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points, root included. Never zero.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the branch is still only its root.
    pub fn is_empty(&self) -> bool {
        self.points.len() < 2
    }

    pub fn head(&self) -> Point {
        self.points[0]
    }

    pub fn tail(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    /// Direction of the first segment, or the source angle for a root-only branch.
    pub fn head_angle(&self) -> Option<f64> {
        match self.points.as_slice() {
            [a, b, ..] => (*b - *a).heading(),
            _ => self.source_angle,
        }
    }

    /// Direction of the last segment, or the source angle for a root-only branch.
    pub fn tail_angle(&self) -> Option<f64> {
        match self.points.as_slice() {
            [.., a, b] => (*b - *a).heading(),
            _ => self.source_angle,
        }
    }

    /// `i`-th segment vector, from point `i` to point `i + 1`.
    pub fn vector(&self, i: usize) -> Option<DVec2> {
        Some(*self.points.get(i + 1)? - *self.points.get(i)?)
    }

    /// Path length from root to tip.
    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Mean segment length over the last `window` segments (all segments if
    /// the branch has fewer). `None` for a root-only branch or a zero window.
    pub fn average_speed(&self, window: usize) -> Option<f64> {
        let segments = self.points.len() - 1;
        let n = window.min(segments);
        if n == 0 {
            return None;
        }
        let tail = &self.points[self.points.len() - n - 1..];
        Some(tail.windows(2).map(|w| w[0].distance(w[1])).sum::<f64>() / n as f64)
    }

    /// Appends an absolute point.
    pub fn push_point(&mut self, p: Point) {
        self.points.push(p);
    }

    /// Appends `tail + delta`.
    pub fn push_delta(&mut self, delta: DVec2) -> Point {
        let p = self.tail() + delta;
        self.points.push(p);
        p
    }

    /// Appends a step whose angle is relative to the current tail heading.
    pub fn push_polar(&mut self, step: Polar) -> GrowthResult<Point> {
        let p = self.resolve_polar(step)?;
        self.points.push(p);
        Ok(p)
    }

    /// Appends a step whose angle is absolute.
    pub fn push_absolute_polar(&mut self, step: Polar) -> Point {
        self.push_delta(step.to_vector())
    }

    /// Where [`Branch::push_polar`] would put the next point.
    pub fn resolve_polar(&self, step: Polar) -> GrowthResult<Point> {
        let heading = self
            .tail_angle()
            .ok_or(GrowthError::UndefinedHeading { id: self.id })?;
        Ok(step.to_point(self.tail(), heading))
    }

    /// Drops the tip point. `None` if only the root is left.
    pub fn remove_tip_point(&mut self) -> Option<Point> {
        if self.points.len() > 1 {
            self.points.pop()
        } else {
            None
        }
    }

    /// Shortens the branch by `length` of path, cutting the last segment where
    /// needed. The root is never removed.
    pub fn shrink(&mut self, length: f64) {
        let mut left = length;
        while left > 0.0 && self.points.len() > 1 {
            let n = self.points.len();
            let seg = self.points[n - 1] - self.points[n - 2];
            let seg_len = seg.length();
            if seg_len <= left {
                self.points.pop();
                left -= seg_len;
            } else {
                self.points[n - 1] = self.points[n - 2] + seg * ((seg_len - left) / seg_len);
                left = 0.0;
            }
        }
    }

    /// Truncates back to the root point.
    pub fn clear(&mut self) {
        self.points.truncate(1);
    }

    /// Moves every point by `delta`.
    pub(crate) fn translate(&mut self, delta: DVec2) {
        for p in &mut self.points {
            *p += delta;
        }
    }
}
