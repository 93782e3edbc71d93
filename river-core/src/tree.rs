use std::collections::BTreeMap;

use crate::{
    branch::Branch,
    error::{GrowthError, GrowthResult},
    point::{Polar, normalize_angle},
    types::{BranchId, INVALID_BRANCH, Point},
};

/// Flat arena of branches keyed by id, with the parent → children adjacency
/// kept alongside.
///
/// Ids start at 1 and grow monotonically; a deleted id is never handed out
/// again, not even after [`Tree::clear`].
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    branches: BTreeMap<BranchId, Branch>,
    children: BTreeMap<BranchId, Vec<BranchId>>,
    next_id: BranchId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            branches: BTreeMap::new(),
            children: BTreeMap::new(),
            next_id: INVALID_BRANCH + 1,
        }
    }

    fn allocate_id(&mut self) -> BranchId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, mut branch: Branch, parent: Option<BranchId>) -> BranchId {
        let id = self.allocate_id();
        branch.set_id(id);
        branch.set_parent(parent);
        if let Some(p) = parent {
            self.children.entry(p).or_default().push(id);
        }
        self.branches.insert(id, branch);
        id
    }

    /// Adds a source branch rooted at `root` and pointing along `heading`.
    pub fn add_source_branch(&mut self, root: Point, heading: f64) -> BranchId {
        self.insert(Branch::with_heading(root, heading).as_source(), None)
    }

    /// Adds `initial` as a child of `parent`, translated so its root sits on
    /// the parent's tip. With `parent == INVALID_BRANCH` the branch is added
    /// detached, at its own position.
    ///
    /// A root-only `initial` without a heading inherits the parent's tail
    /// heading.
    pub fn add_branch(&mut self, parent: BranchId, mut initial: Branch) -> GrowthResult<BranchId> {
        if parent == INVALID_BRANCH {
            return Ok(self.insert(initial, None));
        }
        let parent_branch = self
            .branches
            .get(&parent)
            .ok_or(GrowthError::InvalidParent { parent })?;
        if self.sub_branch_ids(parent).len() >= 2 {
            return Err(GrowthError::AlreadyBifurcated { id: parent });
        }
        initial.translate(parent_branch.tail() - initial.head());
        if initial.source_angle().is_none() {
            initial.set_source_angle(parent_branch.tail_angle());
        }
        Ok(self.insert(initial, Some(parent)))
    }

    /// Checks that `parent` may split into `a` and `b` and returns its tail
    /// point and heading. Nothing is mutated.
    pub fn check_bifurcation(
        &self,
        parent: BranchId,
        a: Polar,
        b: Polar,
        eps: f64,
    ) -> GrowthResult<(Point, f64)> {
        let branch = self
            .branches
            .get(&parent)
            .ok_or(GrowthError::InvalidParent { parent })?;
        if self.has_sub_branches(parent) {
            return Err(GrowthError::AlreadyBifurcated { id: parent });
        }
        let angle = normalize_angle(a.phi - b.phi).abs();
        if angle < eps {
            return Err(GrowthError::DegenerateSplit {
                id: parent,
                angle,
                eps,
            });
        }
        let heading = branch
            .tail_angle()
            .ok_or(GrowthError::UndefinedHeading { id: parent })?;
        Ok((branch.tail(), heading))
    }

    /// Splits `parent` into two children rooted at its tail. Each child starts
    /// at heading `tail_angle + offset.phi` and advances `offset.r` along it.
    /// The children inherit the parent's region tag and width.
    pub fn add_sub_branches(
        &mut self,
        parent: BranchId,
        a: Polar,
        b: Polar,
        eps: f64,
    ) -> GrowthResult<(BranchId, BranchId)> {
        let (tail, heading) = self.check_bifurcation(parent, a, b, eps)?;
        let (region_tag, width) = {
            let p = &self.branches[&parent];
            (p.region_tag(), p.width())
        };
        let mut spawn = |offset: Polar| {
            let mut child = Branch::with_heading(tail, heading + offset.phi)
                .with_region_tag(region_tag)
                .with_width(width);
            child.push_absolute_polar(Polar::new(offset.r, heading + offset.phi));
            self.insert(child, Some(parent))
        };
        let left = spawn(a);
        let right = spawn(b);
        Ok((left, right))
    }

    /// Links two detached branches as the children of `parent`.
    pub fn add_branch_relation(
        &mut self,
        parent: BranchId,
        left: BranchId,
        right: BranchId,
    ) -> GrowthResult<()> {
        if !self.is_valid_branch_id(parent) {
            return Err(GrowthError::InvalidParent { parent });
        }
        if self.has_sub_branches(parent) {
            return Err(GrowthError::AlreadyBifurcated { id: parent });
        }
        if left == right {
            return Err(GrowthError::Reconstruction(format!(
                "branch {left} cannot be both children of {parent}"
            )));
        }
        for child in [left, right] {
            self.check_detached(parent, child)?;
        }
        self.link(parent, left);
        self.link(parent, right);
        Ok(())
    }

    fn check_detached(&self, parent: BranchId, child: BranchId) -> GrowthResult<()> {
        let branch = self
            .branches
            .get(&child)
            .ok_or(GrowthError::UnknownBranch { id: child })?;
        if child == parent || branch.parent().is_some() {
            return Err(GrowthError::Reconstruction(format!(
                "branch {child} cannot be re-parented under {parent}"
            )));
        }
        Ok(())
    }

    /// Makes the detached `child` the single child of `parent`.
    pub(crate) fn attach_child(&mut self, parent: BranchId, child: BranchId) -> GrowthResult<()> {
        if !self.is_valid_branch_id(parent) {
            return Err(GrowthError::InvalidParent { parent });
        }
        if self.sub_branch_ids(parent).len() >= 2 {
            return Err(GrowthError::AlreadyBifurcated { id: parent });
        }
        self.check_detached(parent, child)?;
        self.link(parent, child);
        Ok(())
    }

    fn link(&mut self, parent: BranchId, child: BranchId) {
        if let Some(b) = self.branches.get_mut(&child) {
            b.set_parent(Some(parent));
        }
        self.children.entry(parent).or_default().push(child);
    }

    /// Inserts a detached branch under an id it already carries, as done when
    /// rebuilding a tree. The id must be valid and unused.
    pub(crate) fn restore_branch(&mut self, id: BranchId, mut branch: Branch) -> GrowthResult<()> {
        if id == INVALID_BRANCH || self.branches.contains_key(&id) {
            return Err(GrowthError::Reconstruction(format!(
                "branch id {id} is invalid or already in use"
            )));
        }
        branch.set_id(id);
        branch.set_parent(None);
        self.branches.insert(id, branch);
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }

    /// Makes sure ids below `next_id` are never handed out.
    pub(crate) fn reserve_ids(&mut self, next_id: BranchId) {
        self.next_id = self.next_id.max(next_id);
    }

    /// Removes `id` and all of its descendants. Returns the removed ids.
    pub fn delete_branch(&mut self, id: BranchId) -> GrowthResult<Vec<BranchId>> {
        let branch = self
            .branches
            .get(&id)
            .ok_or(GrowthError::UnknownBranch { id })?;
        if let Some(parent) = branch.parent()
            && let Some(siblings) = self.children.get_mut(&parent)
        {
            siblings.retain(|&c| c != id);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        let mut removed = self.delete_sub_branches(id)?;
        self.branches.remove(&id);
        removed.insert(0, id);
        Ok(removed)
    }

    /// Removes every descendant of `id`, turning it back into a tip.
    pub fn delete_sub_branches(&mut self, id: BranchId) -> GrowthResult<Vec<BranchId>> {
        if !self.is_valid_branch_id(id) {
            return Err(GrowthError::UnknownBranch { id });
        }
        let mut removed = Vec::new();
        let mut stack = self.children.remove(&id).unwrap_or_default();
        while let Some(child) = stack.pop() {
            if let Some(grandchildren) = self.children.remove(&child) {
                stack.extend(grandchildren);
            }
            self.branches.remove(&child);
            removed.push(child);
        }
        removed.sort_unstable();
        Ok(removed)
    }

    /// Empties the tree. The id counter keeps running.
    pub fn clear(&mut self) {
        self.branches.clear();
        self.children.clear();
    }

    pub fn is_valid_branch_id(&self, id: BranchId) -> bool {
        id != INVALID_BRANCH && self.branches.contains_key(&id)
    }

    /// Whether `id` has a parent.
    pub fn is_sub_branch(&self, id: BranchId) -> bool {
        self.parent_id(id).is_some()
    }

    pub fn is_source_branch(&self, id: BranchId) -> bool {
        self.branches.get(&id).is_some_and(Branch::is_source)
    }

    pub fn has_sub_branches(&self, id: BranchId) -> bool {
        !self.sub_branch_ids(id).is_empty()
    }

    pub fn parent_id(&self, id: BranchId) -> Option<BranchId> {
        self.branches.get(&id)?.parent()
    }

    pub fn sub_branch_ids(&self, id: BranchId) -> &[BranchId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The other child of this branch's parent.
    pub fn adjacent_branch_id(&self, id: BranchId) -> Option<BranchId> {
        let parent = self.parent_id(id)?;
        self.sub_branch_ids(parent)
            .iter()
            .copied()
            .find(|&c| c != id)
    }

    /// Number of ancestors; a root branch has depth 0.
    pub fn depth(&self, id: BranchId) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.branches.get(&id)?;
        while let Some(parent) = current.parent() {
            current = self.branches.get(&parent)?;
            depth += 1;
        }
        Some(depth)
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(&id)
    }

    pub(crate) fn branch_mut(&mut self, id: BranchId) -> Option<&mut Branch> {
        self.branches.get_mut(&id)
    }

    /// Branches in ascending id order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = BranchId> + '_ {
        self.branches.keys().copied()
    }

    pub fn source_ids(&self) -> Vec<BranchId> {
        self.branches
            .values()
            .filter(|b| b.is_source())
            .map(Branch::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// The id the next inserted branch will get.
    pub fn next_id(&self) -> BranchId {
        self.next_id
    }

    /// Branches without children, ascending.
    pub fn tip_ids(&self) -> Vec<BranchId> {
        self.branches
            .keys()
            .copied()
            .filter(|id| !self.has_sub_branches(*id))
            .collect()
    }

    /// Tail points of [`Tree::tip_ids`], in the same order.
    pub fn tip_points(&self) -> Vec<Point> {
        self.tip_ids()
            .into_iter()
            .filter_map(|id| self.branches.get(&id).map(Branch::tail))
            .collect()
    }

    /// Reverts one growth step on every tip that has more than its root.
    pub fn remove_tip_points(&mut self) {
        for id in self.tip_ids() {
            if let Some(b) = self.branches.get_mut(&id) {
                b.remove_tip_point();
            }
        }
    }
}
