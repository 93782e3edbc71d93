use glam::DVec2;

/// A position (or displacement) in the simulation plane.
pub type Point = DVec2;

/// Identifier for a branch in a [`crate::tree::Tree`].
///
/// Ids are handed out monotonically by the tree that owns the branch and are
/// never reused, even after the branch is deleted.
pub type BranchId = usize;

/// Sentinel id meaning "no such branch". Never a valid key in a tree.
pub const INVALID_BRANCH: BranchId = 0;

/// Region label attached to branches and boundary loops, used for mesh sizing.
pub type RegionTag = u32;

/// Region tag used for the outer frame and holes unless a loop overrides it.
pub const FRAME_REGION: RegionTag = 0;

/// Region tag given to branches unless they override it.
pub const RIVER_REGION: RegionTag = 1;
