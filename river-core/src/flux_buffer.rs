use glam::DVec2;

use crate::stencil::Side;

/// Per-tip accumulator for the field samples taken around each tip.
///
/// For each slot (the position of a tip in the iteration's tip list) this
/// buffer stores:
///
/// - The weighted sum of the sampled gradients.
/// - The integrated flux `Σ w·|∇u|`, in total and split by side of the heading.
/// - The number of samples that fell inside the field's support.
///
/// Slots are plain indices, so the buffer is sized once per iteration with
/// [`FluxBuffer::ensure_len`] and then filled in tip order.
#[derive(Debug, Default)]
pub struct FluxBuffer {
    /// Weighted gradient sum per slot.
    gradient: Vec<DVec2>,
    /// Weight sum per slot, used to average the gradient.
    weight: Vec<f64>,
    pub flux: Vec<f64>,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub count: Vec<u32>,
}

impl FluxBuffer {
    /// Creates a new [`FluxBuffer`] with `len` zeroed slots.
    ///
    /// ### Parameters
    /// - `len` - Number of tips this buffer can hold samples for.
    pub fn with_len(len: usize) -> Self {
        Self {
            gradient: vec![DVec2::ZERO; len],
            weight: vec![0.0; len],
            flux: vec![0.0; len],
            left: vec![0.0; len],
            right: vec![0.0; len],
            count: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.count.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count.is_empty()
    }

    /// Resizes the buffer to `len` slots and clears every slot, even if the
    /// length was already correct.
    ///
    /// ### Parameters
    /// - `len` - Desired number of slots.
    pub fn ensure_len(&mut self, len: usize) {
        if self.len() != len {
            self.gradient.resize(len, DVec2::ZERO);
            self.weight.resize(len, 0.0);
            self.flux.resize(len, 0.0);
            self.left.resize(len, 0.0);
            self.right.resize(len, 0.0);
            self.count.resize(len, 0);
        }
        self.clear();
    }

    /// Zeroes every slot without changing the length.
    pub fn clear(&mut self) {
        self.gradient.fill(DVec2::ZERO);
        self.weight.fill(0.0);
        self.flux.fill(0.0);
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.count.fill(0);
    }

    /// Adds one weighted gradient sample to `slot`.
    ///
    /// ### Parameters
    /// - `slot` - Tip slot (used as an index).
    /// - `gradient` - Field gradient at the sample point.
    /// - `weight` - Quadrature weight of the sample.
    /// - `side` - Side of the tip heading the sample lies on.
    ///
    /// ### Panics
    /// Panics if `slot` is out of bounds.
    #[inline]
    pub fn add(&mut self, slot: usize, gradient: DVec2, weight: f64, side: Side) {
        let flux = weight * gradient.length();
        self.gradient[slot] += gradient * weight;
        self.weight[slot] += weight;
        self.flux[slot] += flux;
        match side {
            Side::Left => self.left[slot] += flux,
            Side::Right => self.right[slot] += flux,
            Side::Ahead => {}
        }
        self.count[slot] += 1;
    }

    /// Weight-averaged gradient of `slot`, `DVec2::ZERO` if nothing was sampled.
    #[inline]
    pub fn avg_gradient(&self, slot: usize) -> DVec2 {
        if self.weight[slot] > 0.0 {
            self.gradient[slot] / self.weight[slot]
        } else {
            DVec2::ZERO
        }
    }

    /// Ratio of the larger to the smaller side flux of `slot`.
    ///
    /// ### Returns
    /// `1.0` when both sides are empty, `f64::INFINITY` when only one is.
    pub fn asymmetry(&self, slot: usize) -> f64 {
        let (l, r) = (self.left[slot], self.right[slot]);
        let (hi, lo) = if l >= r { (l, r) } else { (r, l) };
        if hi == 0.0 {
            1.0
        } else if lo == 0.0 {
            f64::INFINITY
        } else {
            hi / lo
        }
    }

    /// Largest integrated flux over all slots, `0.0` for an empty buffer.
    pub fn max_flux(&self) -> f64 {
        self.flux.iter().copied().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_len_starts_empty() {
        let buf = FluxBuffer::with_len(3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.count, vec![0; 3]);
        assert_eq!(buf.avg_gradient(1), DVec2::ZERO);
        assert_eq!(buf.max_flux(), 0.0);
    }

    #[test]
    fn ensure_len_resizes_and_clears() {
        let mut buf = FluxBuffer::with_len(2);
        buf.add(1, DVec2::X, 1.0, Side::Left);
        assert_eq!(buf.count[1], 1);

        buf.ensure_len(2);
        assert_eq!(buf.count[1], 0);
        assert_eq!(buf.avg_gradient(1), DVec2::ZERO);

        buf.ensure_len(5);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.flux, vec![0.0; 5]);
    }

    #[test]
    fn add_splits_flux_by_side() {
        let mut buf = FluxBuffer::with_len(1);
        buf.add(0, DVec2::new(0.0, 2.0), 0.5, Side::Left);
        buf.add(0, DVec2::new(0.0, 4.0), 0.5, Side::Right);
        buf.add(0, DVec2::new(3.0, 4.0), 1.0, Side::Ahead);

        assert_eq!(buf.count[0], 3);
        assert!((buf.left[0] - 1.0).abs() < 1e-12);
        assert!((buf.right[0] - 2.0).abs() < 1e-12);
        assert!((buf.flux[0] - 8.0).abs() < 1e-12);
        assert!((buf.asymmetry(0) - 2.0).abs() < 1e-12);
        // (0.5*(0,2) + 0.5*(0,4) + (3,4)) / 2
        assert!((buf.avg_gradient(0) - DVec2::new(1.5, 3.5)).length() < 1e-12);
    }

    #[test]
    fn asymmetry_edge_cases() {
        let mut buf = FluxBuffer::with_len(2);
        assert_eq!(buf.asymmetry(0), 1.0);
        buf.add(1, DVec2::X, 1.0, Side::Right);
        assert_eq!(buf.asymmetry(1), f64::INFINITY);
    }

    #[test]
    fn max_flux_and_clear() {
        let mut buf = FluxBuffer::with_len(4);
        buf.add(0, DVec2::X, 1.0, Side::Left);
        buf.add(2, DVec2::X, 3.0, Side::Right);
        assert_eq!(buf.count, vec![1, 0, 1, 0]);
        assert_eq!(buf.max_flux(), 3.0);

        buf.clear();
        assert_eq!(buf.count, vec![0; 4]);
        assert_eq!(buf.max_flux(), 0.0);
    }
}
