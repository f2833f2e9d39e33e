use std::fmt::Debug;

use ndarray::{Array3, ArrayD, Axis, IxDyn};
use num_traits::Float;

use crate::container::VarArray;

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("Input arrays were different lengths (x.len() = {x_len}, y.len() = {y_len}")]
    InputLengthMismatch { x_len: usize, y_len: usize },
    #[error(
        "Input arrays were too short, needed at least {req_len} elements but got only {actual_len}"
    )]
    InputTooShort { req_len: usize, actual_len: usize },
    #[error(
        "Requested output coordinate ({out}) falls outside the input domain ({left} to {right})"
    )]
    OutOfDomain {
        left: String,
        right: String,
        out: String,
    },
    #[error("Input x values must be strictly increasing")]
    NotMonotonic,
    #[error("Vertical interpolation requires single precision data, got {0}")]
    WrongType(String),
    #[error("Incompatible array shapes: {0}")]
    ShapeMismatch(String),
}

/// Borrow `data` as single precision for vertical interpolation, or fail with
/// [`InterpolationError::WrongType`].
pub fn single_precision<'a>(
    varname: &str,
    data: &'a VarArray,
) -> Result<&'a ArrayD<f32>, InterpolationError> {
    data.as_f32()
        .ok_or_else(|| InterpolationError::WrongType(format!("{data} for '{varname}'")))
}

pub trait InterpolationMethod {
    fn interp1d<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
    ) -> Result<F, InterpolationError>;

    fn check_1d_inputs<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
        must_be_in_bounds: bool,
        min_len: usize,
    ) -> Result<(), InterpolationError> {
        if input_x.len() != input_y.len() {
            return Err(InterpolationError::InputLengthMismatch {
                x_len: input_x.len(),
                y_len: input_y.len(),
            });
        }

        // Now we know both are the same length, so only need to test 1
        if input_x.len() < min_len {
            return Err(InterpolationError::InputTooShort {
                req_len: min_len,
                actual_len: input_x.len(),
            });
        }

        if must_be_in_bounds {
            let (left_bound, right_bound) = match (
                input_x.iter().copied().reduce(F::min),
                input_x.iter().copied().reduce(F::max),
            ) {
                (Some(l), Some(r)) => (l, r),
                // Only empty inputs give None, which means min_len was 0 and the
                // interpolator must handle that case itself.
                _ => return Ok(()),
            };

            if output_x < left_bound || output_x > right_bound {
                return Err(InterpolationError::OutOfDomain {
                    left: format!("{left_bound:?}"),
                    right: format!("{right_bound:?}"),
                    out: format!("{output_x:?}"),
                });
            }
        }

        Ok(())
    }
}

/// Piecewise linear interpolation. The input x values must be strictly increasing.
/// With extrapolation allowed, values outside the input domain are extended along
/// the first or last segment.
pub struct LinearInterp {
    allow_extrapolation: bool,
}

impl LinearInterp {
    pub fn new(allow_extrapolation: bool) -> Self {
        Self {
            allow_extrapolation,
        }
    }
}

impl InterpolationMethod for LinearInterp {
    fn interp1d<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
    ) -> Result<F, InterpolationError> {
        self.check_1d_inputs(input_x, input_y, output_x, !self.allow_extrapolation, 2)?;
        if input_x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(InterpolationError::NotMonotonic);
        }

        // Index of the left end of the segment to use, clamped so that out-of-domain
        // values use the first or last segment.
        let n_le = input_x.partition_point(|&x| x <= output_x);
        let i = n_le.saturating_sub(1).min(input_x.len() - 2);

        let (x0, x1) = (input_x[i], input_x[i + 1]);
        let (y0, y1) = (input_y[i], input_y[i + 1]);
        Ok(y0 + (y1 - y0) * (output_x - x0) / (x1 - x0))
    }
}

/// Interpolates 3-D fields from native model levels to a fixed set of pressure levels,
/// linearly in pressure, one column at a time.
///
/// Points that cannot be computed get `fill_value`: columns with fewer than two valid
/// levels and, without extrapolation, targets outside the column's pressure range.
/// Input points that are not finite or equal the fill value are ignored.
pub struct VerticalInterpolator {
    method: LinearInterp,
    fill_value: f32,
}

impl VerticalInterpolator {
    pub fn new(allow_extrapolation: bool, fill_value: f32) -> Self {
        Self {
            method: LinearInterp::new(allow_extrapolation),
            fill_value,
        }
    }

    pub fn fill_value(&self) -> f32 {
        self.fill_value
    }

    /// Interpolate `values` to `target_levels`.
    ///
    /// `values` and `pressure` must have the same shape, with at least three axes; the
    /// third from last is the vertical one (i.e. `(..., lev, lat, lon)`). The output
    /// has the same shape except that the vertical axis has `target_levels.len()` elements.
    /// Pressure may increase or decrease along the vertical axis.
    pub fn interp_to_levels(
        &self,
        values: &ArrayD<f32>,
        pressure: &ArrayD<f32>,
        target_levels: &[f32],
    ) -> Result<ArrayD<f32>, InterpolationError> {
        if values.shape() != pressure.shape() {
            return Err(InterpolationError::ShapeMismatch(format!(
                "values have shape {:?} but pressure has shape {:?}",
                values.shape(),
                pressure.shape()
            )));
        }
        let ndim = values.ndim();
        if ndim < 3 {
            return Err(InterpolationError::ShapeMismatch(format!(
                "need at least (lev, lat, lon) axes, got shape {:?}",
                values.shape()
            )));
        }

        let shape = values.shape().to_vec();
        let nlev = shape[ndim - 3];
        let ncol = shape[ndim - 2] * shape[ndim - 1];
        let nouter: usize = shape[..ndim - 3].iter().product();

        let values = values.as_standard_layout();
        let pressure = pressure.as_standard_layout();
        let shape_err = |e: ndarray::ShapeError| InterpolationError::ShapeMismatch(e.to_string());
        let values3 = values.view().into_shape((nouter, nlev, ncol)).map_err(shape_err)?;
        let pressure3 = pressure.view().into_shape((nouter, nlev, ncol)).map_err(shape_err)?;

        let mut out = Array3::from_elem((nouter, target_levels.len(), ncol), self.fill_value);
        let mut column: Vec<(f32, f32)> = Vec::with_capacity(nlev);
        let mut xs: Vec<f32> = Vec::with_capacity(nlev);
        let mut ys: Vec<f32> = Vec::with_capacity(nlev);

        let lanes = out
            .lanes_mut(Axis(1))
            .into_iter()
            .zip(values3.lanes(Axis(1)))
            .zip(pressure3.lanes(Axis(1)));
        for ((mut out_col, v_col), p_col) in lanes {
            column.clear();
            column.extend(
                p_col
                    .iter()
                    .zip(v_col.iter())
                    .filter(|(p, v)| self.is_valid(**p) && self.is_valid(**v))
                    .map(|(p, v)| (*p, *v)),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            column.dedup_by(|a, b| a.0 == b.0);
            if column.len() < 2 {
                continue;
            }

            xs.clear();
            ys.clear();
            xs.extend(column.iter().map(|c| c.0));
            ys.extend(column.iter().map(|c| c.1));

            for (out_val, &target) in out_col.iter_mut().zip(target_levels) {
                match self.method.interp1d(&xs, &ys, target) {
                    Ok(y) => *out_val = y,
                    Err(InterpolationError::OutOfDomain { .. }) => *out_val = self.fill_value,
                    Err(e) => return Err(e),
                }
            }
        }

        let mut out_shape = shape;
        out_shape[ndim - 3] = target_levels.len();
        out.into_shape(IxDyn(&out_shape)).map_err(shape_err)
    }

    fn is_valid(&self, v: f32) -> bool {
        v.is_finite() && v != self.fill_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    #[test]
    fn test_single_precision_check() {
        let f32_data = VarArray::F32(ArrayD::zeros(IxDyn(&[2, 2, 2])));
        assert!(single_precision("T", &f32_data).is_ok());

        let f64_data = VarArray::F64(ArrayD::zeros(IxDyn(&[2, 2, 2])));
        let err = single_precision("T", &f64_data).unwrap_err();
        assert!(matches!(err, InterpolationError::WrongType(ref s) if s == "f64 for 'T'"));
    }

    #[test]
    fn test_linear_error_checks() {
        let interpolator = LinearInterp::new(false);

        let err = interpolator.interp1d(&[1.0, 2.0], &[1.0], 1.5).unwrap_err();
        match err {
            InterpolationError::InputLengthMismatch { x_len, y_len } => {
                assert_eq!(x_len, 2, "x_len in error is incorrect");
                assert_eq!(y_len, 1, "y_len in error is incorrect");
            }
            _ => assert!(
                false,
                "Expected InputLengthMismatch error, did not get that"
            ),
        }

        let err = interpolator.interp1d(&[1.0], &[1.0], 1.0).unwrap_err();
        match err {
            InterpolationError::InputTooShort {
                req_len,
                actual_len,
            } => {
                assert_eq!(req_len, 2, "req_len in error is incorrect");
                assert_eq!(actual_len, 1, "actual_len in error is incorrect");
            }
            _ => assert!(false, "Expected InputTooShort error, did not get that"),
        }

        let err = interpolator
            .interp1d(&[1.0, 2.0], &[2.0, 4.0], 0.0)
            .unwrap_err();
        match err {
            InterpolationError::OutOfDomain { .. } => (),
            _ => assert!(false, "Expected OutOfDomain error, did not get that"),
        }

        let err = interpolator
            .interp1d(&[2.0, 1.0], &[2.0, 4.0], 1.5)
            .unwrap_err();
        match err {
            InterpolationError::NotMonotonic => (),
            _ => assert!(false, "Expected NotMonotonic error, did not get that"),
        }
    }

    #[test]
    fn test_linear_no_extrap() {
        let interpolator = LinearInterp::new(false);
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 4.0, 8.0];

        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 1.25).unwrap(), 2.5);
        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 2.5).unwrap(), 6.0);
        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 3.0).unwrap(), 8.0);
        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 1.0).unwrap(), 2.0);
    }

    #[test]
    fn test_linear_with_extrap() {
        let interpolator = LinearInterp::new(true);
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 4.0, 8.0];

        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 0.0).unwrap(), 0.0);
        assert_abs_diff_eq!(interpolator.interp1d(&x, &y, 4.0).unwrap(), 12.0);
    }

    /// Two columns on three levels; temperature is linear in pressure so interpolation
    /// should be exact.
    fn make_column_inputs(descending: bool) -> (ArrayD<f32>, ArrayD<f32>) {
        let mut p = Array4::<f32>::zeros((1, 3, 1, 2));
        let mut t = Array4::<f32>::zeros((1, 3, 1, 2));
        let levels = if descending {
            [100000.0, 50000.0, 10000.0]
        } else {
            [10000.0, 50000.0, 100000.0]
        };
        for (k, &pk) in levels.iter().enumerate() {
            for c in 0..2 {
                p[[0, k, 0, c]] = pk;
                // 200 K at 100 hPa, 300 K at 1000 hPa, offset by column
                t[[0, k, 0, c]] = 200.0 + (pk - 10000.0) / 900.0 + c as f32;
            }
        }
        (t.into_dyn(), p.into_dyn())
    }

    #[test]
    fn test_vertical_interp() {
        for descending in [false, true] {
            let (t, p) = make_column_inputs(descending);
            let interp = VerticalInterpolator::new(false, 1.0e15);
            let out = interp
                .interp_to_levels(&t, &p, &[100000.0, 92500.0, 85000.0])
                .unwrap();
            assert_eq!(out.shape(), &[1, 3, 1, 2]);
            assert_abs_diff_eq!(out[[0, 0, 0, 0]], 300.0, epsilon = 1e-3);
            assert_abs_diff_eq!(out[[0, 1, 0, 0]], 291.6667, epsilon = 1e-3);
            assert_abs_diff_eq!(out[[0, 2, 0, 1]], 284.3333, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_vertical_fill_and_extrap() {
        let (t, p) = make_column_inputs(false);
        let no_extrap = VerticalInterpolator::new(false, 1.0e15);
        let out = no_extrap.interp_to_levels(&t, &p, &[101000.0]).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 1.0e15);

        let extrap = VerticalInterpolator::new(true, 1.0e15);
        let out = extrap.interp_to_levels(&t, &p, &[101000.0]).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0, 0]], 301.1111, epsilon = 1e-3);
    }

    #[test]
    fn test_vertical_skips_missing_points() {
        let (mut t, p) = make_column_inputs(false);
        t[[0, 1, 0, 0]] = 1.0e15;
        t[[0, 0, 0, 1]] = f32::NAN;
        t[[0, 2, 0, 1]] = f32::NAN;
        let interp = VerticalInterpolator::new(false, 1.0e15);
        let out = interp.interp_to_levels(&t, &p, &[50000.0]).unwrap();
        // Column 0 still has two valid levels and the target is between them
        assert_abs_diff_eq!(out[[0, 0, 0, 0]], 244.4444, epsilon = 1e-3);
        // Column 1 has only one valid level left
        assert_eq!(out[[0, 0, 0, 1]], 1.0e15);
    }

    #[test]
    fn test_vertical_shape_errors() {
        let (t, _) = make_column_inputs(false);
        let interp = VerticalInterpolator::new(true, 1.0e15);
        let bad_p = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 1, 2]));
        let err = interp.interp_to_levels(&t, &bad_p, &[50000.0]).unwrap_err();
        assert!(matches!(err, InterpolationError::ShapeMismatch(_)));

        let flat = ArrayD::<f32>::zeros(IxDyn(&[3, 2]));
        let err = interp.interp_to_levels(&flat, &flat, &[50000.0]).unwrap_err();
        assert!(matches!(err, InterpolationError::ShapeMismatch(_)));
    }
}
