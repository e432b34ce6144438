use nalgebra::{Matrix2, Vector2};

use crate::error::TileFitError;

/// `z = a * (x - cx) + b * (y - cy) + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub a: f64,
    pub b: f64,
    pub cx: f64,
    pub cy: f64,
    pub c: f64,
}

impl Plane {
    pub fn z(&self, x: f64, y: f64) -> f64 {
        self.a * (x - self.cx) + self.b * (y - self.cy) + self.c
    }

    /// Rise over run of the steepest direction.
    pub fn gradient(&self) -> f64 {
        self.a.hypot(self.b)
    }

    pub fn slope_degrees(&self) -> f64 {
        self.gradient().atan().to_degrees()
    }

    pub fn residual(&self, p: &[f64; 3]) -> f64 {
        p[2] - self.z(p[0], p[1])
    }
}

/// Least-squares plane through `points`.
///
/// `Ok(None)` when there are fewer than three points or their horizontal spread is
/// collinear; `Err` when the solution is not finite.
pub fn fit_plane<'a, I>(points: I) -> Result<Option<Plane>, TileFitError>
where
    I: IntoIterator<Item = &'a [f64; 3]>,
    I::IntoIter: Clone,
{
    let iter = points.into_iter();

    let (mut n, mut sx, mut sy, mut sz) = (0usize, 0.0, 0.0, 0.0);
    for p in iter.clone() {
        n += 1;
        sx += p[0];
        sy += p[1];
        sz += p[2];
    }
    if n < 3 {
        return Ok(None);
    }
    let (cx, cy, cz) = (sx / n as f64, sy / n as f64, sz / n as f64);

    let (mut sxx, mut sxy, mut syy, mut sxz, mut syz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in iter {
        let (dx, dy, dz) = (p[0] - cx, p[1] - cy, p[2] - cz);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
        sxz += dx * dz;
        syz += dy * dz;
    }
    if !(sxx.is_finite() && syy.is_finite() && sxz.is_finite() && syz.is_finite()) {
        return Err(TileFitError::NonFinite);
    }

    let det = sxx * syy - sxy * sxy;
    if sxx <= 0.0 || syy <= 0.0 || det <= 1e-9 * sxx * syy {
        return Ok(None);
    }

    let normal = Matrix2::new(sxx, sxy, sxy, syy);
    let Some(inverse) = normal.try_inverse() else {
        return Ok(None);
    };
    let solution = inverse * Vector2::new(sxz, syz);

    let plane = Plane {
        a: solution[0],
        b: solution[1],
        cx,
        cy,
        c: cz,
    };
    if !(plane.a.is_finite() && plane.b.is_finite() && plane.c.is_finite()) {
        return Err(TileFitError::NonFinite);
    }
    Ok(Some(plane))
}

/// Goodness of fit in `0..=1` from the RMS residual relative to the thickness band.
pub fn smoothness(rms: f64, thickness: f64) -> f64 {
    if thickness <= 0.0 {
        return if rms == 0.0 { 1.0 } else { 0.0 };
    }
    let ratio = rms / thickness;
    1.0 / (1.0 + ratio * ratio)
}
