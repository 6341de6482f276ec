//! Mathematical utilities

use crate::constant::PI;
use nalgebra::Vector3;

/// Returns an orthonormal pair `(e1, e2)` perpendicular to `dir`, such that
/// `e1 x e2` points along `dir`.
///
/// `e1` lies in the x-z plane whenever `dir` is not parallel to y, which gives
/// every direction a well-defined polarization basis.
pub fn transverse_basis(dir: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let n = dir.normalize();
    let mag = n[0].hypot(n[2]);
    let e1 = if mag == 0.0 {
        Vector3::x()
    } else {
        Vector3::new(n[2] / mag, 0.0, -n[0] / mag)
    };
    let e2 = n.cross(&e1);
    (e1, e2)
}

/// Tilts the unit vector `dir` by the small angles `(theta_x, theta_y)` measured
/// along the transverse basis of `dir`.
pub fn tilt(dir: &Vector3<f64>, theta_x: f64, theta_y: f64) -> Vector3<f64> {
    let (e1, e2) = transverse_basis(dir);
    (dir.normalize() + e1 * theta_x.tan() + e2 * theta_y.tan()).normalize()
}

/// Returns the small angles `(theta_x, theta_y)` of `vec` with respect to `dir`,
/// the inverse of [tilt].
pub fn tilt_angles(dir: &Vector3<f64>, vec: &Vector3<f64>) -> (f64, f64) {
    let (e1, e2) = transverse_basis(dir);
    let along = vec.dot(&dir.normalize());
    (vec.dot(&e1).atan2(along), vec.dot(&e2).atan2(along))
}

/// A normalised 1D gaussian distribution with zero mean.
pub fn gaussian_1d(std: f64, x: f64) -> f64 {
    (-x * x / (2.0 * std * std)).exp() / ((2.0 * PI).sqrt() * std)
}

/// A normalised gaussian distribution.
///
/// The distribution is normalised such that the 2D area underneath a gaussian dist with sigma_x=sigma_y=std is equal to 1.
pub fn gaussian_dis(std: f64, distance_squared: f64) -> f64 {
    1.0 / (2.0 * PI * std * std) * (-distance_squared / 2.0 / (std * std)).exp()
}

/// A normalised, uncorrelated 2D gaussian distribution with separate widths.
pub fn gaussian_2d(std_x: f64, std_y: f64, x: f64, y: f64) -> f64 {
    gaussian_1d(std_x, x) * gaussian_1d(std_y, y)
}
