use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Measured space point on one detector plane.
///
/// The plane is implied by where the hit is stored (see
/// [`EventHits`](crate::event::EventHits)); hits are immutable for the
/// lifetime of an event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Hit {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<Vector3<f64>> for Hit {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Per-plane residual triple. The sign convention depends on the fitter:
/// the linear fitter reports `model - measured`, the 3D fitter reports
/// `point on line - measured`, which agree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Residual {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Residual {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}
