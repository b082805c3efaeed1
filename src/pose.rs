//! # Camera pose
//!
//! A [`Pose`] is the camera position and orientation estimated in map coordinates:
//! a translation vector and a 3×3 rotation matrix.
//!
//! On the wire a pose is always wrapped in an [`Estimate`]:
//!
//! ```text
//! {"t": [x, y, z], "R": [[r00, r01, r02], [r10, r11, r12], [r20, r21, r22]]}   pose found
//! {"t": [], "R": []}                                                            no estimate
//! ```
//!
//! Translation and rotation are either both present or both absent; there is no way to
//! build a half-filled pose.
use nalgebra::{Matrix3, Vector3};
use serde::{ser::SerializeStruct, Serialize, Serializer};

use crate::{
    constants::{POSE_VALUES, R_INVALID, T_INVALID},
    localize_errors::LocalizeError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub t: Vector3<f64>,
    pub r: Matrix3<f64>,
}

impl Pose {
    pub fn new(t: Vector3<f64>, r: Matrix3<f64>) -> Self {
        Pose { t, r }
    }

    /// Build a pose from the flat engine output.
    ///
    /// The first 3 values are the translation, the next 9 the rotation in row-major order.
    ///
    /// Return
    /// ----------
    /// * `None` unless exactly 12 values are given.
    pub fn from_engine_output(values: &[f64]) -> Option<Self> {
        if values.len() != POSE_VALUES {
            return None;
        }
        let t = Vector3::from_column_slice(&values[..3]);
        let r = Matrix3::from_row_slice(&values[3..]);
        Some(Pose { t, r })
    }

    /// Build a pose from a client-submitted translation and flat row-major rotation.
    ///
    /// Return
    /// ----------
    /// * `InvalidInput("t is invalid")` unless `t` has 3 values,
    ///   `InvalidInput("R is invalid")` unless `r` has 9 values.
    pub fn from_parts(t: &[f64], r: &[f64]) -> Result<Self, LocalizeError> {
        if t.len() != 3 {
            return Err(LocalizeError::InvalidInput(T_INVALID.into()));
        }
        if r.len() != 9 {
            return Err(LocalizeError::InvalidInput(R_INVALID.into()));
        }
        Ok(Pose {
            t: Vector3::from_column_slice(t),
            r: Matrix3::from_row_slice(r),
        })
    }

    /// Rotation as three rows of three values.
    pub fn rotation_rows(&self) -> [[f64; 3]; 3] {
        let mut rows = [[0.0; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.r[(i, j)];
            }
        }
        rows
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.t.x, self.t.y, self.t.z]
    }
}

/// The `estimate` field of a response: a pose, or the empty sentinel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Estimate(pub Option<Pose>);

impl Estimate {
    pub fn none() -> Self {
        Estimate(None)
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    pub fn pose(&self) -> Option<&Pose> {
        self.0.as_ref()
    }
}

impl From<Pose> for Estimate {
    fn from(pose: Pose) -> Self {
        Estimate(Some(pose))
    }
}

impl Serialize for Estimate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Estimate", 2)?;
        match &self.0 {
            Some(pose) => {
                state.serialize_field("t", &pose.translation())?;
                state.serialize_field("R", &pose.rotation_rows())?;
            }
            None => {
                let empty: [f64; 0] = [];
                state.serialize_field("t", &empty)?;
                state.serialize_field("R", &empty)?;
            }
        }
        state.end()
    }
}
