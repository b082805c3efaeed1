//! # Result normalization
//!
//! Maps the raw engine output onto the public response schema:
//!
//! ```text
//! {
//!   "estimate":        {"t": [..3], "R": [[..3], [..3], [..3]]}   or {"t": [], "R": []}
//!   "keypoints2D":     [[x, y], ...]          (optional)
//!   "keypoints3D":     [[x, y, z], ...]       (optional)
//!   "inlierKeypoints": [i, ...]               (optional)
//!   "times":           {"selectBeacon", "selectBow", "extFeat", "putMatch",
//!                       "geoMatch", "PnP", "others"}   (optional)
//! }
//! ```
//!
//! Diagnostics appear only when the client asked for them **and** the engine produced them.
//! A timing breakdown of the wrong length is dropped rather than reported as an error.
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    constants::TIMING_LABELS,
    engine::{DiagnosticsFlags, EngineOutcome, RawEstimate},
    pose::{Estimate, Pose},
};

/// Per-stage durations of one localization, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timings {
    #[serde(rename = "selectBeacon")]
    pub select_beacon: f64,
    #[serde(rename = "selectBow")]
    pub select_bow: f64,
    #[serde(rename = "extFeat")]
    pub ext_feat: f64,
    #[serde(rename = "putMatch")]
    pub put_match: f64,
    #[serde(rename = "geoMatch")]
    pub geo_match: f64,
    #[serde(rename = "PnP")]
    pub pnp: f64,
    pub others: f64,
}

impl Timings {
    /// Build the labeled record from the engine's ordered values.
    ///
    /// Return
    /// ----------
    /// * `None` unless exactly one value per label is given.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let [select_beacon, select_bow, ext_feat, put_match, geo_match, pnp, others] =
            <[f64; TIMING_LABELS.len()]>::try_from(values).ok()?;
        Some(Timings {
            select_beacon,
            select_bow,
            ext_feat,
            put_match,
            geo_match,
            pnp,
            others,
        })
    }
}

/// One localization answer, also the unit stored in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalizationResult {
    pub estimate: Estimate,
    #[serde(rename = "keypoints2D", skip_serializing_if = "Option::is_none")]
    pub keypoints_2d: Option<Vec<Vec<f64>>>,
    #[serde(rename = "keypoints3D", skip_serializing_if = "Option::is_none")]
    pub keypoints_3d: Option<Vec<Vec<f64>>>,
    #[serde(rename = "inlierKeypoints", skip_serializing_if = "Option::is_none")]
    pub inlier_keypoints: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<Timings>,
}

impl LocalizationResult {
    /// The empty-pose sentinel.
    pub fn no_estimate() -> Self {
        LocalizationResult {
            estimate: Estimate::none(),
            keypoints_2d: None,
            keypoints_3d: None,
            inlier_keypoints: None,
            times: None,
        }
    }

    /// A pose submitted by a client, without diagnostics.
    pub fn manual(pose: Pose) -> Self {
        LocalizationResult {
            estimate: pose.into(),
            ..Self::no_estimate()
        }
    }

    /// Whether this result carries a pose (and therefore belongs in the history).
    pub fn is_estimate(&self) -> bool {
        self.estimate.is_some()
    }
}

fn from_raw(raw: RawEstimate, flags: DiagnosticsFlags) -> LocalizationResult {
    let Some(pose) = Pose::from_engine_output(&raw.pose) else {
        info!(
            "localization failed, engine returned {} pose values",
            raw.pose.len()
        );
        return LocalizationResult::no_estimate();
    };
    info!("localization succeeded");
    debug!("estimate : {}", raw.pose.iter().join(","));

    let mut result = LocalizationResult::manual(pose);
    if flags.keypoints {
        result.keypoints_2d = raw.keypoints_2d;
        result.keypoints_3d = raw.keypoints_3d;
        result.inlier_keypoints = raw.inliers;
    }
    if flags.timing {
        result.times = raw.times.as_deref().and_then(Timings::from_values);
        if let Some(times) = &result.times {
            debug!(?times, "timings");
        }
    }
    result
}

/// Convert an engine outcome into the public result.
///
/// Arguments
/// -----------------
/// * `outcome`: What the engine returned.
/// * `flags`: Diagnostics requested by the client.
///
/// Return
/// ----------
/// * The normalized result; a pose of the wrong length becomes the empty-pose sentinel.
pub fn normalize(outcome: EngineOutcome, flags: DiagnosticsFlags) -> LocalizationResult {
    match outcome {
        EngineOutcome::Estimate(raw) => from_raw(raw, flags),
        EngineOutcome::NoEstimate => {
            info!("localization failed");
            LocalizationResult::no_estimate()
        }
    }
}
