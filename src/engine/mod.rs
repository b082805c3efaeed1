//! # Localization engine contract
//!
//! The pose itself is computed by an external visual-localization engine (feature
//! extraction, matching, geometric verification, PnP). This module only fixes the contract
//! between the request pipeline and that engine:
//!
//! * [`EngineRequest`] – calibration, map data, image bytes and the optional hints,
//! * [`LocalizeEngine`] – one synchronous, blocking call per request,
//! * [`EngineOutcome`] – a raw estimate or the "could not localize" marker.
//!
//! An engine that runs but cannot localize returns [`EngineOutcome::NoEstimate`]; an engine
//! that breaks returns [`LocalizeError::EngineFailure`]. The two are never merged: the first
//! yields the empty pose with HTTP 200, the second a server error.
//!
//! Hints
//! -----------------
//! The beacon signal and the spatial constraint are independent. The request carries exactly
//! the subset the client supplied; engines must not substitute defaults for absent hints.
//!
//! See also
//! ------------
//! * [`invoke`] – Wrapper used by the pipeline, completes the timing breakdown.
//! * [`external_command::ExternalCommandEngine`] – Engine running an external executable.
pub mod external_command;

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use itertools::Itertools;
use nalgebra::Vector3;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    constants::ENGINE_STAGE_TIMINGS,
    localize_errors::LocalizeError,
    registry::{MapConfig, UserConfig},
};

/// Center point and radius restricting the map region searched by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialConstraint {
    pub center: Vector3<f64>,
    pub radius: f64,
}

/// Optional priors forwarded to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalizeHints {
    /// Raw beacon signal string, passed through untouched.
    pub beacon: Option<String>,
    pub spatial: Option<SpatialConstraint>,
}

/// Diagnostics the client asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsFlags {
    pub keypoints: bool,
    pub timing: bool,
}

/// Everything one engine call needs.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub user: Arc<UserConfig>,
    pub map: Arc<MapConfig>,
    pub image: Bytes,
    pub hints: LocalizeHints,
    pub diagnostics: DiagnosticsFlags,
}

/// Raw engine output.
///
/// `pose` holds 12 values (translation then row-major rotation) when the engine localized
/// the image. Diagnostics are only filled when requested.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEstimate {
    #[serde(default)]
    pub pose: Vec<f64>,
    #[serde(default, rename = "keypoints2D")]
    pub keypoints_2d: Option<Vec<Vec<f64>>>,
    #[serde(default, rename = "keypoints3D")]
    pub keypoints_3d: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub inliers: Option<Vec<i64>>,
    #[serde(default)]
    pub times: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    Estimate(RawEstimate),
    NoEstimate,
}

/// A visual-localization engine.
///
/// Implementations are called from a blocking worker thread, one call per request, and may
/// take seconds to return.
pub trait LocalizeEngine: Send + Sync {
    fn localize(&self, request: &EngineRequest) -> Result<EngineOutcome, LocalizeError>;
}

/// Run one engine call and complete its timing breakdown.
///
/// Engines report the duration of their six internal stages. When timings were requested
/// and exactly those six are present, the residual `others` time (wall-clock duration of the
/// call minus the stage sum) is appended, giving the seven labeled values clients expect.
///
/// Arguments
/// -----------------
/// * `engine`: The engine to call.
/// * `request`: The fully validated request.
///
/// Return
/// ----------
/// * The engine outcome, or the engine error unchanged.
pub fn invoke(
    engine: &dyn LocalizeEngine,
    request: &EngineRequest,
) -> Result<EngineOutcome, LocalizeError> {
    info!(user = %request.user.name, map = %request.map.name, "start localize");
    let start = Instant::now();
    let outcome = engine.localize(request)?;
    let elapsed = start.elapsed().as_secs_f64();
    info!(
        user = %request.user.name,
        map = %request.map.name,
        elapsed,
        "finish localize"
    );

    match outcome {
        EngineOutcome::Estimate(mut raw) => {
            if request.diagnostics.timing {
                if let Some(times) = raw.times.as_mut() {
                    if times.len() == ENGINE_STAGE_TIMINGS {
                        let others = elapsed - times.iter().sum::<f64>();
                        times.push(others);
                    }
                    debug!("times : {}", times.iter().join(","));
                }
            }
            Ok(EngineOutcome::Estimate(raw))
        }
        EngineOutcome::NoEstimate => Ok(EngineOutcome::NoEstimate),
    }
}
