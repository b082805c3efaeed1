//! # Constants and type definitions for the localization front-end
//!
//! This module centralizes the **identifiers**, **limits**, **configuration file locations** and
//! **user-facing messages** used throughout the crate.
//!
//! ## Overview
//!
//! - Identifier aliases for users and maps
//! - History bound and timing labels
//! - Configuration discovery constants
//! - Error messages returned to HTTP clients
//!
//! The message strings are part of the external contract: clients match on them, so they
//! must not be reworded.

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Identifier of a registered user (camera owner)
pub type UserId = String;

/// Identifier of a registered map
pub type MapId = String;

// -------------------------------------------------------------------------------------------------
// Limits
// -------------------------------------------------------------------------------------------------

/// Maximum number of entries kept per user history
pub const MAX_USER_HISTORY_LENGTH: usize = 10;

/// Number of values in a flat engine pose (3 translation + 9 rotation)
pub const POSE_VALUES: usize = 12;

/// Labels of the timing breakdown, in the order the engine reports them.
pub const TIMING_LABELS: [&str; 7] = [
    "selectBeacon",
    "selectBow",
    "extFeat",
    "putMatch",
    "geoMatch",
    "PnP",
    "others",
];

/// Number of per-stage timings measured inside the engine (all labels except `others`)
pub const ENGINE_STAGE_TIMINGS: usize = TIMING_LABELS.len() - 1;

// -------------------------------------------------------------------------------------------------
// Configuration discovery
// -------------------------------------------------------------------------------------------------

/// Map registry document, relative to the server base directory
pub const CONFIG_MAP_JSON_FILE: &str = "config/map.json";

/// User registry document, relative to the server base directory
pub const CONFIG_USER_JSON_FILE: &str = "config/user.json";

/// Environment variable pointing to the server base directory
pub const SERVER_PATH_ENV: &str = "VISION_LOCALIZE_SERVER_PATH";

/// Name of the scratch directory created under the system temp directory
pub const TMP_DIR_NAME: &str = "vision-localize-server";

// -------------------------------------------------------------------------------------------------
// User-facing messages
// -------------------------------------------------------------------------------------------------

pub const USER_ID_NOT_SPECIFIED: &str = "User ID is not specified";
pub const USER_ID_NOT_VALID: &str = "User ID is not valid";
pub const MAP_ID_NOT_SPECIFIED: &str = "Map ID is not specified";
pub const MAP_ID_NOT_VALID: &str = "Map ID is not valid";
pub const IMAGE_URL_NOT_SPECIFIED: &str = "Image URL is not specified";
pub const IMAGE_URL_NOT_VALID: &str = "Image URL is not valid";
pub const IMAGE_DATA_NOT_SPECIFIED: &str = "Image data is not specified";
pub const IMAGE_TOO_LARGE: &str = "Image data is too large";
pub const T_NOT_SPECIFIED: &str = "t is not specified";
pub const R_NOT_SPECIFIED: &str = "R is not specified";
pub const T_INVALID: &str = "t is invalid";
pub const R_INVALID: &str = "R is invalid";

/// Body returned after a successful manual history update.
pub const HISTORY_UPDATED_BODY: &str = r#"{"success" : "Updated Successfully", "status" : 200}"#;
