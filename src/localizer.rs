//! # Localizer: request orchestration
//!
//! This module defines [`Localizer`], the façade that wires together:
//!
//! 1. **Registry** ([`Registry`]) — read-only map/user configuration.
//! 2. **Environment** ([`LocalizeEnv`]) — shared HTTP client for image URLs.
//! 3. **Engine** ([`LocalizeEngine`]) — the opaque pose estimator, run on blocking workers.
//! 4. **History** ([`HistoryStore`]) — bounded per-user record of results.
//!
//! Every localization request goes through the same linear pipeline, each step
//! short-circuiting to an error response on failure:
//!
//! ```text
//! Validate ─▶ Acquire ─▶ Invoke ─▶ Normalize ─▶ (History append) ─▶ Respond
//! ```
//!
//! Validation order
//! -----------------
//! Presence checks come first, then validity checks:
//!
//! 1. user id present, map id present, image present (404)
//! 2. image URL well-formed (404, URL flow only)
//! 3. user id known, map id known (500)
//! 4. spatial constraint values numeric, when all four are given (404)
//!
//! No step is retried. An engine that cannot localize yields the empty pose, which is a
//! successful answer and is never recorded in the history.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use std::sync::Arc;
//! use vision_localize_server::{
//!     engine::external_command::ExternalCommandEngine, localizer::{LocalizeQuery, Localizer},
//!     params::ServerParams, registry::Registry,
//! };
//!
//! # async fn run() -> Result<(), vision_localize_server::localize_errors::LocalizeError> {
//! let registry = Registry::discover()?;
//! let engine = Arc::new(ExternalCommandEngine::new("/opt/localize/bin/localize", vec![]));
//! let localizer = Localizer::new(registry, engine, ServerParams::default())?;
//!
//! let query = LocalizeQuery {
//!     user: Some("alice".into()),
//!     map: Some("office".into()),
//!     image: Some("https://example.com/query.jpg".into()),
//!     ..Default::default()
//! };
//! let result = localizer.localize_url(query).await?;
//! println!("{}", serde_json::to_string(&result)?);
//! # Ok(()) }
//! ```
use std::sync::Arc;

use nalgebra::Vector3;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::{
    constants::{
        UserId, IMAGE_DATA_NOT_SPECIFIED, IMAGE_URL_NOT_SPECIFIED, MAP_ID_NOT_SPECIFIED,
        R_INVALID, R_NOT_SPECIFIED, T_INVALID, T_NOT_SPECIFIED, USER_ID_NOT_SPECIFIED,
        USER_ID_NOT_VALID,
    },
    engine::{
        self, DiagnosticsFlags, EngineOutcome, EngineRequest, LocalizeEngine, LocalizeHints,
        SpatialConstraint,
    },
    env_state::LocalizeEnv,
    history::{HistoryEntry, HistoryStore},
    image_source::{ImageSource, UploadedImage},
    localize_errors::LocalizeError,
    normalize::{normalize, LocalizationResult},
    params::ServerParams,
    pose::Pose,
    registry::{MapConfig, Registry, UserConfig},
};

/// Untyped localization parameters, as read from a query string or a form body.
///
/// Empty strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalizeQuery {
    pub user: Option<String>,
    pub map: Option<String>,
    /// Image URL, only meaningful for the URL flow.
    pub image: Option<String>,
    pub cx: Option<String>,
    pub cy: Option<String>,
    pub cz: Option<String>,
    pub radius: Option<String>,
    pub beacon: Option<String>,
    #[serde(rename = "returnKeypoint")]
    pub return_keypoint: Option<String>,
    #[serde(rename = "returnTime")]
    pub return_time: Option<String>,
}

/// Body of a manual history submission. `t` and `R` are JSON arrays encoded as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualHistoryForm {
    pub name: Option<String>,
    pub t: Option<String>,
    #[serde(rename = "R")]
    pub r: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_coordinate(value: &str, field: &str) -> Result<f64, LocalizeError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LocalizeError::InvalidInput(format!("{field} is not valid")))
}

impl LocalizeQuery {
    /// The spatial constraint, forwarded only when all of `cx`, `cy`, `cz` and `radius` are
    /// present. A partial group is treated as absent.
    pub fn spatial_constraint(&self) -> Result<Option<SpatialConstraint>, LocalizeError> {
        let (Some(cx), Some(cy), Some(cz), Some(radius)) = (
            present(&self.cx),
            present(&self.cy),
            present(&self.cz),
            present(&self.radius),
        ) else {
            return Ok(None);
        };
        Ok(Some(SpatialConstraint {
            center: Vector3::new(
                parse_coordinate(cx, "cx")?,
                parse_coordinate(cy, "cy")?,
                parse_coordinate(cz, "cz")?,
            ),
            radius: parse_coordinate(radius, "radius")?,
        }))
    }

    /// Diagnostics flags; only the literal `"true"` enables a flag.
    pub fn diagnostics(&self) -> DiagnosticsFlags {
        DiagnosticsFlags {
            keypoints: self.return_keypoint.as_deref() == Some("true"),
            timing: self.return_time.as_deref() == Some("true"),
        }
    }

    pub fn hints(&self) -> Result<LocalizeHints, LocalizeError> {
        Ok(LocalizeHints {
            beacon: present(&self.beacon).map(str::to_string),
            spatial: self.spatial_constraint()?,
        })
    }
}

/// Image reference as received by one of the two entry flows, before validation.
#[derive(Debug)]
pub enum ImageInput {
    Url(Option<String>),
    Upload(Option<UploadedImage>),
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub user: Arc<UserConfig>,
    pub map: Arc<MapConfig>,
    pub hints: LocalizeHints,
    pub diagnostics: DiagnosticsFlags,
}

#[derive(Clone)]
pub struct Localizer {
    registry: Arc<Registry>,
    history: Arc<HistoryStore>,
    engine: Arc<dyn LocalizeEngine>,
    env: LocalizeEnv,
    params: Arc<ServerParams>,
    workers: Arc<Semaphore>,
}

impl Localizer {
    /// Construct a new [`Localizer`].
    ///
    /// Arguments
    /// -----------------
    /// * `registry`: The loaded map/user registry.
    /// * `engine`: The localization engine.
    /// * `params`: Validated service parameters.
    ///
    /// Return
    /// ----------
    /// * The façade, or an error if the HTTP client cannot be built.
    pub fn new(
        registry: Registry,
        engine: Arc<dyn LocalizeEngine>,
        params: ServerParams,
    ) -> Result<Self, LocalizeError> {
        Ok(Localizer {
            registry: Arc::new(registry),
            history: Arc::new(HistoryStore::new(params.history_capacity)),
            engine,
            env: LocalizeEnv::new(params.fetch_timeout)?,
            workers: Arc::new(Semaphore::new(params.max_concurrent_localizations)),
            params: Arc::new(params),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn history_store(&self) -> &HistoryStore {
        &self.history
    }

    pub fn params(&self) -> &ServerParams {
        &self.params
    }

    /// Validate a request, in the documented order.
    ///
    /// Return
    /// ----------
    /// * The resolved request and its image source, or the first failing check.
    pub fn validate(
        &self,
        query: &LocalizeQuery,
        image: ImageInput,
    ) -> Result<(ValidatedRequest, ImageSource), LocalizeError> {
        let user_id = present(&query.user)
            .ok_or_else(|| LocalizeError::InvalidInput(USER_ID_NOT_SPECIFIED.into()))?;
        let map_id = present(&query.map)
            .ok_or_else(|| LocalizeError::InvalidInput(MAP_ID_NOT_SPECIFIED.into()))?;

        let source = match image {
            ImageInput::Url(url) => {
                let url = present(&url)
                    .ok_or_else(|| LocalizeError::InvalidInput(IMAGE_URL_NOT_SPECIFIED.into()))?;
                ImageSource::parse_url(url)?
            }
            ImageInput::Upload(upload) => ImageSource::Upload(upload.ok_or_else(|| {
                LocalizeError::InvalidInput(IMAGE_DATA_NOT_SPECIFIED.into())
            })?),
        };

        let user = Arc::clone(self.registry.user(user_id)?);
        let map = Arc::clone(self.registry.map(map_id)?);

        let request = ValidatedRequest {
            user,
            map,
            hints: query.hints()?,
            diagnostics: query.diagnostics(),
        };
        Ok((request, source))
    }

    /// Localize an image given by URL (`GET /localize`).
    pub async fn localize_url(
        &self,
        query: LocalizeQuery,
    ) -> Result<LocalizationResult, LocalizeError> {
        let image = ImageInput::Url(query.image.clone());
        self.localize(&query, image)
            .await
            .inspect_err(|err| warn!("Error : {err}"))
    }

    /// Localize an uploaded image (`POST /localize`).
    pub async fn localize_upload(
        &self,
        query: LocalizeQuery,
        upload: Option<UploadedImage>,
    ) -> Result<LocalizationResult, LocalizeError> {
        self.localize(&query, ImageInput::Upload(upload))
            .await
            .inspect_err(|err| warn!("Error : {err}"))
    }

    async fn localize(
        &self,
        query: &LocalizeQuery,
        image: ImageInput,
    ) -> Result<LocalizationResult, LocalizeError> {
        let (request, source) = self.validate(query, image)?;

        let image = source.acquire(&self.env, self.params.max_image_bytes).await?;
        drop(source);

        let user_id = request.user.name.clone();
        let flags = request.diagnostics;
        let outcome = self
            .invoke(EngineRequest {
                user: request.user,
                map: request.map,
                image,
                hints: request.hints,
                diagnostics: flags,
            })
            .await?;

        let result = normalize(outcome, flags);
        if result.is_estimate() {
            self.history.append(&user_id, result.clone());
        }
        Ok(result)
    }

    /// Run the engine on a blocking worker, bounded by the worker pool and the engine timeout.
    ///
    /// The worker permit travels with the blocking task, so a call that outlives its timeout
    /// still occupies its slot until the engine returns.
    async fn invoke(&self, request: EngineRequest) -> Result<EngineOutcome, LocalizeError> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| LocalizeError::EngineFailure("localization workers are closed".into()))?;
        let engine = Arc::clone(&self.engine);

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine::invoke(engine.as_ref(), &request)
        });

        match tokio::time::timeout(self.params.engine_timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(LocalizeError::EngineFailure(format!(
                "localization worker failed: {join_err}"
            ))),
            Err(_) => Err(LocalizeError::EngineFailure(format!(
                "localization timed out after {:?}",
                self.params.engine_timeout
            ))),
        }
    }

    /// Record a client-submitted pose (`POST /user/history`).
    ///
    /// Checks, in order: `name`, `t`, `R` present (404); `t`, `R` parse as JSON number arrays
    /// (404); user known (500); `t` has 3 values and `R` has 9 (404).
    pub fn add_manual_history(&self, form: &ManualHistoryForm) -> Result<(), LocalizeError> {
        let result = self.manual_entry(form);
        match result {
            Ok((user_id, entry)) => {
                self.history.append(user_id, entry);
                Ok(())
            }
            Err(err) => {
                warn!("Error : {err}");
                Err(err)
            }
        }
    }

    fn manual_entry<'a>(
        &self,
        form: &'a ManualHistoryForm,
    ) -> Result<(&'a str, HistoryEntry), LocalizeError> {
        let user_id = present(&form.name)
            .ok_or_else(|| LocalizeError::InvalidInput(USER_ID_NOT_SPECIFIED.into()))?;
        let t_raw = present(&form.t)
            .ok_or_else(|| LocalizeError::InvalidInput(T_NOT_SPECIFIED.into()))?;
        let r_raw = present(&form.r)
            .ok_or_else(|| LocalizeError::InvalidInput(R_NOT_SPECIFIED.into()))?;

        let t: Vec<f64> = serde_json::from_str(t_raw)
            .map_err(|_| LocalizeError::InvalidInput(T_INVALID.into()))?;
        let r: Vec<f64> = serde_json::from_str(r_raw)
            .map_err(|_| LocalizeError::InvalidInput(R_INVALID.into()))?;

        if !self.registry.contains_user(user_id) {
            return Err(LocalizeError::NotFound(USER_ID_NOT_VALID.into()));
        }
        let pose = Pose::from_parts(&t, &r)?;
        Ok((user_id, LocalizationResult::manual(pose)))
    }

    /// History of a user (`GET /user/history`).
    pub fn history(&self, name: Option<&str>) -> Result<Vec<HistoryEntry>, LocalizeError> {
        let user_id = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LocalizeError::InvalidInput(USER_ID_NOT_SPECIFIED.into()))?;
        self.history
            .get(user_id)
            .inspect_err(|err| warn!("Error : {err}"))
    }

    /// Users with at least one history entry (`GET /user/list`).
    pub fn users(&self) -> Vec<UserId> {
        self.history.list_users()
    }
}

#[cfg(test)]
mod localizer_test {
    use super::*;
    use crate::engine::RawEstimate;

    const MAPS: &str = r#"{"maps":[{"name":"office","sfm_data_dir":"/m/sfm","match_dir":"/m/match",
        "a_mat_file":"/m/A.yml"}]}"#;
    const USERS: &str =
        r#"{"users":[{"name":"alice","k_mat_file":"/u/K.yml","dist_mat_file":"/u/D.yml"}]}"#;

    struct IdentityEngine;

    impl LocalizeEngine for IdentityEngine {
        fn localize(&self, _request: &EngineRequest) -> Result<EngineOutcome, LocalizeError> {
            Ok(EngineOutcome::Estimate(RawEstimate {
                pose: vec![1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                ..Default::default()
            }))
        }
    }

    fn localizer() -> Localizer {
        let registry = Registry::from_json_str(MAPS, USERS).unwrap();
        Localizer::new(registry, Arc::new(IdentityEngine), ServerParams::default()).unwrap()
    }

    fn query(user: &str, map: &str, image: &str) -> LocalizeQuery {
        LocalizeQuery {
            user: Some(user.into()),
            map: Some(map.into()),
            image: Some(image.into()),
            ..Default::default()
        }
    }

    fn validate_err(localizer: &Localizer, q: &LocalizeQuery) -> LocalizeError {
        localizer
            .validate(q, ImageInput::Url(q.image.clone()))
            .unwrap_err()
    }

    #[test]
    fn test_validation_order() {
        let loc = localizer();
        let url = "https://example.com/q.jpg";

        let cases = [
            (query("", "nope", ""), LocalizeError::InvalidInput("User ID is not specified".into())),
            (query("bob", "", ""), LocalizeError::InvalidInput("Map ID is not specified".into())),
            (query("bob", "nope", ""), LocalizeError::InvalidInput("Image URL is not specified".into())),
            (query("bob", "nope", "nonsense"), LocalizeError::InvalidInput("Image URL is not valid".into())),
            (query("bob", "nope", url), LocalizeError::NotFound("User ID is not valid".into())),
            (query("alice", "nope", url), LocalizeError::NotFound("Map ID is not valid".into())),
        ];
        for (q, expected) in cases {
            assert_eq!(validate_err(&loc, &q), expected);
        }

        let err = loc
            .validate(&query("alice", "office", ""), ImageInput::Upload(None))
            .unwrap_err();
        assert_eq!(
            err,
            LocalizeError::InvalidInput("Image data is not specified".into())
        );
    }

    #[test]
    fn test_spatial_group_is_all_or_nothing() {
        let loc = localizer();
        let mut q = query("alice", "office", "https://example.com/q.jpg");
        q.cx = Some("1".into());
        q.cy = Some("2".into());
        let (request, _) = loc.validate(&q, ImageInput::Url(q.image.clone())).unwrap();
        assert_eq!(request.hints, LocalizeHints::default());

        q.cz = Some("3".into());
        q.radius = Some("4.5".into());
        q.beacon = Some("beacon-signal".into());
        let (request, _) = loc.validate(&q, ImageInput::Url(q.image.clone())).unwrap();
        assert_eq!(
            request.hints,
            LocalizeHints {
                beacon: Some("beacon-signal".into()),
                spatial: Some(SpatialConstraint {
                    center: Vector3::new(1.0, 2.0, 3.0),
                    radius: 4.5
                }),
            }
        );

        q.radius = Some("far".into());
        assert_eq!(
            validate_err(&loc, &q),
            LocalizeError::InvalidInput("radius is not valid".into())
        );
    }

    #[test]
    fn test_diagnostics_flags() {
        let mut q = LocalizeQuery::default();
        assert_eq!(q.diagnostics(), DiagnosticsFlags::default());
        q.return_keypoint = Some("true".into());
        q.return_time = Some("yes".into());
        assert_eq!(
            q.diagnostics(),
            DiagnosticsFlags {
                keypoints: true,
                timing: false
            }
        );
    }

    #[tokio::test]
    async fn test_upload_flow_records_history() {
        let loc = localizer();
        let dir = loc.params().upload_dir.join("localizer-test");
        let upload = UploadedImage::persist_stream(
            &dir,
            None,
            tokio_stream::iter(vec![Ok::<_, std::convert::Infallible>(bytes::Bytes::from_static(
                b"jpeg",
            ))]),
            None,
        )
        .await
        .unwrap();

        let result = loc
            .localize_upload(query("alice", "office", ""), Some(upload))
            .await
            .unwrap();
        assert!(result.is_estimate());
        assert_eq!(loc.users(), vec!["alice".to_string()]);
        assert_eq!(loc.history(Some("alice")).unwrap(), vec![result]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_manual_history() {
        let loc = localizer();
        let form = |name: &str, t: &str, r: &str| ManualHistoryForm {
            name: Some(name.into()),
            t: Some(t.into()),
            r: Some(r.into()),
        };
        let r9 = "[1,0,0,0,1,0,0,0,1]";

        assert_eq!(
            loc.add_manual_history(&form("alice", "[1,2]", r9)).unwrap_err(),
            LocalizeError::InvalidInput("t is invalid".into())
        );
        assert_eq!(
            loc.add_manual_history(&form("alice", "[1,2,3]", "[0,0,0,0,0,0,0,0,0,0]"))
                .unwrap_err(),
            LocalizeError::InvalidInput("R is invalid".into())
        );
        assert_eq!(
            loc.add_manual_history(&form("carol", "[1,2,3]", r9)).unwrap_err(),
            LocalizeError::NotFound("User ID is not valid".into())
        );
        assert_eq!(
            loc.add_manual_history(&form("alice", "", r9)).unwrap_err(),
            LocalizeError::InvalidInput("t is not specified".into())
        );

        loc.add_manual_history(&form("alice", "[1,2,3]", r9)).unwrap();
        let history = loc.history(Some("alice")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].estimate.pose().unwrap().translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_history_lookup_errors() {
        let loc = localizer();
        assert_eq!(
            loc.history(None).unwrap_err(),
            LocalizeError::InvalidInput("User ID is not specified".into())
        );
        assert_eq!(
            loc.history(Some("")).unwrap_err(),
            LocalizeError::InvalidInput("User ID is not specified".into())
        );
        assert_eq!(
            loc.history(Some("alice")).unwrap_err(),
            LocalizeError::NotFound("User ID is not valid".into())
        );
    }
}
