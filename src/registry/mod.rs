//! # Registry: map and user configuration lookup
//!
//! The [`Registry`] is the read-only table of known maps and users. It is built once at
//! process start from two JSON documents and then shared by every request behind an `Arc`.
//!
//! Documents
//! -----------------
//! ```text
//! config/map.json   {"maps":  [{"name", "sfm_data_dir", "match_dir", "a_mat_file"}]}
//! config/user.json  {"users": [{"name", "k_mat_file", "dist_mat_file", "scale_image"?}]}
//! ```
//!
//! Each document is searched first under the working directory, then under the directory
//! named by `$VISION_LOCALIZE_SERVER_PATH` (see [`locate_config_file`]). A missing document,
//! malformed JSON, an entry lacking a required field or a duplicated name is an error: the
//! caller is expected to abort startup.
//!
//! Lookups by unknown identifier fail with [`LocalizeError::NotFound`] carrying the
//! user-facing message; they never fall back to a default entry.
pub mod map_config;
pub mod user_config;

use std::{collections::HashMap, fs, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::{
    constants::{
        MapId, UserId, CONFIG_MAP_JSON_FILE, CONFIG_USER_JSON_FILE, MAP_ID_NOT_VALID,
        SERVER_PATH_ENV, USER_ID_NOT_VALID,
    },
    localize_errors::LocalizeError,
};
use map_config::MapDocument;
use user_config::UserDocument;

pub use map_config::MapConfig;
pub use user_config::UserConfig;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    maps: HashMap<MapId, Arc<MapConfig>>,
    users: HashMap<UserId, Arc<UserConfig>>,
}

/// Find a configuration document relative to the working directory or the server base path.
///
/// Arguments
/// -----------------
/// * `file`: Document path relative to a base directory (e.g. `config/map.json`).
/// * `cwd`: The working directory, searched first.
/// * `env_base`: Value of `$VISION_LOCALIZE_SERVER_PATH`, searched second.
///
/// Return
/// ----------
/// * The first existing path, or [`LocalizeError::ConfigNotFound`].
pub fn locate_config_file(
    file: &str,
    cwd: &Utf8Path,
    env_base: Option<&Utf8Path>,
) -> Result<Utf8PathBuf, LocalizeError> {
    let candidates = std::iter::once(cwd).chain(env_base);
    for base in candidates {
        let path = base.join(file);
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(LocalizeError::ConfigNotFound(format!(
        "cannot find {file}. Run the server from its base directory, or set {SERVER_PATH_ENV} to that directory."
    )))
}

impl Registry {
    /// Build a registry from the contents of the two JSON documents.
    ///
    /// Arguments
    /// -----------------
    /// * `map_json`: Content of `config/map.json`.
    /// * `user_json`: Content of `config/user.json`.
    ///
    /// Return
    /// ----------
    /// * The registry, or the first JSON/validation error met.
    pub fn from_json_str(map_json: &str, user_json: &str) -> Result<Self, LocalizeError> {
        let map_doc: MapDocument = serde_json::from_str(map_json)?;
        let user_doc: UserDocument = serde_json::from_str(user_json)?;

        info!("number of loaded maps : {}", map_doc.maps.len());
        let mut maps = HashMap::with_capacity(map_doc.maps.len());
        for (idx, raw) in map_doc.maps.into_iter().enumerate() {
            let map = MapConfig::try_from(raw)?;
            debug!(
                index = idx,
                name = %map.name,
                sfm_data_dir = %map.sfm_data_dir,
                match_dir = %map.match_dir,
                a_mat_file = %map.a_mat_file,
                "map loaded"
            );
            if maps.contains_key(&map.name) {
                return Err(LocalizeError::InvalidConfig(format!(
                    "duplicated map name: {}",
                    map.name
                )));
            }
            maps.insert(map.name.clone(), Arc::new(map));
        }

        info!("number of loaded users : {}", user_doc.users.len());
        let mut users = HashMap::with_capacity(user_doc.users.len());
        for (idx, raw) in user_doc.users.into_iter().enumerate() {
            let user = UserConfig::try_from(raw)?;
            debug!(
                index = idx,
                name = %user.name,
                k_mat_file = %user.k_mat_file,
                dist_mat_file = %user.dist_mat_file,
                scale_image = user.scale_image,
                "user loaded"
            );
            if users.contains_key(&user.name) {
                return Err(LocalizeError::InvalidConfig(format!(
                    "duplicated user name: {}",
                    user.name
                )));
            }
            users.insert(user.name.clone(), Arc::new(user));
        }

        Ok(Registry { maps, users })
    }

    /// Load both documents from explicit file paths.
    pub fn from_files(map_file: &Utf8Path, user_file: &Utf8Path) -> Result<Self, LocalizeError> {
        info!("loading map config from {map_file}");
        let map_json = fs::read_to_string(map_file)?;
        info!("loading user config from {user_file}");
        let user_json = fs::read_to_string(user_file)?;
        Self::from_json_str(&map_json, &user_json)
    }

    /// Load the registry from `<base>/config/map.json` and `<base>/config/user.json`.
    pub fn load(base: &Utf8Path) -> Result<Self, LocalizeError> {
        Self::from_files(
            &base.join(CONFIG_MAP_JSON_FILE),
            &base.join(CONFIG_USER_JSON_FILE),
        )
    }

    /// Locate both documents from the working directory and `$VISION_LOCALIZE_SERVER_PATH`,
    /// then load them.
    pub fn discover() -> Result<Self, LocalizeError> {
        let cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).map_err(|p| {
            LocalizeError::ConfigNotFound(format!(
                "working directory is not valid UTF-8: {}",
                p.display()
            ))
        })?;
        let env_base = std::env::var(SERVER_PATH_ENV).ok().map(Utf8PathBuf::from);

        let map_file = locate_config_file(CONFIG_MAP_JSON_FILE, &cwd, env_base.as_deref())?;
        let user_file = locate_config_file(CONFIG_USER_JSON_FILE, &cwd, env_base.as_deref())?;
        Self::from_files(&map_file, &user_file)
    }

    /// Resolve a user; unknown ids yield `NotFound("User ID is not valid")`.
    pub fn user(&self, user_id: &str) -> Result<&Arc<UserConfig>, LocalizeError> {
        self.users
            .get(user_id)
            .ok_or_else(|| LocalizeError::NotFound(USER_ID_NOT_VALID.into()))
    }

    /// Resolve a map; unknown ids yield `NotFound("Map ID is not valid")`.
    pub fn map(&self, map_id: &str) -> Result<&Arc<MapConfig>, LocalizeError> {
        self.maps
            .get(map_id)
            .ok_or_else(|| LocalizeError::NotFound(MAP_ID_NOT_VALID.into()))
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod registry_test {
    use super::*;

    const MAPS: &str = r#"{"maps":[
        {"name":"office","sfm_data_dir":"/m/sfm","match_dir":"/m/match","a_mat_file":"/m/A.yml"},
        {"name":"lobby","sfm_data_dir":"/l/sfm","match_dir":"/l/match","a_mat_file":"/l/A.yml",
         "dense_ply_file":"/l/dense.ply"}
    ]}"#;
    const USERS: &str = r#"{"users":[
        {"name":"alice","k_mat_file":"/u/K.yml","dist_mat_file":"/u/D.yml"},
        {"name":"bob","k_mat_file":"/u/K.yml","dist_mat_file":"/u/D.yml","scale_image":"0.5"}
    ]}"#;

    #[test]
    fn test_lookup_known_and_unknown() {
        let registry = Registry::from_json_str(MAPS, USERS).unwrap();
        assert_eq!(registry.map_count(), 2);
        assert_eq!(registry.user_count(), 2);

        assert_eq!(registry.user("bob").unwrap().scale_image, 0.5);
        assert_eq!(registry.map("office").unwrap().a_mat_file, "/m/A.yml");
        assert_eq!(
            registry.map("lobby").unwrap().dense_ply_file.as_deref(),
            Some(Utf8Path::new("/l/dense.ply"))
        );
        assert_eq!(
            registry.user("carol").unwrap_err(),
            LocalizeError::NotFound("User ID is not valid".into())
        );
        assert_eq!(
            registry.map("nope").unwrap_err(),
            LocalizeError::NotFound("Map ID is not valid".into())
        );
        assert!(registry.contains_user("alice"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let users = r#"{"users":[
            {"name":"alice","k_mat_file":"K","dist_mat_file":"D"},
            {"name":"alice","k_mat_file":"K2","dist_mat_file":"D2"}
        ]}"#;
        let err = Registry::from_json_str(MAPS, users).unwrap_err();
        assert_eq!(
            err,
            LocalizeError::InvalidConfig("duplicated user name: alice".into())
        );
    }

    #[test]
    fn test_malformed_document() {
        let err = Registry::from_json_str("{\"maps\": 3}", USERS).unwrap_err();
        assert!(matches!(err, LocalizeError::Json(_)));
    }

    #[test]
    fn test_locate_config_file_missing() {
        let err = locate_config_file(
            CONFIG_MAP_JSON_FILE,
            Utf8Path::new("/definitely/not/here"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LocalizeError::ConfigNotFound(_)));
    }

    #[test]
    fn test_locate_config_file_env_fallback() {
        let data = Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data");
        let found = locate_config_file(
            CONFIG_USER_JSON_FILE,
            Utf8Path::new("/definitely/not/here"),
            Some(&data),
        )
        .unwrap();
        assert_eq!(found, data.join(CONFIG_USER_JSON_FILE));
    }
}
