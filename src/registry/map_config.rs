use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::{constants::MapId, localize_errors::LocalizeError};

/// Configuration of one map, immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub name: MapId,
    /// Directory holding the reconstruction (structure) data.
    pub sfm_data_dir: Utf8PathBuf,
    /// Directory holding the feature match data.
    pub match_dir: Utf8PathBuf,
    /// Affine transform from the reconstruction frame to the map frame.
    pub a_mat_file: Utf8PathBuf,
    /// Point-cloud visualization files. Recorded with the map, never served.
    pub structure_ply_file: Option<Utf8PathBuf>,
    pub camera_ply_file: Option<Utf8PathBuf>,
    pub dense_ply_file: Option<Utf8PathBuf>,
}

/// Map entry as written in `config/map.json`, before validation.
///
/// Unknown keys of an entry are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMapEntry {
    name: Option<String>,
    sfm_data_dir: Option<Utf8PathBuf>,
    match_dir: Option<Utf8PathBuf>,
    a_mat_file: Option<Utf8PathBuf>,
    #[serde(default)]
    structure_ply_file: Option<Utf8PathBuf>,
    #[serde(default)]
    camera_ply_file: Option<Utf8PathBuf>,
    #[serde(default)]
    dense_ply_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MapDocument {
    pub(crate) maps: Vec<RawMapEntry>,
}

fn required(value: Option<Utf8PathBuf>) -> Option<Utf8PathBuf> {
    value.filter(|p| !p.as_str().is_empty())
}

impl TryFrom<RawMapEntry> for MapConfig {
    type Error = LocalizeError;

    fn try_from(raw: RawMapEntry) -> Result<Self, Self::Error> {
        let invalid = || {
            LocalizeError::InvalidConfig(
                "invalid map setting json. All map entry should have name, sfm_data_dir, match_dir, a_mat_file."
                    .into(),
            )
        };
        let name = raw.name.filter(|n| !n.is_empty()).ok_or_else(invalid)?;

        Ok(MapConfig {
            sfm_data_dir: required(raw.sfm_data_dir).ok_or_else(invalid)?,
            match_dir: required(raw.match_dir).ok_or_else(invalid)?,
            a_mat_file: required(raw.a_mat_file).ok_or_else(invalid)?,
            structure_ply_file: required(raw.structure_ply_file),
            camera_ply_file: required(raw.camera_ply_file),
            dense_ply_file: required(raw.dense_ply_file),
            name,
        })
    }
}
