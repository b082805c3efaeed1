use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::{constants::UserId, localize_errors::LocalizeError};

/// Configuration of one user camera, immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct UserConfig {
    pub name: UserId,
    /// Camera intrinsic matrix file.
    pub k_mat_file: Utf8PathBuf,
    /// Lens distortion coefficients file.
    pub dist_mat_file: Utf8PathBuf,
    /// Factor applied to the query image before localization.
    pub scale_image: f64,
}

/// `scale_image` was historically written either as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScaleValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUserEntry {
    name: Option<String>,
    k_mat_file: Option<Utf8PathBuf>,
    dist_mat_file: Option<Utf8PathBuf>,
    scale_image: Option<ScaleValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserDocument {
    pub(crate) users: Vec<RawUserEntry>,
}

fn parse_scale(value: Option<ScaleValue>, name: &str) -> Result<f64, LocalizeError> {
    let scale = match value {
        None => return Ok(1.0),
        Some(ScaleValue::Number(v)) => v,
        Some(ScaleValue::Text(s)) if s.trim().is_empty() => return Ok(1.0),
        Some(ScaleValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
            LocalizeError::InvalidConfig(format!("scale_image of user {name} is not a number"))
        })?,
    };
    if !scale.is_finite() || scale <= 0.0 {
        return Err(LocalizeError::InvalidConfig(format!(
            "scale_image of user {name} must be a positive number"
        )));
    }
    Ok(scale)
}

impl TryFrom<RawUserEntry> for UserConfig {
    type Error = LocalizeError;

    fn try_from(raw: RawUserEntry) -> Result<Self, Self::Error> {
        let invalid = || {
            LocalizeError::InvalidConfig(
                "invalid user setting json. All user entry should have name, k_mat_file, dist_mat_file."
                    .into(),
            )
        };
        let name = raw.name.filter(|n| !n.is_empty()).ok_or_else(invalid)?;
        let k_mat_file = raw
            .k_mat_file
            .filter(|p| !p.as_str().is_empty())
            .ok_or_else(invalid)?;
        let dist_mat_file = raw
            .dist_mat_file
            .filter(|p| !p.as_str().is_empty())
            .ok_or_else(invalid)?;
        let scale_image = parse_scale(raw.scale_image, &name)?;

        Ok(UserConfig {
            name,
            k_mat_file,
            dist_mat_file,
            scale_image,
        })
    }
}

#[cfg(test)]
mod user_config_test {
    use super::*;

    fn parse(json: &str) -> Result<UserConfig, LocalizeError> {
        let raw: RawUserEntry = serde_json::from_str(json).unwrap();
        UserConfig::try_from(raw)
    }

    #[test]
    fn test_scale_defaults_to_one() {
        let user = parse(r#"{"name":"alice","k_mat_file":"K.yml","dist_mat_file":"D.yml"}"#).unwrap();
        assert_eq!(user.scale_image, 1.0);
    }

    #[test]
    fn test_scale_number_or_string() {
        let user = parse(
            r#"{"name":"bob","k_mat_file":"K.yml","dist_mat_file":"D.yml","scale_image":0.5}"#,
        )
        .unwrap();
        assert_eq!(user.scale_image, 0.5);

        let user = parse(
            r#"{"name":"bob","k_mat_file":"K.yml","dist_mat_file":"D.yml","scale_image":"0.25"}"#,
        )
        .unwrap();
        assert_eq!(user.scale_image, 0.25);
    }

    #[test]
    fn test_invalid_entries() {
        assert!(parse(r#"{"name":"bob","k_mat_file":"K.yml"}"#).is_err());
        assert!(parse(
            r#"{"name":"bob","k_mat_file":"K.yml","dist_mat_file":"D.yml","scale_image":"big"}"#
        )
        .is_err());
        assert!(parse(
            r#"{"name":"bob","k_mat_file":"K.yml","dist_mat_file":"D.yml","scale_image":-2}"#
        )
        .is_err());
    }
}
