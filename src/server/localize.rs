//! `/localize` handlers.
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, Multipart, Query, State,
    },
    Json,
};
use tracing::warn;

use crate::{
    constants::IMAGE_DATA_NOT_SPECIFIED,
    image_source::UploadedImage,
    localize_errors::LocalizeError,
    localizer::{LocalizeQuery, Localizer},
    normalize::LocalizationResult,
};

/// `GET /localize?user=..&map=..&image=<url>[&cx&cy&cz&radius][&beacon][&returnKeypoint][&returnTime]`
///
/// A query string that cannot be read (a repeated key, for instance) is handled as an empty
/// one.
pub async fn localize_url(
    State(localizer): State<Localizer>,
    query: Result<Query<LocalizeQuery>, QueryRejection>,
) -> Result<Json<LocalizationResult>, LocalizeError> {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!("unreadable query string : {rejection}");
            LocalizeQuery::default()
        }
    };
    Ok(Json(localizer.localize_url(query).await?))
}

/// `POST /localize` with a multipart body; the image travels in the `image` file part.
///
/// A body that is not multipart is handled as one without any field, so the usual
/// "not specified" messages apply.
pub async fn localize_upload(
    State(localizer): State<Localizer>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<LocalizationResult>, LocalizeError> {
    let (query, upload) = match multipart {
        Ok(multipart) => read_form(&localizer, multipart).await?,
        Err(rejection) => {
            warn!("not a multipart body : {rejection}");
            (LocalizeQuery::default(), None)
        }
    };
    Ok(Json(localizer.localize_upload(query, upload).await?))
}

fn malformed(err: impl std::fmt::Display) -> LocalizeError {
    warn!("malformed multipart body : {err}");
    LocalizeError::InvalidInput(IMAGE_DATA_NOT_SPECIFIED.into())
}

/// Collect the text fields and stream the image part to the upload directory.
async fn read_form(
    localizer: &Localizer,
    mut multipart: Multipart,
) -> Result<(LocalizeQuery, Option<UploadedImage>), LocalizeError> {
    let params = localizer.params();
    let mut query = LocalizeQuery::default();
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            upload = Some(
                UploadedImage::persist_stream(
                    &params.upload_dir,
                    file_name,
                    field,
                    params.max_image_bytes,
                )
                .await?,
            );
            continue;
        }

        let slot = match name.as_str() {
            "user" => &mut query.user,
            "map" => &mut query.map,
            "cx" => &mut query.cx,
            "cy" => &mut query.cy,
            "cz" => &mut query.cz,
            "radius" => &mut query.radius,
            "beacon" => &mut query.beacon,
            "returnKeypoint" => &mut query.return_keypoint,
            "returnTime" => &mut query.return_time,
            _ => continue,
        };
        *slot = Some(field.text().await.map_err(malformed)?);
    }

    Ok((query, upload))
}
