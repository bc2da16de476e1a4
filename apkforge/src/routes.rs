//! HTTP route handlers

use crate::converter::Delivery;
use crate::error::ConvertError;
use crate::workspace::DeliveryCopy;
use crate::{AppResult, AppState};
use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Multipart field carrying the bundle.
pub const UPLOAD_FIELD: &str = "aab";

const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// GET / - upload form
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// POST /generate-apk - convert an uploaded `.aab` and download the APK
///
/// Expects a multipart form with the bundle in the `aab` file field. Other
/// fields are skipped.
pub async fn generate_apk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let limit = state.converter.max_upload_bytes();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "skipping unrelated form field");
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| {
                ConvertError::InvalidInput(format!("field `{}` is not a file upload", UPLOAD_FIELD))
            })?;
        info!(filename = %filename, "received bundle upload");

        let chunks = field.map(move |chunk| chunk.map_err(|err| multipart_error(err, limit)));
        let delivery = state.converter.convert(&filename, chunks).await?;
        return Ok(download_response(delivery));
    }

    Err(ConvertError::InvalidInput(format!(
        "multipart form is missing the `{}` file field",
        UPLOAD_FIELD
    )))
}

fn multipart_error(err: MultipartError, limit: u64) -> ConvertError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::PayloadTooLarge { limit }
    } else {
        ConvertError::InvalidInput(format!("malformed upload: {}", err.body_text()))
    }
}

fn download_response(delivery: Delivery) -> Response {
    let Delivery {
        file,
        filename,
        content_type,
    } = delivery;

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(&filename)),
        (header::CONTENT_LENGTH, file.len().to_string()),
    ];

    (headers, Body::from_stream(stream_delivery(file))).into_response()
}

/// Body stream that owns the delivery copy; the file is removed when the
/// stream is dropped, whether the download finished or the client went away.
fn stream_delivery(file: DeliveryCopy) -> impl Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut reader = tokio::fs::File::open(file.path()).await?;
        let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..read]);
        }
        debug!(path = %file.path().display(), bytes = file.len(), "download body sent");
    }
}

fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_plain_name() {
        assert_eq!(
            content_disposition("MyApp.apk"),
            "attachment; filename=\"MyApp.apk\"; filename*=UTF-8''MyApp.apk"
        );
    }

    #[test]
    fn test_content_disposition_escapes_unsafe_characters() {
        let value = content_disposition("aplicação \"beta\".apk");

        assert!(value.starts_with("attachment; filename=\"aplica__o _beta_.apk\";"));
        assert!(value.ends_with("filename*=UTF-8''aplica%C3%A7%C3%A3o%20%22beta%22.apk"));
    }
}
