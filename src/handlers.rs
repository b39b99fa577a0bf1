use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use log::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{PingResponse, PredictionResponse};
use crate::state::AppState;

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ping").route(web::get().to(ping)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(PingResponse::alive())
}

pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();

    match run_predict(state, &mut payload).await {
        Ok(response) => {
            info!(
                "[{}] predicted {} ({:.4})",
                request_id, response.prediction, response.confidence
            );
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) if e.is_client_error() => {
            warn!("[{}] rejected upload: {}", request_id, e);
            Err(e)
        }
        Err(e) => {
            error!("[{}] prediction failed: {:?}: {}", request_id, e, e);
            Err(e)
        }
    }
}

async fn run_predict(
    state: web::Data<AppState>,
    payload: &mut Multipart,
) -> Result<PredictionResponse, ApiError> {
    let bytes = read_image_field(payload, state.max_upload_bytes).await?;

    let result = web::block(move || state.classify(&bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(result.into())
}

/// Reads the `file` field into memory. The media type is checked before any
/// of the field body is read.
async fn read_image_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(item) = payload.next().await {
        let mut field = item?;
        if field.content_disposition().get_name() != Some(FILE_FIELD) {
            continue;
        }

        if !field.content_type().essence_str().starts_with("image/") {
            return Err(ApiError::NotAnImage);
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            if bytes.len() + data.len() > limit {
                return Err(ApiError::PayloadTooLarge { limit });
            }
            bytes.extend_from_slice(&data);
        }
        return Ok(bytes);
    }

    Err(ApiError::MissingFile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, ClassifierError, ProbabilityVector};
    use crate::config::AppConfig;
    use crate::error::INTERNAL_DETAIL;
    use crate::preprocess::tests::{encode, png_rgb};
    use crate::preprocess::ImageTensor;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use ndarray::Axis;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const BOUNDARY: &str = "potato-serve-test-boundary";

    enum Behaviour {
        Fixed(Vec<f32>),
        ChannelMeans,
        Fail,
    }

    struct FakeClassifier {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeClassifier {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for FakeClassifier {
        fn infer(&self, batch: &[ImageTensor]) -> Result<Vec<ProbabilityVector>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            batch
                .iter()
                .map(|tensor| match &self.behaviour {
                    Behaviour::Fixed(scores) => Ok(scores.clone()),
                    Behaviour::ChannelMeans => {
                        let means = tensor
                            .mean_axis(Axis(0))
                            .and_then(|m| m.mean_axis(Axis(0)))
                            .ok_or_else(|| ClassifierError::Inference("empty".to_string()))?;
                        let total: f32 = means.sum().max(f32::EPSILON);
                        Ok(means.iter().map(|m| m / total).collect())
                    }
                    Behaviour::Fail => Err(ClassifierError::Inference(
                        "graph evaluation failed".to_string(),
                    )),
                })
                .collect()
        }
    }

    fn state_with(classifier: Arc<FakeClassifier>) -> AppState {
        AppState::new(classifier, &AppConfig::from_yaml("{}").unwrap())
    }

    fn multipart(field: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        let head = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"leaf\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        );
        body.extend_from_slice(head.as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    async fn post_predict(
        state: AppState,
        field: &str,
        content_type: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let (ct, body) = multipart(field, content_type, data);
        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::CONTENT_TYPE, ct))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let json: Value = test::read_body_json(resp).await;
        (status, json)
    }

    #[actix_rt::test]
    async fn test_ping() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with(FakeClassifier::new(Behaviour::Fail))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json: Value = test::read_body_json(resp).await;
        assert_eq!(
            json,
            json!({"status": "alive", "message": "Model serving API is running"})
        );
    }

    #[actix_rt::test]
    async fn test_predict_success() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let (status, json) =
            post_predict(state_with(fake.clone()), "file", "image/png", &png_rgb(300, 200)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["prediction"], "Late Blight");
        assert!((json["confidence"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(
            json["advice"],
            "URGENT: Remove and destroy infected plants. Use fungicides with mancozeb."
        );

        let probs = json["class_probabilities"].as_object().unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs["Early Blight"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert!((probs["Healthy"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(fake.calls(), 1);
    }

    #[actix_rt::test]
    async fn test_non_image_rejected_without_inference() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let (status, json) =
            post_predict(state_with(fake.clone()), "file", "text/plain", b"hello").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({"detail": "File must be an image"}));
        assert_eq!(fake.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_empty_image_is_bad_request() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let (status, json) =
            post_predict(state_with(fake.clone()), "file", "image/jpeg", b"").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].as_str().unwrap().starts_with("Invalid image"));
        assert_eq!(fake.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_corrupt_image_is_bad_request() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let (status, json) = post_predict(
            state_with(fake.clone()),
            "file",
            "image/png",
            b"\x89PNG\r\n\x1a\nnot really",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].as_str().unwrap().starts_with("Invalid image"));
        assert_eq!(fake.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_missing_file_field() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let (status, json) =
            post_predict(state_with(fake.clone()), "picture", "image/png", &png_rgb(4, 4)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({"detail": "No file uploaded"}));
        assert_eq!(fake.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_upload_limit() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.1, 0.7, 0.2]));
        let mut state = state_with(fake.clone());
        state.max_upload_bytes = 16;

        let (status, json) = post_predict(state, "file", "image/png", &png_rgb(32, 32)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            json,
            json!({"detail": "File exceeds the maximum upload size of 16 bytes"})
        );
        assert_eq!(fake.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_inference_failure_is_generic_500() {
        let fake = FakeClassifier::new(Behaviour::Fail);
        let (status, json) =
            post_predict(state_with(fake.clone()), "file", "image/png", &png_rgb(8, 8)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, json!({ "detail": INTERNAL_DETAIL }));
        assert_eq!(fake.calls(), 1);
    }

    #[actix_rt::test]
    async fn test_catalog_mismatch_is_500() {
        let fake = FakeClassifier::new(Behaviour::Fixed(vec![0.4, 0.6]));
        let (status, json) =
            post_predict(state_with(fake), "file", "image/png", &png_rgb(8, 8)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, json!({ "detail": INTERNAL_DETAIL }));
    }

    #[actix_rt::test]
    async fn test_identical_uploads_give_identical_scores() {
        let fake = FakeClassifier::new(Behaviour::ChannelMeans);
        let image = png_rgb(97, 61);

        let (_, first) = post_predict(state_with(fake.clone()), "file", "image/png", &image).await;
        let (_, second) = post_predict(state_with(fake.clone()), "file", "image/png", &image).await;

        assert_eq!(first["class_probabilities"], second["class_probabilities"]);
        assert_eq!(fake.calls(), 2);
    }

    #[actix_rt::test]
    async fn test_red_jpeg_predicts_first_class() {
        let fake = FakeClassifier::new(Behaviour::ChannelMeans);
        let img = RgbImage::from_pixel(50, 50, Rgb([250, 5, 5]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        let (status, json) = post_predict(state_with(fake), "file", "image/jpeg", &bytes).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["prediction"], "Early Blight");
    }
}
