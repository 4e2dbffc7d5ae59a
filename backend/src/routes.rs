use std::fs;
use std::path::PathBuf;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use uuid::Uuid;

use shared::PredictionResponse;
use shared::preprocess;

use crate::classifier::Classifier;
use crate::history::HistoryService;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(message: &str) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Where uploads land and where their processed copies are written.
#[derive(Clone)]
pub struct StaticDirs {
    pub uploads: PathBuf,
    pub processed: PathBuf,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: String) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/history").route(web::get().to(get_history)))
        .service(web::resource("/history/{id}").route(web::get().to(get_history_record)))
        .service(web::resource("/statistics").route(web::get().to(get_statistics)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(Files::new("/static", static_dir));
}

struct UploadedFile {
    name: String,
    data: Vec<u8>,
}

struct PredictForm {
    file: Option<UploadedFile>,
    patient_name: String,
    patient_age: String,
    doctor: String,
}

async fn read_form(mut payload: Multipart) -> Result<PredictForm, Error> {
    let mut form = PredictForm {
        file: None,
        patient_name: "Unknown".into(),
        patient_age: "0".into(),
        doctor: "Unknown".into(),
    };

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field.name().unwrap_or("").to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            data.extend_from_slice(&chunk?);
        }

        match name.as_str() {
            "file" => {
                form.file = Some(UploadedFile {
                    name: filename.unwrap_or_default(),
                    data,
                });
            }
            "patientName" => form.patient_name = text_value(data, "Unknown"),
            "patientAge" => form.patient_age = text_value(data, "0"),
            "doctor" => form.doctor = text_value(data, "Unknown"),
            _ => {}
        }
    }

    Ok(form)
}

fn text_value(data: Vec<u8>, default: &str) -> String {
    let value = String::from_utf8_lossy(&data).trim().to_string();
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Mirrors werkzeug-style filename cleanup: basename only, restricted to
/// a safe character set.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn predict(
    classifier: web::Data<Classifier>,
    history: web::Data<HistoryService>,
    dirs: web::Data<StaticDirs>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;

    let Some(upload) = form.file else {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::new("No file part")));
    };
    if upload.name.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::new("No selected file")));
    }

    let unique_name = format!(
        "{}_{}",
        Uuid::new_v4().simple(),
        sanitize_filename(&upload.name)
    );
    let upload_path = dirs.uploads.join(&unique_name);
    if let Err(e) = fs::write(&upload_path, &upload.data) {
        error!("failed to save upload {}: {e}", upload_path.display());
        return Ok(
            HttpResponse::InternalServerError().json(ErrorResponse::new("Error processing image"))
        );
    }

    let processed_path = dirs.processed.join(&unique_name);
    let image = match preprocess::preprocess(&upload_path, Some(&processed_path)) {
        Ok(image) => image,
        Err(e) => {
            error!("preprocessing failed for {}: {e}", upload_path.display());
            return Ok(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Error processing image")));
        }
    };

    let (prediction, confidence) = match classifier.predict(&image.to_input()) {
        Ok(result) => result,
        Err(e) => {
            error!("inference failed for {}: {e}", upload_path.display());
            return Ok(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Error processing image")));
        }
    };

    let image_path = format!("static/uploads/{unique_name}");
    let record = history.add(
        form.patient_name,
        form.patient_age,
        form.doctor,
        prediction.clone(),
        confidence,
        image_path.clone(),
    );
    info!(
        "prediction #{}: {prediction} ({confidence:.2}%) for {image_path}",
        record.id
    );

    Ok(HttpResponse::Ok().json(PredictionResponse {
        prediction,
        confidence,
        image_path,
    }))
}

async fn get_history(history: web::Data<HistoryService>) -> HttpResponse {
    HttpResponse::Ok().json(history.all())
}

async fn get_history_record(
    history: web::Data<HistoryService>,
    path: web::Path<usize>,
) -> HttpResponse {
    match history.find(path.into_inner()) {
        Some(record) => HttpResponse::Ok().json(record),
        None => HttpResponse::NotFound().json(ErrorResponse::new("Record not found")),
    }
}

async fn get_statistics(history: web::Data<HistoryService>) -> HttpResponse {
    HttpResponse::Ok().json(history.statistics())
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().body("RetinaCare API is running.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use shared::PatientRecord;

    fn seeded_history() -> web::Data<HistoryService> {
        let history = web::Data::new(HistoryService::new());
        history.add(
            "Jane Doe".into(),
            "54".into(),
            "Dr. Patel".into(),
            "cataract".into(),
            91.2,
            "static/uploads/a.png".into(),
        );
        history.add(
            "John Roe".into(),
            "61".into(),
            "Dr. Patel".into(),
            "normal".into(),
            84.0,
            "static/uploads/b.png".into(),
        );
        history
    }

    #[actix_web::test]
    async fn history_lists_all_records() {
        let app = test::init_service(
            App::new()
                .app_data(seeded_history())
                .service(web::resource("/history").route(web::get().to(get_history))),
        )
        .await;

        let req = test::TestRequest::get().uri("/history").to_request();
        let records: Vec<PatientRecord> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].prediction, "normal");
    }

    #[actix_web::test]
    async fn history_record_lookup_and_miss() {
        let app = test::init_service(
            App::new()
                .app_data(seeded_history())
                .service(web::resource("/history/{id}").route(web::get().to(get_history_record))),
        )
        .await;

        let req = test::TestRequest::get().uri("/history/2").to_request();
        let record: PatientRecord = test::call_and_read_body_json(&app, req).await;
        assert_eq!(record.id, 2);
        assert_eq!(record.patient_name, "John Roe");

        let req = test::TestRequest::get().uri("/history/42").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Record not found");
    }

    #[actix_web::test]
    async fn statistics_reports_distribution() {
        let app = test::init_service(
            App::new()
                .app_data(seeded_history())
                .service(web::resource("/statistics").route(web::get().to(get_statistics))),
        )
        .await;

        let req = test::TestRequest::get().uri("/statistics").to_request();
        let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["totalScans"], 2);
        assert_eq!(stats["conditionDistribution"]["cataract"], 50.0);
        assert_eq!(stats["conditionDistribution"]["normal"], 50.0);
    }

    #[actix_web::test]
    async fn predict_without_file_part_is_rejected() {
        let classifier = web::Data::new(Classifier::untrained(vec![
            "cataract".into(),
            "normal".into(),
        ]));
        let history = web::Data::new(HistoryService::new());
        let dirs = web::Data::new(StaticDirs {
            uploads: std::env::temp_dir(),
            processed: std::env::temp_dir(),
        });
        let app = test::init_service(
            App::new()
                .app_data(classifier)
                .app_data(history)
                .app_data(dirs)
                .service(web::resource("/predict").route(web::post().to(predict))),
        )
        .await;

        let boundary = "----retinacare-test-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"patientName\"\r\n\r\nJane Doe\r\n--{boundary}--\r\n"
        );
        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file part");
    }

    #[std::prelude::v1::test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("scan 01.png"), "scan_01.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..."), "upload");
    }
}
