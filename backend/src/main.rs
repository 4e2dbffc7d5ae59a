mod classifier;
mod history;
mod routes;

use std::env;
use std::fs;
use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use classifier::Classifier;
use history::HistoryService;
use routes::{StaticDirs, configure_routes};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let model_dir = PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "model".to_string()));
    let static_dir = PathBuf::from(env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()));
    let uploads = static_dir.join("uploads");
    let processed = static_dir.join("processed");
    fs::create_dir_all(&uploads)?;
    fs::create_dir_all(&processed)?;

    let classifier = match Classifier::load(&model_dir) {
        Ok(classifier) => classifier,
        Err(e) => {
            log::error!(
                "failed to load model from {}: {e} (run the trainer first)",
                model_dir.display()
            );
            return Err(std::io::Error::other(format!("model loading failed: {e}")));
        }
    };
    log::info!("loaded model with classes: {:?}", classifier.classes());

    let classifier = web::Data::new(classifier);
    let history = web::Data::new(HistoryService::new());
    let dirs = web::Data::new(StaticDirs { uploads, processed });

    let port = env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let bind_address = format!("0.0.0.0:{port}");
    log::info!("starting server on {bind_address}");

    let static_root = static_dir.display().to_string();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(classifier.clone())
            .app_data(history.clone())
            .app_data(dirs.clone())
            .configure(|cfg| configure_routes(cfg, static_root.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
