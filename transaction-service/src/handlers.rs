use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Error;
use crate::metrics;
use crate::models::{CreateTransactionRequest, TransactionResponse};
use crate::service::TransactionService;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "transaction-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create transaction
pub async fn create_transaction(
    service: web::Data<Arc<TransactionService>>,
    request: web::Json<CreateTransactionRequest>,
) -> Result<HttpResponse, Error> {
    let transaction = service.create(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(TransactionResponse::from(&transaction)))
}

/// Get transaction by ID
pub async fn get_transaction(
    service: web::Data<Arc<TransactionService>>,
    transaction_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let transaction = service.find_one(*transaction_id).await?;
    Ok(HttpResponse::Ok().json(TransactionResponse::from(&transaction)))
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Malformed bodies and ids get the same error envelope as every other failure
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| Error::Validation(err.to_string()).into());
    let path_config = web::PathConfig::default()
        .error_handler(|err, _req| Error::Validation(err.to_string()).into());

    cfg.app_data(json_config)
        .app_data(path_config)
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(prometheus_metrics))
        .service(
            web::scope("/transactions")
                .route("", web::post().to(create_transaction))
                .route("/{id}", web::get().to(get_transaction)),
        );
}
