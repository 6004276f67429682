use crate::service::Services;
use poem::Route;
use poem_openapi::{OpenApiService, Tags};

pub mod healthcheck;
pub mod import;

#[derive(Tags)]
pub enum ApiTags {
    HealthCheck,
    Import,
}

pub type Apis = (import::ImportApi, healthcheck::HealthcheckApi);

pub fn make_open_api_service(services: &Services) -> OpenApiService<Apis, ()> {
    OpenApiService::new(
        (
            import::ImportApi::new(services.orchestrator.clone()),
            healthcheck::HealthcheckApi,
        ),
        "Silo Import Service API",
        crate::VERSION,
    )
}

pub fn combined_routes(services: &Services) -> Route {
    Route::new().nest("/", make_open_api_service(services))
}
