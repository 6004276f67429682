use crate::api::ApiTags;
use crate::service::import::ImportOrchestrator;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Enum, Object, OpenApi};
use silo_common::model::{ColumnType, ImportField, TableId};
use silo_common::SafeDisplay;
use std::sync::Arc;
use tracing::error;

pub struct ImportApi {
    orchestrator: Arc<ImportOrchestrator>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[oai(rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub table_id: u64,
    pub source_name: String,
    pub database_name: String,
    pub table_name: String,
    pub fields: Vec<ImportFieldDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[oai(rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub struct ImportFieldDto {
    pub source_column: String,
    pub target_column: String,
    pub target_type: ColumnTypeDto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Enum)]
#[oai(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnTypeDto {
    Long,
    Double,
    String,
}

impl From<ImportFieldDto> for ImportField {
    fn from(value: ImportFieldDto) -> Self {
        Self {
            source_column: value.source_column,
            target_column: value.target_column,
            target_type: match value.target_type {
                ColumnTypeDto::Long => ColumnType::Long,
                ColumnTypeDto::Double => ColumnType::Double,
                ColumnTypeDto::String => ColumnType::String,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(ApiResponse)]
pub enum ImportTableResponse {
    /// The import was accepted and continues asynchronously
    #[oai(status = 202)]
    Accepted,
    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[OpenApi(prefix_path = "/v1/imports", tag = ApiTags::Import)]
impl ImportApi {
    pub fn new(orchestrator: Arc<ImportOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Starts importing a table from the source warehouse
    #[oai(path = "/", method = "post", operation_id = "import_table")]
    async fn import_table(&self, request: Json<ImportRequest>) -> ImportTableResponse {
        let request = request.0;
        let fields = request.fields.into_iter().map(ImportField::from).collect();

        match self
            .orchestrator
            .import_table(
                TableId(request.table_id),
                &request.source_name,
                &request.database_name,
                &request.table_name,
                fields,
            )
            .await
        {
            Ok(()) => ImportTableResponse::Accepted,
            Err(error) if error.is_invalid_argument() => ImportTableResponse::BadRequest(Json(
                ErrorBody {
                    error: error.to_safe_string(),
                },
            )),
            Err(error) => {
                error!("Failed to start import: {error}");
                ImportTableResponse::InternalError(Json(ErrorBody {
                    error: error.to_safe_string(),
                }))
            }
        }
    }
}
