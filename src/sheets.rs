use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::extract::JobRecord;

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// The write range is a fixed window reused for every row, so successive
/// writes land on the same cells of the remote sheet.
const APPEND_RANGE: &str = "A1:A10";
const VALUE_INPUT_OPTION: &str = "RAW";

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("sheets request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sheets api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Auth(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateStats {
    pub updated_cells: i64,
}

/// Where crawled records go. Implementations log their own faults and return
/// them as values; the crawl loop does not react to the result.
pub trait RecordSink {
    fn append(&mut self, record: &JobRecord) -> Result<UpdateStats, SheetsError>;
}

/// Sink that drops records. Used for `--no-sheet` runs.
pub struct NullSink;

impl RecordSink for NullSink {
    fn append(&mut self, record: &JobRecord) -> Result<UpdateStats, SheetsError> {
        debug!("Skipping sheet write for '{}'", record.job_title);
        Ok(UpdateStats { updated_cells: 0 })
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "spreadsheetId")]
    spreadsheet_id: String,
}

#[derive(Deserialize)]
struct BatchUpdateResponse {
    #[serde(rename = "totalUpdatedCells", default)]
    total_updated_cells: i64,
}

/// Google Sheets sink. Creates the spreadsheet on first append and writes one
/// row per record via `values:batchUpdate`.
pub struct SheetsSink {
    client: reqwest::blocking::Client,
    auth: Authenticator,
    title: String,
    spreadsheet_id: Option<String>,
}

impl SheetsSink {
    pub fn new(auth: Authenticator, title: impl Into<String>) -> Result<Self, SheetsError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self {
            client,
            auth,
            title: title.into(),
            spreadsheet_id: None,
        })
    }

    /// Create a spreadsheet with the given title, returning its id.
    pub fn create_sheet(&mut self, title: &str) -> Result<String, SheetsError> {
        let token = self.auth.access_token()?;
        let response = self
            .client
            .post(format!("{}?fields=spreadsheetId", API_BASE))
            .bearer_auth(token)
            .json(&json!({ "properties": { "title": title } }))
            .send()?;

        let response = check_status(response)?;
        let created: CreateResponse = response.json()?;
        info!("Created spreadsheet '{}' ({})", title, created.spreadsheet_id);
        Ok(created.spreadsheet_id)
    }

    /// Write rows of raw values into `range` of the target sheet, returning
    /// the number of cells the API reports as updated.
    pub fn batch_update_values(
        &mut self,
        spreadsheet_id: &str,
        range: &str,
        value_input_option: &str,
        rows: &[Vec<String>],
    ) -> Result<UpdateStats, SheetsError> {
        let token = self.auth.access_token()?;
        let body = json!({
            "valueInputOption": value_input_option,
            "data": [{ "range": range, "values": rows }],
        });
        let response = self
            .client
            .post(format!("{}/{}/values:batchUpdate", API_BASE, spreadsheet_id))
            .bearer_auth(token)
            .json(&body)
            .send()?;

        let response = check_status(response)?;
        let result: BatchUpdateResponse = response.json()?;
        debug!("{} cells updated", result.total_updated_cells);
        Ok(UpdateStats {
            updated_cells: result.total_updated_cells,
        })
    }

    fn ensure_spreadsheet(&mut self) -> Result<String, SheetsError> {
        if let Some(id) = &self.spreadsheet_id {
            return Ok(id.clone());
        }
        let title = self.title.clone();
        let id = self.create_sheet(&title)?;
        self.spreadsheet_id = Some(id.clone());
        Ok(id)
    }

    fn try_append(&mut self, record: &JobRecord) -> Result<UpdateStats, SheetsError> {
        let id = self.ensure_spreadsheet()?;
        self.batch_update_values(&id, APPEND_RANGE, VALUE_INPUT_OPTION, &[record.as_row()])
    }
}

impl RecordSink for SheetsSink {
    fn append(&mut self, record: &JobRecord) -> Result<UpdateStats, SheetsError> {
        let result = self.try_append(record);
        if let Err(e) = &result {
            warn!("Sheet write failed for '{}': {}", record.job_title, e);
        }
        result
    }
}

fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, SheetsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(SheetsError::Api {
        status: status.as_u16(),
        body,
    })
}

// ── Tests ──
