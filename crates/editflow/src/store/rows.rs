//! Conversions between `edits` rows and [`Edit`] values.

use chrono::{DateTime, Utc};

use crate::db::edit_repo::EditRow;
use crate::edit::{Edit, EditStatus, FailureReason, ProcessingStage};
use crate::error::ErrorKind;

use super::StoreError;

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(id: &str, field: &'static str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(id, field, s))
}

fn corrupt(id: &str, field: &'static str, value: &str) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        field,
        value: value.to_string(),
    }
}

fn parse_stage(id: &str, field: &'static str, s: &str) -> Result<ProcessingStage, StoreError> {
    ProcessingStage::parse(s).ok_or_else(|| corrupt(id, field, s))
}

pub(crate) fn to_row(edit: &Edit) -> EditRow {
    let reason = edit.failure_reason.as_ref();
    EditRow {
        id: edit.id.clone(),
        prompt: edit.prompt.clone(),
        enhanced_prompt: edit.enhanced_prompt.clone(),
        original_image_ref: edit.original_image_ref.clone(),
        result_image_ref: edit.result_image_ref.clone(),
        status: edit.status.as_str().to_string(),
        processing_stage: edit.processing_stage.as_str().to_string(),
        parent_id: edit.parent_id.clone(),
        chain_position: edit.chain_position,
        failed_stage: reason.map(|r| r.stage.as_str().to_string()),
        failure_kind: reason.map(|r| r.kind.as_str().to_string()),
        failure_message: reason.map(|r| r.message.clone()),
        message: edit.message.clone(),
        created_at: format_timestamp(edit.created_at),
        updated_at: format_timestamp(edit.updated_at),
    }
}

pub(crate) fn from_row(row: EditRow) -> Result<Edit, StoreError> {
    let id = row.id.as_str();
    let status = EditStatus::parse(&row.status).ok_or_else(|| corrupt(id, "status", &row.status))?;
    let processing_stage = parse_stage(id, "processing_stage", &row.processing_stage)?;
    let created_at = parse_timestamp(id, "created_at", &row.created_at)?;
    let updated_at = parse_timestamp(id, "updated_at", &row.updated_at)?;

    let failure_reason = match (&row.failed_stage, &row.failure_kind) {
        (Some(stage), Some(kind)) => Some(FailureReason {
            stage: parse_stage(id, "failed_stage", stage)?,
            kind: ErrorKind::parse(kind).ok_or_else(|| corrupt(id, "failure_kind", kind))?,
            message: row.failure_message.clone().unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Edit {
        id: row.id,
        prompt: row.prompt,
        enhanced_prompt: row.enhanced_prompt,
        original_image_ref: row.original_image_ref,
        result_image_ref: row.result_image_ref,
        status,
        processing_stage,
        parent_id: row.parent_id,
        chain_position: row.chain_position,
        created_at,
        updated_at,
        failure_reason,
        message: row.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_roundtrip_preserves_failure() {
        let mut edit = Edit::new("prompt", "ref");
        edit.status = EditStatus::Failed;
        edit.processing_stage = ProcessingStage::Failed;
        edit.failure_reason = Some(FailureReason::new(
            ProcessingStage::FetchingImage,
            ErrorKind::Transient,
            "timed out",
        ));

        let back = from_row(to_row(&edit)).unwrap();
        assert_eq!(back, edit);
    }

    #[test]
    fn test_unknown_stage_is_corrupt() {
        let mut row = to_row(&Edit::new("prompt", "ref"));
        row.processing_stage = "rendering".to_string();
        match from_row(row) {
            Err(StoreError::Corrupt { field, value, .. }) => {
                assert_eq!(field, "processing_stage");
                assert_eq!(value, "rendering");
            }
            other => panic!("expected corrupt error, got {:?}", other),
        }
    }
}
