//! Creation of a single turn from a structured payload.

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::decode::decode_flexible_date;
use crate::error::{PayloadError, StoreError};
use crate::models::{NewTurn, TurnStatus};
use crate::store::{Batch, Store};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TurnPayload {
    #[serde(alias = "fecha")]
    pub date: Option<String>,
    #[serde(alias = "letra")]
    pub letter: Option<String>,
    #[serde(alias = "numero")]
    pub number: Option<Scalar>,
    #[serde(alias = "modulo")]
    pub module: Option<Scalar>,
    #[serde(alias = "tiempo")]
    pub duration: Option<Scalar>,
    #[serde(alias = "observacion")]
    pub note: Option<String>,
}

#[derive(Debug, Error)]
pub enum CreateTurnError {
    #[error(transparent)]
    Invalid(#[from] PayloadError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnPayload {
    pub fn from_json(raw: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(raw).map_err(|err| PayloadError::Malformed(err.to_string()))
    }

    pub fn into_new_turn(self) -> Result<NewTurn, PayloadError> {
        let raw_date = required_text(self.date, "date")?;
        let letter = required_text(self.letter, "letter")?;
        let number = required_count(self.number, "number")?;
        let module = required_count(self.module, "module")?;
        let total_seconds = match self.duration {
            Some(value) if !is_blank(&value) => Some(count(value, "duration")?),
            _ => None,
        };

        let date = decode_flexible_date(&raw_date).map_err(|_| PayloadError::InvalidField {
            field: "date",
            value: raw_date.clone(),
        })?;

        Ok(NewTurn {
            date,
            ticket_full_code: format!("{letter}{number}"),
            ticket_letter: letter,
            ticket_number: number,
            module,
            status: TurnStatus::Served,
            kiosk_use_seconds: None,
            wait_seconds: 0,
            service_seconds: 0,
            total_seconds,
            issued_at: date.and_time(chrono::NaiveTime::MIN),
            served_at: None,
            facility_id: None,
            kiosk_id: None,
            note: self
                .note
                .map(|note| note.trim().to_string())
                .filter(|note| !note.is_empty()),
        })
    }
}

/// Validates the payload and stores exactly one turn.
pub async fn create_turn(store: &dyn Store, payload: TurnPayload) -> Result<NewTurn, CreateTurnError> {
    let turn = payload.into_new_turn()?;
    store.bulk_insert(Batch::Turns(vec![turn.clone()])).await?;
    info!(ticket = %turn.ticket_full_code, date = %turn.date, "turn created");
    Ok(turn)
}

fn is_blank(value: &Scalar) -> bool {
    matches!(value, Scalar::Text(text) if text.trim().is_empty())
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, PayloadError> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(PayloadError::MissingField(field))
}

fn required_count(value: Option<Scalar>, field: &'static str) -> Result<i64, PayloadError> {
    match value {
        Some(value) if !is_blank(&value) => count(value, field),
        _ => Err(PayloadError::MissingField(field)),
    }
}

fn count(value: Scalar, field: &'static str) -> Result<i64, PayloadError> {
    let parsed = match &value {
        Scalar::Int(n) => Some(*n),
        Scalar::Text(text) => text.trim().parse().ok(),
    };
    parsed
        .filter(|n| *n >= 0)
        .ok_or_else(|| PayloadError::InvalidField {
            field,
            value: match value {
                Scalar::Int(n) => n.to_string(),
                Scalar::Text(text) => text,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnFilter;
    use crate::store::MemoryStore;

    #[test]
    fn accepts_source_field_names_and_iso_dates() {
        let payload = TurnPayload::from_json(
            r#"{"fecha": "2025-02-14", "letra": "RR", "numero": "607", "modulo": 4, "tiempo": 90}"#,
        )
        .unwrap();
        let turn = payload.into_new_turn().unwrap();

        assert_eq!(turn.date.to_string(), "2025-02-14");
        assert_eq!(turn.ticket_full_code, "RR607");
        assert_eq!(turn.module, 4);
        assert_eq!(turn.total_seconds, Some(90));
        assert_eq!(turn.note, None);
    }

    #[test]
    fn accepts_short_source_dates() {
        let payload = TurnPayload::from_json(
            r#"{"date": "5/3/24", "letter": "M", "number": 1, "module": 2, "note": " ok "}"#,
        )
        .unwrap();
        let turn = payload.into_new_turn().unwrap();
        assert_eq!(turn.date.to_string(), "2024-03-05");
        assert_eq!(turn.note.as_deref(), Some("ok"));
    }

    #[test]
    fn missing_required_fields_are_client_errors() {
        let payload = TurnPayload::from_json(r#"{"date": "5/3/24", "letter": "M", "number": 1}"#)
            .unwrap();
        assert_eq!(
            payload.into_new_turn(),
            Err(PayloadError::MissingField("module"))
        );

        let payload =
            TurnPayload::from_json(r#"{"date": "", "letter": "M", "number": 1, "module": 1}"#)
                .unwrap();
        assert_eq!(payload.into_new_turn(), Err(PayloadError::MissingField("date")));
    }

    #[test]
    fn rejects_bad_values() {
        let payload = TurnPayload::from_json(
            r#"{"date": "30/02/2025", "letter": "M", "number": 1, "module": 1}"#,
        )
        .unwrap();
        assert!(matches!(
            payload.into_new_turn(),
            Err(PayloadError::InvalidField { field: "date", .. })
        ));

        let payload = TurnPayload::from_json(
            r#"{"date": "1/3/25", "letter": "M", "number": "abc", "module": 1}"#,
        )
        .unwrap();
        assert!(matches!(
            payload.into_new_turn(),
            Err(PayloadError::InvalidField { field: "number", .. })
        ));

        assert!(matches!(
            TurnPayload::from_json("not json"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn creates_exactly_one_turn() {
        let store = MemoryStore::new();
        let payload = TurnPayload {
            date: Some("2025-02-14".into()),
            letter: Some("V".into()),
            number: Some(Scalar::Int(9)),
            module: Some(Scalar::Int(3)),
            ..TurnPayload::default()
        };

        create_turn(&store, payload).await.unwrap();
        assert_eq!(store.count_turns(&TurnFilter::default()).await.unwrap(), 1);

        let err = create_turn(&store, TurnPayload::default()).await.unwrap_err();
        assert!(matches!(
            err,
            CreateTurnError::Invalid(PayloadError::MissingField("date"))
        ));
        assert_eq!(store.count_turns(&TurnFilter::default()).await.unwrap(), 1);
    }
}
