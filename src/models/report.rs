//! Daily report model matching the frontend DailyReport interface.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Expediente;
use crate::status::{classify, Status};

/// Status counts over the live collection; derived on every read, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub total: usize,
    pub al_dia: usize,
    pub proximos: usize,
    pub retrasados: usize,
}

impl DailyReport {
    pub fn compute(records: &[Expediente], today: NaiveDate) -> Self {
        records.iter().fold(Self::default(), |mut acc, record| {
            acc.total += 1;
            match classify(&record.fecha_vencimiento, today) {
                Status::OnTime => acc.al_dia += 1,
                Status::DueSoon => acc.proximos += 1,
                Status::Overdue => acc.retrasados += 1,
            }
            acc
        })
    }
}
