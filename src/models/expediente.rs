//! Expediente model matching the frontend Expediente interface.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::status::{parse_date, DATE_FORMAT};

/// Record schema generation accepted by a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// One free-text department with a single compliance flag.
    Single,
    /// Per-department compliance sub-records.
    Multi,
}

impl SchemaVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVariant::Single => "single",
            SchemaVariant::Multi => "multi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Some(SchemaVariant::Single),
            "multi" => Some(SchemaVariant::Multi),
            _ => None,
        }
    }
}

/// Compliance state of one department on a multi-area record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AreaStatus {
    pub area: String,
    #[serde(default)]
    pub cumplido: bool,
    #[serde(default)]
    pub fecha_respuesta: String,
}

/// Department tracking, flattened into the record on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AreaTracking {
    Multi {
        #[serde(rename = "areaServicio")]
        area_servicio: Vec<AreaStatus>,
    },
    Single {
        #[serde(rename = "areaServicio")]
        area_servicio: String,
        #[serde(default)]
        cumplido: bool,
        #[serde(rename = "fechaRespuesta", default)]
        fecha_respuesta: String,
    },
}

impl AreaTracking {
    pub fn variant(&self) -> SchemaVariant {
        match self {
            AreaTracking::Multi { .. } => SchemaVariant::Multi,
            AreaTracking::Single { .. } => SchemaVariant::Single,
        }
    }

    /// True when every tracked department has complied.
    pub fn is_complete(&self) -> bool {
        match self {
            AreaTracking::Multi { area_servicio } => {
                !area_servicio.is_empty() && area_servicio.iter().all(|a| a.cumplido)
            }
            AreaTracking::Single { cumplido, .. } => *cumplido,
        }
    }
}

/// A tracked case record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Expediente {
    pub id: String,
    #[serde(default)]
    pub numero: String,
    #[serde(default)]
    pub asunto: String,
    #[serde(flatten)]
    pub tracking: AreaTracking,
    #[serde(default)]
    pub fecha_inicio: String,
    #[serde(default)]
    pub fecha_vencimiento: String,
    #[serde(default)]
    pub observacion: String,
    /// Creation time in epoch milliseconds
    #[serde(default)]
    pub created_at: i64,
}

/// Editable fields of a record; identity and creation time are not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpedienteDraft {
    pub numero: String,
    pub asunto: String,
    pub tracking: AreaTracking,
    pub fecha_inicio: String,
    pub fecha_vencimiento: String,
    pub observacion: String,
}

impl Expediente {
    /// Build a new record with a fresh id.
    pub fn from_draft(draft: ExpedienteDraft, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            numero: draft.numero,
            asunto: draft.asunto,
            tracking: draft.tracking,
            fecha_inicio: draft.fecha_inicio,
            fecha_vencimiento: draft.fecha_vencimiento,
            observacion: draft.observacion,
            created_at,
        }
    }

    /// Overwrite the editable fields, keeping `id` and `created_at`.
    pub fn apply_draft(&mut self, draft: ExpedienteDraft) {
        self.numero = draft.numero;
        self.asunto = draft.asunto;
        self.tracking = draft.tracking;
        self.fecha_inicio = draft.fecha_inicio;
        self.fecha_vencimiento = draft.fecha_vencimiento;
        self.observacion = draft.observacion;
    }

    pub fn variant(&self) -> SchemaVariant {
        self.tracking.variant()
    }

    /// Flip the compliance flag.
    ///
    /// Multi-area records need the department name; single-area records
    /// ignore it. Marking as complied stamps `today` as the response date,
    /// unmarking clears it. Returns false when nothing matched.
    pub fn toggle_cumplido(&mut self, area: Option<&str>, today: NaiveDate) -> bool {
        let stamp = |done: bool| {
            if done {
                today.format(DATE_FORMAT).to_string()
            } else {
                String::new()
            }
        };

        match &mut self.tracking {
            AreaTracking::Single {
                cumplido,
                fecha_respuesta,
                ..
            } => {
                *cumplido = !*cumplido;
                *fecha_respuesta = stamp(*cumplido);
                true
            }
            AreaTracking::Multi { area_servicio } => {
                let Some(name) = area else {
                    return false;
                };
                match area_servicio.iter_mut().find(|a| a.area == name) {
                    Some(entry) => {
                        entry.cumplido = !entry.cumplido;
                        entry.fecha_respuesta = stamp(entry.cumplido);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Case-insensitive match on `numero` or `asunto`.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term.is_empty()
            || self.numero.to_lowercase().contains(&term)
            || self.asunto.to_lowercase().contains(&term)
    }
}

/// Check the invariants a submitted collection must hold before it replaces the store.
pub fn validate_collection(records: &[Expediente], schema: SchemaVariant) -> Result<(), AppError> {
    let mut seen = HashSet::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        if record.id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Record at position {} has an empty id",
                index
            )));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(AppError::Validation(format!(
                "Duplicate record id {}",
                record.id
            )));
        }
        if parse_date(&record.fecha_inicio).is_none() {
            return Err(AppError::Validation(format!(
                "Record {} has an invalid fechaInicio: {:?}",
                record.id, record.fecha_inicio
            )));
        }
        if !record.fecha_vencimiento.trim().is_empty()
            && parse_date(&record.fecha_vencimiento).is_none()
        {
            return Err(AppError::Validation(format!(
                "Record {} has an invalid fechaVencimiento: {:?}",
                record.id, record.fecha_vencimiento
            )));
        }
        if record.variant() != schema {
            return Err(AppError::Validation(format!(
                "Record {} uses the {} area schema, this server accepts {}",
                record.id,
                record.variant().as_str(),
                schema.as_str()
            )));
        }
    }

    Ok(())
}
