//! Client reconciliation state machine.
//!
//! Pure state: no I/O happens here, the runtime in `client::SyncClient`
//! drives it and performs whatever transport it picks.

use std::time::Duration;

use chrono::NaiveDate;

use crate::errors::AppError;
use crate::models::{validate_collection, DailyReport, Expediente, ExpedienteDraft, SchemaVariant};

/// Channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    Connected,
    /// Channel lost; `attempts` automatic reconnects used so far
    Disconnected { attempts: u32 },
}

/// Transport a mutation is pushed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Channel,
    Fallback,
}

/// Which path delivered a remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Channel,
    Fallback,
    Cache,
}

/// Bounded automatic reconnection with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// A local edit.
#[derive(Debug, Clone)]
pub enum Mutation {
    Create(Expediente),
    Edit { id: String, draft: ExpedienteDraft },
    Delete { id: String },
    Toggle {
        id: String,
        area: Option<String>,
        today: NaiveDate,
    },
}

/// Per-client view of the collection and of the transports.
#[derive(Debug, Clone)]
pub struct ReconcileState {
    records: Vec<Expediente>,
    connection: ConnectionState,
    using_fallback: bool,
    // Set once the channel delivered a collection on the current connection.
    channel_synced: bool,
    retry: RetryPolicy,
    schema: SchemaVariant,
}

impl ReconcileState {
    pub fn new(retry: RetryPolicy, schema: SchemaVariant) -> Self {
        Self {
            records: Vec::new(),
            connection: ConnectionState::Connecting,
            using_fallback: false,
            channel_synced: false,
            retry,
            schema,
        }
    }

    pub fn records(&self) -> &[Expediente] {
        &self.records
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    /// Whether the channel has delivered the server's collection since it connected.
    pub fn channel_synced(&self) -> bool {
        self.channel_synced
    }

    pub fn report(&self, today: NaiveDate) -> DailyReport {
        DailyReport::compute(&self.records, today)
    }

    /// Transport the next mutation should use.
    pub fn transport(&self) -> Transport {
        if self.connection == ConnectionState::Connected && !self.using_fallback {
            Transport::Channel
        } else {
            Transport::Fallback
        }
    }

    pub fn on_connected(&mut self) {
        self.connection = ConnectionState::Connected;
        self.using_fallback = false;
        self.channel_synced = false;
    }

    pub fn on_channel_lost(&mut self) {
        let attempts = match self.connection {
            ConnectionState::Disconnected { attempts } => attempts,
            ConnectionState::Connecting | ConnectionState::Connected => 0,
        };
        self.connection = ConnectionState::Disconnected { attempts };
        self.using_fallback = true;
        self.channel_synced = false;
    }

    /// Claim the next automatic reconnect, if the policy still allows one.
    pub fn next_retry(&mut self) -> Option<std::time::Duration> {
        match &mut self.connection {
            ConnectionState::Disconnected { attempts } if *attempts < self.retry.max_attempts => {
                *attempts += 1;
                Some(self.retry.delay)
            }
            _ => None,
        }
    }

    /// Manual retry: restore the full automatic retry budget.
    pub fn reset_retries(&mut self) {
        if let ConnectionState::Disconnected { attempts } = &mut self.connection {
            *attempts = 0;
        }
    }

    /// Install a remote collection wholesale.
    ///
    /// Once the channel has delivered data on the current connection, late
    /// fallback reads are ignored. Returns whether the collection was replaced.
    pub fn apply_remote(&mut self, records: Vec<Expediente>, source: Source) -> bool {
        match source {
            Source::Channel => self.channel_synced = true,
            Source::Fallback if self.channel_synced => return false,
            Source::Fallback => {}
            Source::Cache if !self.records.is_empty() => return false,
            Source::Cache => {}
        }
        self.records = records;
        true
    }

    /// Apply a local edit.
    ///
    /// The resulting collection must pass the same checks the server runs
    /// on writes, otherwise the edit is refused and nothing changes.
    /// Returns `Ok(false)` when the edit targeted a missing record.
    pub fn apply(&mut self, mutation: Mutation) -> Result<bool, AppError> {
        // Removing a record can never break a collection that was accepted.
        let check = !matches!(mutation, Mutation::Delete { .. });

        let mut next = self.records.clone();
        let changed = match mutation {
            Mutation::Create(record) => {
                next.insert(0, record);
                true
            }
            Mutation::Edit { id, draft } => match next.iter_mut().find(|r| r.id == id) {
                Some(record) => {
                    record.apply_draft(draft);
                    true
                }
                None => false,
            },
            Mutation::Toggle { id, area, today } => match next.iter_mut().find(|r| r.id == id) {
                Some(record) => record.toggle_cumplido(area.as_deref(), today),
                None => false,
            },
            Mutation::Delete { id } => {
                let before = next.len();
                next.retain(|r| r.id != id);
                next.len() != before
            }
        };
        if !changed {
            return Ok(false);
        }

        if check {
            validate_collection(&next, self.schema)?;
        }
        self.records = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AreaTracking;

    fn draft(numero: &str) -> ExpedienteDraft {
        ExpedienteDraft {
            numero: numero.to_string(),
            asunto: "Consulta".to_string(),
            tracking: AreaTracking::Single {
                area_servicio: "Legal".to_string(),
                cumplido: false,
                fecha_respuesta: String::new(),
            },
            fecha_inicio: "2024-07-01".to_string(),
            fecha_vencimiento: "2024-07-15".to_string(),
            observacion: String::new(),
        }
    }

    fn record(id: &str) -> Expediente {
        let mut record = Expediente::from_draft(draft(id), 0);
        record.id = id.to_string();
        record
    }

    fn ids(state: &ReconcileState) -> Vec<&str> {
        state.records().iter().map(|r| r.id.as_str()).collect()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_starts_connecting_and_uses_fallback_transport() {
        let state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        assert_eq!(state.connection(), ConnectionState::Connecting);
        assert!(!state.using_fallback());
        assert_eq!(state.transport(), Transport::Fallback);
    }

    #[test]
    fn test_connect_and_lose_channel() {
        let mut state = ReconcileState::new(policy(3), SchemaVariant::Single);
        state.on_connected();
        assert_eq!(state.transport(), Transport::Channel);

        state.on_channel_lost();
        assert!(state.using_fallback());
        assert_eq!(state.connection(), ConnectionState::Disconnected { attempts: 0 });
        assert_eq!(state.transport(), Transport::Fallback);

        state.on_connected();
        assert!(!state.using_fallback());
        assert_eq!(state.transport(), Transport::Channel);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut state = ReconcileState::new(policy(2), SchemaVariant::Single);
        state.on_channel_lost();

        assert!(state.next_retry().is_some());
        state.on_channel_lost();
        assert!(state.next_retry().is_some());
        state.on_channel_lost();
        assert_eq!(state.next_retry(), None);
        assert_eq!(state.connection(), ConnectionState::Disconnected { attempts: 2 });

        state.reset_retries();
        assert_eq!(state.next_retry(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_no_retry_while_connected() {
        let mut state = ReconcileState::new(policy(2), SchemaVariant::Single);
        state.on_connected();
        assert_eq!(state.next_retry(), None);
    }

    #[test]
    fn test_successful_reconnect_restores_budget() {
        let mut state = ReconcileState::new(policy(1), SchemaVariant::Single);
        state.on_channel_lost();
        assert!(state.next_retry().is_some());
        state.on_connected();
        state.on_channel_lost();
        assert!(state.next_retry().is_some());
    }

    #[test]
    fn test_channel_data_wins_over_late_fallback_read() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.on_connected();
        assert!(state.apply_remote(vec![record("server")], Source::Channel));
        assert!(state.channel_synced());
        assert!(!state.apply_remote(vec![record("stale")], Source::Fallback));
        assert_eq!(ids(&state), vec!["server"]);
    }

    #[test]
    fn test_fallback_read_applies_before_channel() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        assert!(state.apply_remote(vec![record("cached")], Source::Cache));
        assert!(state.apply_remote(vec![record("fresh")], Source::Fallback));
        assert!(!state.apply_remote(vec![record("cached")], Source::Cache));
        assert_eq!(ids(&state), vec!["fresh"]);
    }

    #[test]
    fn test_fallback_read_applies_after_channel_lost() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.on_connected();
        state.apply_remote(vec![record("a")], Source::Channel);
        state.on_channel_lost();
        assert!(state.apply_remote(vec![record("b")], Source::Fallback));
        assert_eq!(ids(&state), vec!["b"]);
    }

    #[test]
    fn test_sync_replaces_wholesale() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.on_connected();
        state.apply_remote(vec![record("a"), record("b")], Source::Channel);
        state.apply(Mutation::Create(record("local"))).unwrap();
        state.apply_remote(vec![record("c")], Source::Channel);
        assert_eq!(ids(&state), vec!["c"]);
    }

    #[test]
    fn test_local_mutations() {
        let today = NaiveDate::from_ymd_opt(2024, 7, 2).unwrap();
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.apply_remote(vec![record("a")], Source::Fallback);

        assert!(state.apply(Mutation::Create(record("b"))).unwrap());
        assert_eq!(ids(&state), vec!["b", "a"]);

        assert!(state.apply(Mutation::Edit {
            id: "a".to_string(),
            draft: draft("A-1"),
        }).unwrap());
        assert_eq!(state.records()[1].numero, "A-1");

        assert!(state.apply(Mutation::Toggle {
            id: "a".to_string(),
            area: None,
            today,
        }).unwrap());
        assert!(state.records()[1].tracking.is_complete());

        assert!(state.apply(Mutation::Delete {
            id: "b".to_string()
        }).unwrap());
        assert!(!state.apply(Mutation::Delete {
            id: "b".to_string()
        }).unwrap());
        assert!(!state.apply(Mutation::Edit {
            id: "missing".to_string(),
            draft: draft("x"),
        }).unwrap());
        assert_eq!(ids(&state), vec!["a"]);
    }

    #[test]
    fn test_invalid_edits_are_refused() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.apply_remote(vec![record("a")], Source::Fallback);

        let mut undated = draft("B-1");
        undated.fecha_inicio = String::new();
        let err = state
            .apply(Mutation::Create(Expediente::from_draft(undated.clone(), 0)))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = state
            .apply(Mutation::Edit {
                id: "a".to_string(),
                draft: undated,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut multi = draft("B-2");
        multi.tracking = AreaTracking::Multi {
            area_servicio: Vec::new(),
        };
        assert!(state
            .apply(Mutation::Create(Expediente::from_draft(multi, 0)))
            .is_err());

        assert!(state.apply(Mutation::Create(record("a"))).is_err());

        assert_eq!(ids(&state), vec!["a"]);
        assert_eq!(state.records()[0].fecha_inicio, "2024-07-01");
    }

    #[test]
    fn test_report_reflects_local_collection() {
        let mut state = ReconcileState::new(RetryPolicy::default(), SchemaVariant::Single);
        state.apply_remote(vec![record("a"), record("b")], Source::Fallback);
        let report = state.report(NaiveDate::from_ymd_opt(2024, 7, 20).unwrap());
        assert_eq!(report.total, 2);
        assert_eq!(report.retrasados, 2);
    }
}
