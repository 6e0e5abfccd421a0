use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::FromRow;

/// A recorded visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub id: i64,
    pub ip: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

/// Insert payload for a single visit
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub ip: String,
    pub user_agent: String,
    pub at: DateTime<Utc>,
}

/// Read-back handed to the page renderer after a visit is recorded
#[derive(Debug, Clone, Default)]
pub struct VisitLog {
    /// Most recent first
    pub visits: Vec<Visit>,
    pub ipv4_count: i64,
}

/// Row shape of the `visits` table. `ts` is stored without a zone and is
/// always UTC.
#[derive(Debug, FromRow)]
pub(crate) struct VisitRow {
    pub id: i64,
    pub ip: String,
    pub user_agent: String,
    pub ts: NaiveDateTime,
}

impl From<VisitRow> for Visit {
    fn from(row: VisitRow) -> Self {
        Self {
            id: row.id,
            ip: row.ip,
            user_agent: row.user_agent,
            timestamp: row.ts.and_utc(),
        }
    }
}
