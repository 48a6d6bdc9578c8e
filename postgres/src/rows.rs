//! Row decoding and integer conversions.

use admission_core::ledger::{LedgerError, Version};
use admission_core::types::{Attendee, DocumentId, SpotReservation, UserId, WaitlistEntry};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Database(format!("Failed to decode column {name}: {e}")))
}

pub(crate) fn waitlist_entry(row: &PgRow) -> Result<WaitlistEntry, LedgerError> {
    let id: Uuid = column(row, "id")?;
    let user_id: String = column(row, "user_id")?;
    Ok(WaitlistEntry {
        id: DocumentId::from_uuid(id),
        user_id: UserId::new(user_id),
        joined_at: column(row, "joined_at")?,
    })
}

pub(crate) fn reservation(row: &PgRow) -> Result<SpotReservation, LedgerError> {
    let id: Uuid = column(row, "id")?;
    let user_id: String = column(row, "user_id")?;
    Ok(SpotReservation {
        id: DocumentId::from_uuid(id),
        user_id: UserId::new(user_id),
        granted_at: column(row, "granted_at")?,
        expires_at: column(row, "expires_at")?,
    })
}

pub(crate) fn attendee(row: &PgRow) -> Result<Attendee, LedgerError> {
    let user_id: String = column(row, "user_id")?;
    Ok(Attendee::new(UserId::new(user_id), column(row, "confirmed_at")?))
}

pub(crate) fn to_u32(value: i32) -> Result<u32, LedgerError> {
    u32::try_from(value).map_err(|_| LedgerError::Database(format!("Negative spot count: {value}")))
}

pub(crate) fn to_i32(value: u32) -> Result<i32, LedgerError> {
    i32::try_from(value).map_err(|_| LedgerError::Database(format!("Spot count too large: {value}")))
}

pub(crate) fn to_version(value: i64) -> Result<Version, LedgerError> {
    u64::try_from(value)
        .map(Version::new)
        .map_err(|_| LedgerError::Database(format!("Negative document version: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_counts() {
        assert_eq!(to_u32(3), Ok(3));
        assert!(to_u32(-1).is_err());
        assert!(to_i32(u32::MAX).is_err());
    }

    #[test]
    fn converts_versions() {
        assert_eq!(to_version(7), Ok(Version::new(7)));
        assert!(to_version(-1).is_err());
    }
}
