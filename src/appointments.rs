//! Appointment booking on top of the slot calculator.

use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{
    auth::new_id,
    db,
    models::{find_offering, AppointmentRow, APPOINTMENT_CANCELLED, APPOINTMENT_CONFIRMED},
    slots::{self, Availability, SlotError},
};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Full name is required.")]
    MissingName,

    #[error("A contact number is required.")]
    MissingContact,

    #[error("Please select a service.")]
    UnknownService,

    #[error(transparent)]
    InvalidDate(#[from] SlotError),

    #[error("We are closed on that day.")]
    Closed,

    #[error("The {0} slot is no longer available.")]
    SlotUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub struct NewAppointment {
    pub client_name: String,
    pub contact: String,
    pub service_id: String,
    pub date: String,
    pub time: String,
}

const APPOINTMENT_COLUMNS: &str =
    "id, client_name, contact, service_id, service_text, date, time, status, created_at";

pub async fn booked_times(pool: &SqlitePool, date: NaiveDate) -> Result<HashSet<String>, sqlx::Error> {
    let times = sqlx::query_scalar::<_, String>(
        "SELECT time FROM appointments WHERE date = ? AND status = ?",
    )
    .bind(date.to_string())
    .bind(APPOINTMENT_CONFIRMED)
    .fetch_all(pool)
    .await?;
    Ok(times.into_iter().collect())
}

pub async fn blocked_times(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT time FROM blocked_slots WHERE date = ? ORDER BY time")
        .bind(date.to_string())
        .fetch_all(pool)
        .await
}

/// Bookable slots for `date`: confirmed bookings and blocked times are both
/// taken.
pub async fn availability(pool: &SqlitePool, date: NaiveDate) -> Result<Availability, sqlx::Error> {
    let mut taken = booked_times(pool, date).await?;
    taken.extend(blocked_times(pool, date).await?);
    Ok(slots::available_slots(date, &taken))
}

pub async fn book(pool: &SqlitePool, input: NewAppointment) -> Result<AppointmentRow, BookingError> {
    if input.client_name.trim().is_empty() {
        return Err(BookingError::MissingName);
    }
    if input.contact.trim().is_empty() {
        return Err(BookingError::MissingContact);
    }
    let offering = find_offering(&input.service_id).ok_or(BookingError::UnknownService)?;
    let date = slots::parse_date(&input.date)?;
    let time = input.time.trim().to_string();

    let open = availability(pool, date).await?;
    if open.is_closed() {
        return Err(BookingError::Closed);
    }
    if !open.slots.contains(&time) {
        return Err(BookingError::SlotUnavailable(time));
    }

    let row = AppointmentRow {
        id: new_id(),
        client_name: input.client_name.trim().to_string(),
        contact: input.contact.trim().to_string(),
        service_id: offering.id.to_string(),
        service_text: offering.service_text(),
        date: date.to_string(),
        time,
        status: APPOINTMENT_CONFIRMED.to_string(),
        created_at: db::now(),
    };

    // The check above can race another request; the insert only lands if
    // the slot is still free when it runs.
    let inserted = sqlx::query(
        r#"INSERT INTO appointments (id, client_name, contact, service_id, service_text, date, time, status, created_at)
           SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
           WHERE NOT EXISTS (
               SELECT 1 FROM appointments WHERE date = ? AND time = ? AND status = ?
           )
           AND NOT EXISTS (
               SELECT 1 FROM blocked_slots WHERE date = ? AND time = ?
           )"#,
    )
    .bind(&row.id)
    .bind(&row.client_name)
    .bind(&row.contact)
    .bind(&row.service_id)
    .bind(&row.service_text)
    .bind(&row.date)
    .bind(&row.time)
    .bind(&row.status)
    .bind(&row.created_at)
    .bind(&row.date)
    .bind(&row.time)
    .bind(APPOINTMENT_CONFIRMED)
    .bind(&row.date)
    .bind(&row.time)
    .execute(pool)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(BookingError::SlotUnavailable(row.time));
    }

    Ok(row)
}

pub async fn fetch(pool: &SqlitePool, id: &str) -> Result<Option<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ? LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE date = ? ORDER BY time, created_at"
    ))
    .bind(date.to_string())
    .fetch_all(pool)
    .await
}

/// Frees the slot. Returns the updated row, `None` if the id is unknown.
pub async fn cancel(pool: &SqlitePool, id: &str) -> Result<Option<AppointmentRow>, sqlx::Error> {
    let updated = sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(APPOINTMENT_CANCELLED)
        .bind(id)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }
    fetch(pool, id).await
}

pub async fn block(
    pool: &SqlitePool,
    date: NaiveDate,
    time: &str,
    actor: &str,
) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        r#"INSERT INTO blocked_slots (date, time, created_by, created_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(date, time) DO NOTHING"#,
    )
    .bind(date.to_string())
    .bind(time.trim())
    .bind(actor)
    .bind(db::now())
    .execute(pool)
    .await?;
    Ok(inserted.rows_affected() > 0)
}

pub async fn unblock(pool: &SqlitePool, date: NaiveDate, time: &str) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM blocked_slots WHERE date = ? AND time = ?")
        .bind(date.to_string())
        .bind(time.trim())
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected() > 0)
}
