use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{Batch, Collection, CollectionLock, Store};
use crate::error::StoreError;
use crate::models::{
    DateRange, Facility, Kiosk, KioskDailyMetric, KioskState, PeakHourBucket, Survey, Turn,
    TurnFilter, TurnStatus,
};

/// Rows per INSERT statement; keeps bind counts well under the protocol limit.
const ROWS_PER_STATEMENT: usize = 1000;

const TURN_COLUMNS: &str = "id, date, ticket_letter, ticket_number, module, status, \
     kiosk_use_seconds, wait_seconds, service_seconds, total_seconds, issued_at, served_at, \
     ticket_full_code, facility_id, kiosk_id, note";

/// First key of every advisory lock taken by this crate.
const ADVISORY_NAMESPACE: i32 = 0x4b54_4d00;

fn advisory_key(collection: Collection) -> i32 {
    match collection {
        Collection::Turns => 1,
        Collection::Surveys => 2,
        Collection::PeakHours => 3,
        Collection::KioskMetrics => 4,
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("schema ready");
        Ok(())
    }

    async fn insert_turns(&self, rows: &[crate::models::NewTurn]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO turn_metrics.turns (date, ticket_letter, ticket_number, module, \
                 status, kiosk_use_seconds, wait_seconds, service_seconds, total_seconds, \
                 issued_at, served_at, ticket_full_code, facility_id, kiosk_id, note) ",
            );
            builder.push_values(chunk, |mut row, turn| {
                row.push_bind(turn.date)
                    .push_bind(&turn.ticket_letter)
                    .push_bind(turn.ticket_number)
                    .push_bind(turn.module)
                    .push_bind(turn.status.as_str())
                    .push_bind(turn.kiosk_use_seconds)
                    .push_bind(turn.wait_seconds)
                    .push_bind(turn.service_seconds)
                    .push_bind(turn.total_seconds)
                    .push_bind(turn.issued_at)
                    .push_bind(turn.served_at)
                    .push_bind(&turn.ticket_full_code)
                    .push_bind(turn.facility_id)
                    .push_bind(turn.kiosk_id)
                    .push_bind(&turn.note);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_surveys(&self, rows: &[crate::models::NewSurvey]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO turn_metrics.surveys (nps_score, rating_label, comment, age_range) ",
            );
            builder.push_values(chunk, |mut row, survey| {
                row.push_bind(survey.nps_score)
                    .push_bind(&survey.rating_label)
                    .push_bind(&survey.comment)
                    .push_bind(&survey.age_range);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_peak_hours(&self, rows: &[PeakHourBucket]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO turn_metrics.peak_hours (date, hour, total_turns, served_turns, \
                 abandoned_turns, abandonment_rate, avg_wait_seconds) ",
            );
            builder.push_values(chunk, |mut row, bucket| {
                row.push_bind(bucket.date)
                    .push_bind(bucket.hour as i32)
                    .push_bind(bucket.total_turns)
                    .push_bind(bucket.served_turns)
                    .push_bind(bucket.abandoned_turns)
                    .push_bind(bucket.abandonment_rate)
                    .push_bind(bucket.avg_wait_seconds);
            });
            builder.push(
                " ON CONFLICT (date, hour) DO UPDATE SET total_turns = EXCLUDED.total_turns, \
                 served_turns = EXCLUDED.served_turns, abandoned_turns = EXCLUDED.abandoned_turns, \
                 abandonment_rate = EXCLUDED.abandonment_rate, \
                 avg_wait_seconds = EXCLUDED.avg_wait_seconds",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn push_turn_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TurnFilter) {
    builder.push(" WHERE TRUE");
    if let Some(from) = filter.range.from {
        builder.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.range.to {
        builder.push(" AND date <= ").push_bind(to);
    }
    if let Some(facility_id) = filter.facility_id {
        builder.push(" AND facility_id = ").push_bind(facility_id);
    }
    if let Some(kiosk_id) = filter.kiosk_id {
        builder.push(" AND kiosk_id = ").push_bind(kiosk_id);
    }
    if let Some(letter) = &filter.ticket_letter {
        builder.push(" AND ticket_letter = ").push_bind(letter.clone());
    }
    if let Some(since) = filter.issued_since {
        builder.push(" AND issued_at >= ").push_bind(since);
    }
}

fn push_date_range(builder: &mut QueryBuilder<'_, Postgres>, range: &DateRange) {
    if let Some(from) = range.from {
        builder.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = range.to {
        builder.push(" AND date <= ").push_bind(to);
    }
}

fn turn_from_row(row: &PgRow) -> Result<Turn, StoreError> {
    let status: String = row.try_get("status")?;
    let status = TurnStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
        table: "turns",
        detail: format!("unknown status {status:?}"),
    })?;

    Ok(Turn {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        ticket_letter: row.try_get("ticket_letter")?,
        ticket_number: row.try_get("ticket_number")?,
        module: row.try_get("module")?,
        status,
        kiosk_use_seconds: row.try_get("kiosk_use_seconds")?,
        wait_seconds: row.try_get("wait_seconds")?,
        service_seconds: row.try_get("service_seconds")?,
        total_seconds: row.try_get("total_seconds")?,
        issued_at: row.try_get("issued_at")?,
        served_at: row.try_get("served_at")?,
        ticket_full_code: row.try_get("ticket_full_code")?,
        facility_id: row.try_get("facility_id")?,
        kiosk_id: row.try_get("kiosk_id")?,
        note: row.try_get("note")?,
    })
}

fn kiosk_from_row(row: &PgRow) -> Result<Kiosk, StoreError> {
    let state: String = row.try_get("state")?;
    let state = KioskState::parse(&state).ok_or_else(|| StoreError::Corrupt {
        table: "kiosks",
        detail: format!("unknown state {state:?}"),
    })?;

    Ok(Kiosk {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        facility_id: row.try_get("facility_id")?,
        state,
        last_activity: row.try_get("last_activity")?,
    })
}

fn metric_from_row(row: &PgRow) -> Result<KioskDailyMetric, StoreError> {
    Ok(KioskDailyMetric {
        kiosk_id: row.try_get("kiosk_id")?,
        date: row.try_get("date")?,
        uptime_pct: row.try_get("uptime_pct")?,
        transactions: row.try_get("transactions")?,
        errors: row.try_get("errors")?,
        avg_response_ms: row.try_get("avg_response_ms")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn lock_collection(
        &self,
        collection: Collection,
    ) -> Result<CollectionLock, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(ADVISORY_NAMESPACE)
            .bind(advisory_key(collection))
            .execute(&mut *tx)
            .await?;
        debug!(collection = collection.as_str(), "advisory lock acquired");
        Ok(CollectionLock::Postgres(tx))
    }

    async fn bulk_insert(&self, batch: Batch) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let inserted = batch.len() as u64;
        debug!(collection = batch.collection().as_str(), rows = inserted, "bulk insert");
        match &batch {
            Batch::Turns(rows) => self.insert_turns(rows).await?,
            Batch::Surveys(rows) => self.insert_surveys(rows).await?,
            Batch::PeakHours(rows) => self.insert_peak_hours(rows).await?,
        }
        Ok(inserted)
    }

    async fn delete_all(&self, collection: Collection) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM turn_metrics.{}", collection.as_str());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_kiosk_metrics(&self, kiosk_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM turn_metrics.kiosk_metrics WHERE kiosk_id = $1")
            .bind(kiosk_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_turns(&self, filter: &TurnFilter) -> Result<Vec<Turn>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TURN_COLUMNS} FROM turn_metrics.turns"));
        push_turn_filter(&mut builder, filter);
        builder.push(" ORDER BY issued_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(turn_from_row).collect()
    }

    async fn count_turns(&self, filter: &TurnFilter) -> Result<u64, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM turn_metrics.turns");
        push_turn_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn turn_counts_by_day(
        &self,
        filter: &TurnFilter,
    ) -> Result<BTreeMap<NaiveDate, u64>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT date, COUNT(*) AS total FROM turn_metrics.turns");
        push_turn_filter(&mut builder, filter);
        builder.push(" GROUP BY date ORDER BY date");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let date: NaiveDate = row.try_get("date")?;
            let total: i64 = row.try_get("total")?;
            counts.insert(date, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn find_surveys(&self) -> Result<Vec<Survey>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, nps_score, rating_label, comment, age_range \
             FROM turn_metrics.surveys ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut surveys = Vec::with_capacity(rows.len());
        for row in rows {
            surveys.push(Survey {
                id: row.try_get("id")?,
                nps_score: row.try_get("nps_score")?,
                rating_label: row.try_get("rating_label")?,
                comment: row.try_get("comment")?,
                age_range: row.try_get("age_range")?,
            });
        }
        Ok(surveys)
    }

    async fn count_surveys(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM turn_metrics.surveys")
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn find_peak_hours(&self, range: &DateRange) -> Result<Vec<PeakHourBucket>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT date, hour, total_turns, served_turns, abandoned_turns, abandonment_rate, \
             avg_wait_seconds FROM turn_metrics.peak_hours WHERE TRUE",
        );
        push_date_range(&mut builder, range);
        builder.push(" ORDER BY date, hour");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut buckets = Vec::with_capacity(rows.len());
        for row in rows {
            let hour: i32 = row.try_get("hour")?;
            buckets.push(PeakHourBucket {
                date: row.try_get("date")?,
                hour: hour.clamp(0, 23) as u32,
                total_turns: row.try_get("total_turns")?,
                served_turns: row.try_get("served_turns")?,
                abandoned_turns: row.try_get("abandoned_turns")?,
                abandonment_rate: row.try_get("abandonment_rate")?,
                avg_wait_seconds: row.try_get("avg_wait_seconds")?,
            });
        }
        Ok(buckets)
    }

    async fn upsert_kiosk_metric(&self, metric: &KioskDailyMetric) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO turn_metrics.kiosk_metrics
            (kiosk_id, date, uptime_pct, transactions, errors, avg_response_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kiosk_id, date) DO UPDATE
            SET uptime_pct = EXCLUDED.uptime_pct,
                transactions = EXCLUDED.transactions,
                errors = EXCLUDED.errors,
                avg_response_ms = EXCLUDED.avg_response_ms
            "#,
        )
        .bind(metric.kiosk_id)
        .bind(metric.date)
        .bind(metric.uptime_pct)
        .bind(metric.transactions)
        .bind(metric.errors)
        .bind(metric.avg_response_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_kiosk_metrics(
        &self,
        kiosk_id: Option<i64>,
        range: &DateRange,
    ) -> Result<Vec<KioskDailyMetric>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT kiosk_id, date, uptime_pct, transactions, errors, avg_response_ms \
             FROM turn_metrics.kiosk_metrics WHERE TRUE",
        );
        if let Some(kiosk_id) = kiosk_id {
            builder.push(" AND kiosk_id = ").push_bind(kiosk_id);
        }
        push_date_range(&mut builder, range);
        builder.push(" ORDER BY kiosk_id, date");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(metric_from_row).collect()
    }

    async fn upsert_facility(
        &self,
        name: &str,
        city: &str,
        address: Option<&str>,
    ) -> Result<Facility, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO turn_metrics.facilities (name, city, address, active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, name, city, address, active
            "#,
        )
        .bind(name)
        .bind(city)
        .bind(address)
        .fetch_one(&self.pool)
        .await?;

        Ok(Facility {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            active: row.try_get("active")?,
        })
    }

    async fn upsert_kiosk(
        &self,
        code: &str,
        facility_id: i64,
        seen_at: NaiveDateTime,
    ) -> Result<Kiosk, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO turn_metrics.kiosks (code, facility_id, state, last_activity)
            VALUES ($1, $2, 'active', $3)
            ON CONFLICT (code) DO UPDATE SET last_activity = EXCLUDED.last_activity
            RETURNING id, code, facility_id, state, last_activity
            "#,
        )
        .bind(code)
        .bind(facility_id)
        .bind(seen_at)
        .fetch_one(&self.pool)
        .await?;
        kiosk_from_row(&row)
    }

    async fn find_kiosks(&self) -> Result<Vec<Kiosk>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, code, facility_id, state, last_activity FROM turn_metrics.kiosks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(kiosk_from_row).collect()
    }

    async fn find_kiosk(&self, code: &str) -> Result<Option<Kiosk>, StoreError> {
        let row = sqlx::query(
            "SELECT id, code, facility_id, state, last_activity FROM turn_metrics.kiosks WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(kiosk_from_row).transpose()
    }

    async fn set_kiosk_state(
        &self,
        code: &str,
        state: KioskState,
    ) -> Result<Option<Kiosk>, StoreError> {
        let row = sqlx::query(
            "UPDATE turn_metrics.kiosks SET state = $2 WHERE code = $1 \
             RETURNING id, code, facility_id, state, last_activity",
        )
        .bind(code)
        .bind(state.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(kiosk_from_row).transpose()
    }
}
