//! Postgres-backed action store.
//!
//! Each [`UnitOfWork`] wraps one `sqlx` transaction. Row locks taken with
//! `SELECT ... FOR UPDATE` are held until commit or rollback, which serialises
//! concurrent handlers working on the same case or questionnaire id.
//!
//! ## Tables
//!
//! | Table | Key | Notes |
//! |-------|-----|-------|
//! | `cases` | `case_id` (primary) | one row per case, overwritten wholesale on update |
//! | `uac_qid_link` | `id` (primary), `qid` (unique) | upsert target for UAC events |
//! | `fulfilment_to_process` | `id` (primary) | outbox, insert only; a repeated id is skipped |
//!
//! Schema management is owned by the deployment, not by this crate.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any other | `Database` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | anything else (pool closed, IO, TLS, timeouts) | N/A | `Database` |

use std::sync::LazyLock;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use census_action_cases::{CaseRecord, UacQidLink};
use census_action_core::{CaseId, UacQidLinkId};
use census_action_events::RefusalType;
use census_action_fulfilment::FulfilmentToProcess;

use super::r#trait::{ActionStore, StoreError, UnitOfWork};

const CASE_COLUMNS: [&str; 41] = [
    "case_id",
    "case_ref",
    "case_type",
    "collection_exercise_id",
    "action_plan_id",
    "treatment_code",
    "address_line1",
    "address_line2",
    "address_line3",
    "town_name",
    "postcode",
    "latitude",
    "longitude",
    "uprn",
    "region",
    "address_level",
    "abp_code",
    "address_type",
    "estab_uprn",
    "estab_type",
    "organisation_name",
    "oa",
    "lsoa",
    "msoa",
    "lad",
    "htc_willingness",
    "htc_digital",
    "field_coordinator_id",
    "field_officer_id",
    "ce_expected_capacity",
    "ce_actual_responses",
    "receipt_received",
    "refusal_received",
    "address_invalid",
    "hand_delivery",
    "skeleton",
    "secure_establishment",
    "print_batch",
    "survey_launched",
    "created_date_time",
    "last_updated",
];

const FULFILMENT_COLUMNS: [&str; 16] = [
    "id",
    "case_id",
    "case_ref",
    "address_line1",
    "address_line2",
    "address_line3",
    "town_name",
    "postcode",
    "title",
    "forename",
    "surname",
    "field_coordinator_id",
    "field_officer_id",
    "organisation_name",
    "fulfilment_code",
    "action_type",
];

static SELECT_CASE_FOR_UPDATE_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {} FROM cases WHERE case_id = $1 FOR UPDATE",
        CASE_COLUMNS.join(", ")
    )
});

static INSERT_CASE_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "INSERT INTO cases ({}) VALUES ({})",
        CASE_COLUMNS.join(", "),
        placeholders(CASE_COLUMNS.len())
    )
});

static UPDATE_CASE_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "UPDATE cases SET ({}) = ({}) WHERE case_id = $1",
        CASE_COLUMNS[1..].join(", "),
        (2..=CASE_COLUMNS.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ")
    )
});

static INSERT_FULFILMENT_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "INSERT INTO fulfilment_to_process ({}) VALUES ({}) ON CONFLICT (id) DO NOTHING",
        FULFILMENT_COLUMNS.join(", "),
        placeholders(FULFILMENT_COLUMNS.len())
    )
});

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Postgres-backed store.
///
/// `Clone` is cheap (the pool is reference counted); share one instance across
/// workers.
#[derive(Debug, Clone)]
pub struct PostgresActionStore {
    pool: PgPool,
}

impl PostgresActionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ActionStore for PostgresActionStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    #[instrument(skip(self), err)]
    async fn pending_fulfilment_codes(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT fulfilment_code FROM fulfilment_to_process ORDER BY fulfilment_code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_fulfilment_codes", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("fulfilment_code")
                    .map_err(|e| map_sqlx_error("pending_fulfilment_codes", e))
            })
            .collect()
    }
}

struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self), fields(case_id = %case_id), err)]
    async fn find_case_for_update(
        &mut self,
        case_id: CaseId,
    ) -> Result<Option<CaseRecord>, StoreError> {
        let row = sqlx::query(SELECT_CASE_FOR_UPDATE_SQL.as_str())
            .bind(case_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_case_for_update", e))?;

        row.as_ref().map(case_from_row).transpose()
    }

    #[instrument(skip(self, case), fields(case_id = %case.case_id), err)]
    async fn insert_case(&mut self, case: &CaseRecord) -> Result<(), StoreError> {
        bind_case(sqlx::query(INSERT_CASE_SQL.as_str()), case)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate {
                        entity: "case",
                        key: case.case_id.to_string(),
                    }
                } else {
                    map_sqlx_error("insert_case", e)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self, case), fields(case_id = %case.case_id), err)]
    async fn update_case(&mut self, case: &CaseRecord) -> Result<(), StoreError> {
        let result = bind_case(sqlx::query(UPDATE_CASE_SQL.as_str()), case)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_case", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "case",
                key: case.case_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_uac_link_for_update(
        &mut self,
        qid: &str,
    ) -> Result<Option<UacQidLink>, StoreError> {
        let row = sqlx::query(
            "SELECT id, qid, uac, case_id, active FROM uac_qid_link WHERE qid = $1 FOR UPDATE",
        )
        .bind(qid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_uac_link_for_update", e))?;

        row.as_ref().map(uac_link_from_row).transpose()
    }

    #[instrument(skip(self, link), fields(qid = %link.qid), err)]
    async fn save_uac_link(&mut self, link: &UacQidLink) -> Result<(), StoreError> {
        // The uac value is written on first insert only.
        sqlx::query(
            r#"
            INSERT INTO uac_qid_link (id, qid, uac, case_id, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (qid) DO UPDATE
            SET case_id = EXCLUDED.case_id,
                active = EXCLUDED.active
            "#,
        )
        .bind(link.id.as_uuid())
        .bind(&link.qid)
        .bind(&link.uac)
        .bind(link.case_id.map(|id| *id.as_uuid()))
        .bind(link.active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_uac_link", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, item),
        fields(case_id = %item.case_id, fulfilment_code = %item.fulfilment_code),
        err
    )]
    async fn insert_fulfilment(&mut self, item: &FulfilmentToProcess) -> Result<bool, StoreError> {
        let result = sqlx::query(INSERT_FULFILMENT_SQL.as_str())
            .bind(item.id.as_uuid())
            .bind(item.case_id.as_uuid())
            .bind(item.case_ref)
            .bind(&item.address_line1)
            .bind(&item.address_line2)
            .bind(&item.address_line3)
            .bind(&item.town_name)
            .bind(&item.postcode)
            .bind(&item.title)
            .bind(&item.forename)
            .bind(&item.surname)
            .bind(&item.field_coordinator_id)
            .bind(&item.field_officer_id)
            .bind(&item.organisation_name)
            .bind(&item.fulfilment_code)
            .bind(item.action_type.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_fulfilment", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Bind every column of [`CASE_COLUMNS`] in order.
fn bind_case<'q>(
    query: Query<'q, Postgres, PgArguments>,
    case: &'q CaseRecord,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(case.case_id.as_uuid())
        .bind(case.case_ref)
        .bind(&case.case_type)
        .bind(case.collection_exercise_id)
        .bind(case.action_plan_id)
        .bind(&case.treatment_code)
        .bind(&case.address_line1)
        .bind(&case.address_line2)
        .bind(&case.address_line3)
        .bind(&case.town_name)
        .bind(&case.postcode)
        .bind(&case.latitude)
        .bind(&case.longitude)
        .bind(&case.uprn)
        .bind(&case.region)
        .bind(&case.address_level)
        .bind(&case.abp_code)
        .bind(&case.address_type)
        .bind(&case.estab_uprn)
        .bind(&case.estab_type)
        .bind(&case.organisation_name)
        .bind(&case.oa)
        .bind(&case.lsoa)
        .bind(&case.msoa)
        .bind(&case.lad)
        .bind(&case.htc_willingness)
        .bind(&case.htc_digital)
        .bind(&case.field_coordinator_id)
        .bind(&case.field_officer_id)
        .bind(case.ce_expected_capacity)
        .bind(case.ce_actual_responses)
        .bind(case.receipt_received)
        .bind(case.refusal_received.map(|r| r.as_str()))
        .bind(case.address_invalid)
        .bind(case.hand_delivery)
        .bind(case.skeleton)
        .bind(case.secure_establishment)
        .bind(&case.print_batch)
        .bind(case.survey_launched)
        .bind(case.created_date_time)
        .bind(case.last_updated)
}

fn case_from_row(row: &PgRow) -> Result<CaseRecord, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_case", e);

    let refusal_received = row
        .try_get::<Option<String>, _>("refusal_received")
        .map_err(decode)?
        .map(|raw| parse_refusal(&raw))
        .transpose()?;

    Ok(CaseRecord {
        case_id: CaseId::from_uuid(row.try_get("case_id").map_err(decode)?),
        case_ref: row.try_get("case_ref").map_err(decode)?,
        case_type: row.try_get("case_type").map_err(decode)?,
        collection_exercise_id: row.try_get("collection_exercise_id").map_err(decode)?,
        action_plan_id: row.try_get("action_plan_id").map_err(decode)?,
        treatment_code: row.try_get("treatment_code").map_err(decode)?,

        address_line1: row.try_get("address_line1").map_err(decode)?,
        address_line2: row.try_get("address_line2").map_err(decode)?,
        address_line3: row.try_get("address_line3").map_err(decode)?,
        town_name: row.try_get("town_name").map_err(decode)?,
        postcode: row.try_get("postcode").map_err(decode)?,
        latitude: row.try_get("latitude").map_err(decode)?,
        longitude: row.try_get("longitude").map_err(decode)?,
        uprn: row.try_get("uprn").map_err(decode)?,
        region: row.try_get("region").map_err(decode)?,
        address_level: row.try_get("address_level").map_err(decode)?,
        abp_code: row.try_get("abp_code").map_err(decode)?,
        address_type: row.try_get("address_type").map_err(decode)?,
        estab_uprn: row.try_get("estab_uprn").map_err(decode)?,
        estab_type: row.try_get("estab_type").map_err(decode)?,
        organisation_name: row.try_get("organisation_name").map_err(decode)?,

        oa: row.try_get("oa").map_err(decode)?,
        lsoa: row.try_get("lsoa").map_err(decode)?,
        msoa: row.try_get("msoa").map_err(decode)?,
        lad: row.try_get("lad").map_err(decode)?,
        htc_willingness: row.try_get("htc_willingness").map_err(decode)?,
        htc_digital: row.try_get("htc_digital").map_err(decode)?,
        field_coordinator_id: row.try_get("field_coordinator_id").map_err(decode)?,
        field_officer_id: row.try_get("field_officer_id").map_err(decode)?,

        ce_expected_capacity: row.try_get("ce_expected_capacity").map_err(decode)?,
        ce_actual_responses: row.try_get("ce_actual_responses").map_err(decode)?,
        receipt_received: row.try_get("receipt_received").map_err(decode)?,
        refusal_received,
        address_invalid: row.try_get("address_invalid").map_err(decode)?,
        hand_delivery: row.try_get("hand_delivery").map_err(decode)?,
        skeleton: row.try_get("skeleton").map_err(decode)?,
        secure_establishment: row.try_get("secure_establishment").map_err(decode)?,
        print_batch: row.try_get("print_batch").map_err(decode)?,
        survey_launched: row.try_get("survey_launched").map_err(decode)?,

        created_date_time: row.try_get("created_date_time").map_err(decode)?,
        last_updated: row.try_get("last_updated").map_err(decode)?,
    })
}

fn uac_link_from_row(row: &PgRow) -> Result<UacQidLink, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_uac_link", e);

    Ok(UacQidLink {
        id: UacQidLinkId::from_uuid(row.try_get("id").map_err(decode)?),
        qid: row.try_get("qid").map_err(decode)?,
        uac: row.try_get("uac").map_err(decode)?,
        case_id: row
            .try_get::<Option<Uuid>, _>("case_id")
            .map_err(decode)?
            .map(CaseId::from_uuid),
        active: row.try_get("active").map_err(decode)?,
    })
}

fn parse_refusal(raw: &str) -> Result<RefusalType, StoreError> {
    [RefusalType::HardRefusal, RefusalType::ExtraordinaryRefusal]
        .into_iter()
        .find(|r| r.as_str() == raw)
        .ok_or_else(|| StoreError::Decode {
            entity: "case",
            message: format!("unknown refusal_received value '{raw}'"),
        })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation,
            message: match db_err.code() {
                Some(code) => format!("[{code}] {}", db_err.message()),
                None => db_err.message().to_string(),
            },
        },
        sqlx::Error::ColumnDecode { index, source } => StoreError::Decode {
            entity: operation,
            message: format!("column {index}: {source}"),
        },
        sqlx::Error::Decode(source) => StoreError::Decode {
            entity: operation,
            message: source.to_string(),
        },
        other => StoreError::Database {
            operation,
            message: other.to_string(),
        },
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
