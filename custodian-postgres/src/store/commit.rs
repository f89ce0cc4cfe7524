use custodian_core::{
    concurrency::{ConcurrencyConflict, ExpectedStamp},
    store::{CommitError, Write},
};
use sqlx::{Postgres, QueryBuilder, types::Json};

use crate::Error;

type Tx<'c> = sqlx::Transaction<'c, Postgres>;

fn store_error(error: sqlx::Error) -> CommitError<Error> {
    CommitError::Store(Error::Database(error))
}

/// Apply one write inside an open transaction, returning the rows it touched.
///
/// Updates and deletes that match no row are diagnosed with a follow-up read
/// and reported as a [`ConcurrencyConflict`].
pub(in crate::store) async fn apply_write(
    tx: &mut Tx<'_>,
    write: Write,
) -> Result<u64, CommitError<Error>> {
    match write {
        Write::Insert {
            kind,
            id,
            data,
            stamp,
        } => {
            let result = sqlx::query(
                r"
                INSERT INTO cx_documents (kind, id, data, concurrency_stamp)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (kind, id) DO NOTHING
                ",
            )
            .bind(kind)
            .bind(&id)
            .bind(Json(data))
            .bind(stamp)
            .execute(&mut **tx)
            .await
            .map_err(store_error)?;

            if result.rows_affected() == 0 {
                return Err(CommitError::Store(Error::DuplicateKey {
                    kind: kind.to_string(),
                    id,
                }));
            }
            Ok(result.rows_affected())
        }
        Write::Update {
            kind,
            id,
            data,
            stamp,
            expected,
        } => {
            let mut qb = QueryBuilder::<Postgres>::new("UPDATE cx_documents SET data = ");
            qb.push_bind(Json(data))
                .push(", concurrency_stamp = ")
                .push_bind(stamp);
            push_key(&mut qb, kind, &id, expected.as_ref());

            let affected = qb
                .build()
                .execute(&mut **tx)
                .await
                .map_err(store_error)?
                .rows_affected();
            if affected == 0 {
                return Err(conflict(tx, kind, id, expected).await);
            }
            Ok(affected)
        }
        Write::Delete { kind, id, expected } => {
            let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM cx_documents");
            push_key(&mut qb, kind, &id, expected.as_ref());

            let affected = qb
                .build()
                .execute(&mut **tx)
                .await
                .map_err(store_error)?
                .rows_affected();
            if affected == 0 {
                return Err(conflict(tx, kind, id, expected).await);
            }
            Ok(affected)
        }
    }
}

fn push_key(
    qb: &mut QueryBuilder<'_, Postgres>,
    kind: &'static str,
    id: &str,
    expected: Option<&ExpectedStamp>,
) {
    qb.push(" WHERE kind = ")
        .push_bind(kind)
        .push(" AND id = ")
        .push_bind(id.to_string());
    if let Some(expected) = expected {
        qb.push(" AND concurrency_stamp IS NOT DISTINCT FROM ")
            .push_bind(expected.0.clone());
    }
}

/// Work out why a keyed write matched nothing.
async fn conflict(
    tx: &mut Tx<'_>,
    kind: &'static str,
    id: String,
    expected: Option<ExpectedStamp>,
) -> CommitError<Error> {
    let observed: Result<Option<Option<String>>, _> = sqlx::query_scalar(
        r"SELECT concurrency_stamp FROM cx_documents WHERE kind = $1 AND id = $2",
    )
    .bind(kind)
    .bind(&id)
    .fetch_optional(&mut **tx)
    .await;

    let conflict = match (observed, expected) {
        (Err(error), _) => return store_error(error),
        (Ok(Some(actual)), Some(expected)) => {
            ConcurrencyConflict::stale(kind, id, expected, actual)
        }
        (Ok(_), _) => ConcurrencyConflict::row_missing(kind, id),
    };
    tracing::debug!(%conflict, "conditioned write rejected");
    conflict.into()
}
