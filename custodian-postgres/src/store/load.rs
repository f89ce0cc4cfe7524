use custodian_core::{predicate::BoundPredicate, store::Document};
use sqlx::{Postgres, QueryBuilder, Row, postgres::PgRow, types::Json};

/// Start a `SELECT` over one kind. Callers append further `AND` clauses.
pub(in crate::store) fn select_documents(kind: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT kind, id, data, concurrency_stamp FROM cx_documents WHERE kind = ",
    );
    qb.push_bind(kind.to_string());
    qb
}

/// Append `AND <filter>` to a query.
pub(in crate::store) fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &BoundPredicate) {
    if filter.is_always() {
        return;
    }
    qb.push(" AND ");
    push_predicate(qb, filter);
}

/// Render a predicate as SQL over the `data` document.
///
/// A column compares as JSON `null` when it is absent or holds an object or
/// array, matching how predicates evaluate against in-memory rows.
fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &BoundPredicate) {
    match predicate {
        BoundPredicate::Always => {
            qb.push("TRUE");
        }
        BoundPredicate::FieldEquals { column, value } => {
            push_field(qb, column);
            qb.push(" = ").push_bind(Json(value.to_json()));
        }
        BoundPredicate::FieldNotEquals { column, value } => {
            push_field(qb, column);
            qb.push(" <> ").push_bind(Json(value.to_json()));
        }
        BoundPredicate::And(left, right) => {
            qb.push("(");
            push_predicate(qb, left);
            qb.push(" AND ");
            push_predicate(qb, right);
            qb.push(")");
        }
    }
}

fn push_field(qb: &mut QueryBuilder<'static, Postgres>, column: &str) {
    qb.push("(CASE WHEN jsonb_typeof(data -> ")
        .push_bind(column.to_string())
        .push(") IN ('string', 'number', 'boolean') THEN data -> ")
        .push_bind(column.to_string())
        .push(" ELSE 'null'::jsonb END)");
}

pub(in crate::store) fn decode_row(row: PgRow) -> Result<Document, sqlx::Error> {
    let data: Json<serde_json::Value> = row.try_get("data")?;
    Ok(Document {
        kind: row.try_get("kind")?,
        id: row.try_get("id")?,
        data: data.0,
        stamp: row.try_get("concurrency_stamp")?,
    })
}

/// Decode a batch of raw Postgres rows into [`Document`]s.
pub(in crate::store) fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<Document>, sqlx::Error> {
    rows.into_iter().map(decode_row).collect()
}

#[cfg(test)]
mod tests {
    use custodian_core::{
        capability::Columns,
        predicate::Predicate,
        session::SessionContext,
    };

    use super::*;

    fn render(filter: &BoundPredicate) -> String {
        let mut qb = select_documents("customer");
        push_filter(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn always_adds_no_clause() {
        let sql = render(&BoundPredicate::Always);
        assert_eq!(
            sql,
            "SELECT kind, id, data, concurrency_stamp FROM cx_documents WHERE kind = $1"
        );
    }

    #[test]
    fn global_filter_renders_both_conditions() {
        let columns = Columns {
            deleted: Some("is_deleted"),
            tenant: Some("tenant_id"),
            stamp: None,
        };
        let filter = Predicate::global_filter(&columns).bind(&SessionContext::for_user(1).with_tenant(7));

        let sql = render(&filter);

        assert!(sql.contains("jsonb_typeof(data -> $2)"));
        assert!(sql.contains(" <> $4"));
        assert!(sql.contains(" = $7"));
        assert!(sql.contains(" <> $4 AND (CASE"));
    }

    #[test]
    fn tenant_condition_disappears_without_session_tenant() {
        let columns = Columns {
            deleted: Some("is_deleted"),
            tenant: Some("tenant_id"),
            stamp: None,
        };
        let filter = Predicate::global_filter(&columns).bind(&SessionContext::system());

        let sql = render(&filter);

        assert!(sql.contains(" <> $4"));
        assert!(!sql.contains(" = $"), "unexpected equality in {sql}");
    }
}
