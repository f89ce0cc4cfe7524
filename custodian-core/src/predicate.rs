//! Query filter expressions.
//!
//! A [`Predicate`] is a small, storage-agnostic expression tree. It can
//! reference the session tenant symbolically ([`Operand::CurrentTenant`]);
//! [`Predicate::bind`] resolves that against a [`SessionContext`] and yields a
//! [`BoundPredicate`] that storage engines either translate into their own
//! query language or evaluate row by row with [`BoundPredicate::matches`].
//!
//! Comparison semantics match SQL's `IS NOT DISTINCT FROM`: a missing field
//! compares as null, and null equals null. Fields that are not scalars
//! (arrays, objects, fractional numbers) also compare as null.

use std::borrow::Cow;

use crate::{
    capability::{Capabilities, CapabilityError, Columns, classify},
    entity::Entity,
    session::SessionContext,
};

/// A scalar value a field can be compared against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    /// Interpret a JSON value as a comparable scalar.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Literal(Value),
    /// The tenant of the session the query runs under.
    CurrentTenant,
}

/// An unbound filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Always,
    FieldEquals {
        column: Cow<'static, str>,
        operand: Operand,
    },
    FieldNotEquals {
        column: Cow<'static, str>,
        operand: Operand,
    },
    And(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn eq(column: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            column: column.into(),
            operand: Operand::Literal(value.into()),
        }
    }

    #[must_use]
    pub fn ne(column: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self::FieldNotEquals {
            column: column.into(),
            operand: Operand::Literal(value.into()),
        }
    }

    #[must_use]
    pub fn is_current_tenant(column: impl Into<Cow<'static, str>>) -> Self {
        Self::FieldEquals {
            column: column.into(),
            operand: Operand::CurrentTenant,
        }
    }

    /// Conjunction. `Always` is the identity and is folded away.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Always, p) | (p, Self::Always) => p,
            (l, r) => Self::And(Box::new(l), Box::new(r)),
        }
    }

    #[must_use]
    pub const fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    /// The global filter for a set of capability columns: not soft-deleted,
    /// then owned by the current tenant.
    #[must_use]
    pub fn global_filter(columns: &Columns) -> Self {
        let soft_delete = columns
            .deleted
            .map_or(Self::Always, |column| Self::ne(column, true));
        let tenant = columns
            .tenant
            .map_or(Self::Always, Self::is_current_tenant);
        soft_delete.and(tenant)
    }

    /// Resolve session references.
    ///
    /// Any comparison against [`Operand::CurrentTenant`] becomes `Always` when
    /// the session has no tenant.
    #[must_use]
    pub fn bind(&self, session: &SessionContext) -> BoundPredicate {
        match self {
            Self::Always => BoundPredicate::Always,
            Self::FieldEquals { column, operand } => match resolve(operand, session) {
                Some(value) => BoundPredicate::FieldEquals {
                    column: column.clone(),
                    value,
                },
                None => BoundPredicate::Always,
            },
            Self::FieldNotEquals { column, operand } => match resolve(operand, session) {
                Some(value) => BoundPredicate::FieldNotEquals {
                    column: column.clone(),
                    value,
                },
                None => BoundPredicate::Always,
            },
            Self::And(l, r) => l.bind(session).and(r.bind(session)),
        }
    }
}

/// The global filter for `E`, as cached on its descriptor.
pub fn compose<E: Entity>() -> Result<Predicate, CapabilityError> {
    classify::<E>().map(|descriptor| descriptor.filter().clone())
}

fn resolve(operand: &Operand, session: &SessionContext) -> Option<Value> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::CurrentTenant => session.current_tenant_id().map(Value::Int),
    }
}

/// A filter with every session reference resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundPredicate {
    Always,
    FieldEquals {
        column: Cow<'static, str>,
        value: Value,
    },
    FieldNotEquals {
        column: Cow<'static, str>,
        value: Value,
    },
    And(Box<BoundPredicate>, Box<BoundPredicate>),
}

impl BoundPredicate {
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Always, p) | (p, Self::Always) => p,
            (l, r) => Self::And(Box::new(l), Box::new(r)),
        }
    }

    #[must_use]
    pub const fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    pub fn matches<R: Row + ?Sized>(&self, row: &R) -> bool {
        match self {
            Self::Always => true,
            Self::FieldEquals { column, value } => field_or_null(row, column) == *value,
            Self::FieldNotEquals { column, value } => field_or_null(row, column) != *value,
            Self::And(l, r) => l.matches(row) && r.matches(row),
        }
    }

    /// The predicate as a plain function over rows.
    pub fn into_fn<R: Row + ?Sized>(self) -> impl Fn(&R) -> bool {
        move |row| self.matches(row)
    }
}

fn field_or_null<R: Row + ?Sized>(row: &R, column: &str) -> Value {
    row.field(column).unwrap_or(Value::Null)
}

/// Something a predicate can be evaluated against.
pub trait Row {
    /// The scalar stored under `column`, or `None` when absent or not a
    /// scalar.
    fn field(&self, column: &str) -> Option<Value>;
}

impl Row for serde_json::Value {
    fn field(&self, column: &str) -> Option<Value> {
        self.get(column).and_then(Value::from_json)
    }
}

impl Row for serde_json::Map<String, serde_json::Value> {
    fn field(&self, column: &str) -> Option<Value> {
        self.get(column).and_then(Value::from_json)
    }
}

/// An entity instance viewed as a row.
///
/// Capability columns are read through the capability accessors; any other
/// column falls back to the entity's serialized form.
pub struct EntityRow<'a, E: Entity> {
    entity: &'a E,
    capabilities: &'a Capabilities<E>,
}

impl<'a, E: Entity> EntityRow<'a, E> {
    pub const fn new(entity: &'a E, capabilities: &'a Capabilities<E>) -> Self {
        Self {
            entity,
            capabilities,
        }
    }
}

impl<E: Entity> Row for EntityRow<'_, E> {
    fn field(&self, column: &str) -> Option<Value> {
        let caps = self.capabilities;
        if let Some(access) = caps.soft_delete_access()
            && access.column == column
        {
            return Some(Value::Bool((access.is_deleted)(self.entity)));
        }
        if let Some(access) = caps.tenant_access()
            && access.column == column
        {
            return Some((access.get)(self.entity).into());
        }
        if let Some(access) = caps.stamp_access()
            && access.column == column
        {
            return Some((access.get)(self.entity).into());
        }
        serde_json::to_value(self.entity)
            .ok()
            .and_then(|document| document.field(column))
    }
}
