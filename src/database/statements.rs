//! Dynamic `sea_query` statements for one resource table.
//!
//! Column names always go through `Alias`/`Expr::col` and values are always bound, so neither
//! field names nor caller input are spliced into SQL text.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{
    Alias, Asterisk, Cond, DeleteStatement, Expr, Func, InsertStatement, LikeExpr, NullOrdering, Order, Query,
    SelectStatement, SimpleExpr, UpdateStatement, Value as SeaValue,
};
use sea_orm::{Condition, DbErr};

use crate::filtering::{Direction, Filter, FilterOp, FilterValue, QuerySpec, SortKey};
use crate::schema::{FieldType, Schema};
use crate::value::{Identity, Record, Value};

/// Where and how a schema is stored
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub(crate) table: String,
    pub(crate) version: String,
    pub(crate) schema: Schema,
}

impl Layout {
    fn col(name: &str) -> Expr {
        Expr::col(Alias::new(name))
    }

    fn columns(&self) -> Vec<Alias> {
        self.schema
            .fields()
            .iter()
            .map(|f| Alias::new(f.name()))
            .chain(std::iter::once(Alias::new(&self.version)))
            .collect()
    }

    /// Bindable value of `name`, typed by its field so nulls keep their column type
    fn bind(&self, name: &str, value: &Value) -> SeaValue {
        match self.schema.field(name) {
            Some(field) => to_sea_value(field.field_type(), value),
            None => to_sea_value(&FieldType::String, value),
        }
    }

    pub(crate) fn identity_condition(&self, identity: &Identity) -> Condition {
        self.schema
            .identity_key()
            .iter()
            .zip(identity.values())
            .fold(Cond::all(), |cond, (key, value)| {
                cond.add(Self::col(key).eq(self.bind(key, value)))
            })
    }

    fn versioned_condition(&self, identity: &Identity, expected_version: Option<i64>) -> Condition {
        let cond = self.identity_condition(identity);
        match expected_version {
            Some(version) => cond.add(Self::col(&self.version).eq(version)),
            None => cond,
        }
    }

    /// `INSERT` of every field the record carries, at version 1
    pub(crate) fn insert(&self, record: &Record, returning: bool) -> Result<InsertStatement, DbErr> {
        let mut columns: Vec<Alias> = record.iter().map(|(name, _)| Alias::new(name)).collect();
        let mut values: Vec<SimpleExpr> = record
            .iter()
            .map(|(name, value)| SimpleExpr::Value(self.bind(name, value)))
            .collect();
        columns.push(Alias::new(&self.version));
        values.push(SimpleExpr::Value(1i64.into()));

        let mut insert = Query::insert();
        insert.into_table(Alias::new(&self.table)).columns(columns);
        insert
            .values(values)
            .map_err(|e| DbErr::Custom(format!("cannot build insert: {e}")))?;
        if returning {
            insert.returning(Query::returning().columns(self.columns()));
        }
        Ok(insert)
    }

    /// `UPDATE … SET <patch>, version = version + 1 WHERE <identity> [AND version = ?]`
    pub(crate) fn update(
        &self,
        identity: &Identity,
        patch: &Record,
        expected_version: Option<i64>,
        returning: bool,
    ) -> UpdateStatement {
        let mut update = Query::update();
        update.table(Alias::new(&self.table));
        for (name, value) in patch.iter() {
            update.value(Alias::new(name), self.bind(name, value));
        }
        update
            .value(Alias::new(&self.version), Self::col(&self.version).add(1))
            .cond_where(self.versioned_condition(identity, expected_version));
        if returning {
            update.returning(Query::returning().columns(self.columns()));
        }
        update
    }

    pub(crate) fn delete(&self, identity: &Identity, expected_version: Option<i64>) -> DeleteStatement {
        Query::delete()
            .from_table(Alias::new(&self.table))
            .cond_where(self.versioned_condition(identity, expected_version))
            .to_owned()
    }

    pub(crate) fn select_one(&self, identity: &Identity) -> SelectStatement {
        Query::select()
            .columns(self.columns())
            .from(Alias::new(&self.table))
            .cond_where(self.identity_condition(identity))
            .to_owned()
    }

    pub(crate) fn select_version(&self, identity: &Identity) -> SelectStatement {
        Query::select()
            .column(Alias::new(&self.version))
            .from(Alias::new(&self.table))
            .cond_where(self.identity_condition(identity))
            .to_owned()
    }

    /// One page plus one row, in the query's total order
    pub(crate) fn select_page(&self, query: &QuerySpec) -> SelectStatement {
        let mut select = Query::select();
        select
            .columns(self.columns())
            .from(Alias::new(&self.table))
            .cond_where(self.filter_condition(query.filters()));
        if let Some(after) = query.after() {
            select.cond_where(self.keyset_condition(query.sort(), after));
        }
        for key in query.sort() {
            let (order, nulls) = match key.direction {
                Direction::Asc => (Order::Asc, NullOrdering::First),
                Direction::Desc => (Order::Desc, NullOrdering::Last),
            };
            select.order_by_with_nulls(Alias::new(&key.field), order, nulls);
        }
        select.limit(query.fetch_limit());
        if query.offset() > 0 {
            select.offset(query.offset());
        }
        select
    }

    pub(crate) fn count(&self, query: &QuerySpec) -> SelectStatement {
        Query::select()
            .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
            .from(Alias::new(&self.table))
            .cond_where(self.filter_condition(query.filters()))
            .to_owned()
    }

    fn filter_condition(&self, filters: &[Filter]) -> Condition {
        filters
            .iter()
            .fold(Cond::all(), |cond, filter| cond.add(self.filter_expr(filter)))
    }

    fn filter_expr(&self, filter: &Filter) -> SimpleExpr {
        let column = Self::col(filter.field());
        match (filter.value(), filter.op()) {
            (FilterValue::Single(Value::Null), FilterOp::Ne) => column.is_not_null(),
            (FilterValue::Single(Value::Null), _) => column.is_null(),
            (FilterValue::List(values), _) => {
                column.is_in(values.iter().map(|v| self.bind(filter.field(), v)))
            }
            (FilterValue::Single(value), FilterOp::Contains) => {
                let needle = value.as_str().unwrap_or_default();
                let pattern = format!("%{}%", escape_like_wildcards(needle).to_ascii_uppercase());
                SimpleExpr::FunctionCall(Func::upper(column)).like(LikeExpr::new(pattern).escape('\\'))
            }
            (FilterValue::Single(value), op) => {
                let bound = self.bind(filter.field(), value);
                match op {
                    FilterOp::Ne => column.ne(bound),
                    FilterOp::Lt => column.lt(bound),
                    FilterOp::Lte => column.lte(bound),
                    FilterOp::Gt => column.gt(bound),
                    FilterOp::Gte => column.gte(bound),
                    FilterOp::Eq | FilterOp::In | FilterOp::Contains => column.eq(bound),
                }
            }
        }
    }

    /// Rows strictly after the cursor under `sort` (nulls first ascending, last descending):
    /// `OR_i (AND_{j<i} key_j = v_j) AND key_i after v_i`
    fn keyset_condition(&self, sort: &[SortKey], after: &[Value]) -> Condition {
        let mut any = Cond::any();
        let mut branches = 0;
        for (i, (key, bound)) in sort.iter().zip(after).enumerate() {
            let Some(step) = self.after_expr(key, bound) else {
                continue;
            };
            let prefix = sort.iter().zip(after).take(i).fold(Cond::all(), |cond, (k, v)| {
                cond.add(if v.is_null() {
                    Self::col(&k.field).is_null()
                } else {
                    Self::col(&k.field).eq(self.bind(&k.field, v))
                })
            });
            any = any.add(prefix.add(step));
            branches += 1;
        }
        if branches == 0 {
            // nothing sorts after a cursor that sits on the last possible position
            return Cond::all().add(Expr::val(1).eq(2));
        }
        any
    }

    fn after_expr(&self, key: &SortKey, bound: &Value) -> Option<Condition> {
        let column = Self::col(&key.field);
        match (key.direction, bound.is_null()) {
            (Direction::Asc, true) => Some(Cond::all().add(column.is_not_null())),
            (Direction::Asc, false) => Some(Cond::all().add(column.gt(self.bind(&key.field, bound)))),
            (Direction::Desc, true) => None,
            (Direction::Desc, false) => Some(
                Cond::any()
                    .add(Self::col(&key.field).lt(self.bind(&key.field, bound)))
                    .add(column.is_null()),
            ),
        }
    }
}

/// Escape LIKE wildcards so the needle matches literally
fn escape_like_wildcards(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[allow(clippy::cast_precision_loss)]
fn to_sea_value(field_type: &FieldType, value: &Value) -> SeaValue {
    match (field_type, value) {
        (FieldType::Integer, Value::Null) => Option::<i64>::None.into(),
        (FieldType::Float, Value::Null) => Option::<f64>::None.into(),
        (FieldType::Boolean, Value::Null) => Option::<bool>::None.into(),
        (FieldType::Timestamp, Value::Null) => Option::<DateTime<Utc>>::None.into(),
        (_, Value::Null) => Option::<String>::None.into(),
        (FieldType::Float, Value::Integer(i)) => (*i as f64).into(),
        (_, Value::Bool(b)) => (*b).into(),
        (_, Value::Integer(i)) => (*i).into(),
        (_, Value::Float(f)) => (*f).into(),
        (_, Value::String(s) | Value::Enum(s)) => s.clone().into(),
        (_, Value::Timestamp(t)) => (*t).into(),
        (_, Value::Nested(record)) => record.to_json().to_string().into(),
    }
}
