//! Documents, queries and cursors.
//!
//! A query is a single collection scan described by equality/range filters, at most one
//! ordering field, a limit and an optional `start_after` cursor. The same description is
//! evaluated by SQL in the store and in memory by the fallback strategy, so both paths
//! must agree on comparison and ordering rules defined here.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Upper bound used to turn a prefix into a half-open range.
pub const PREFIX_SENTINEL: char = '\u{f8ff}';

/// Timestamp format written into every document.
///
/// Fixed-width RFC 3339 with millisecond precision keeps string order equal to time order.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(Value::as_f64)
    }

    /// Deserialize the document into a model, with `id` injected as a field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut map = self.data.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StoreError::Decode(format!("document {}: {}", self.id, e)))
    }
}

/// Decode a batch, skipping (and logging) documents that do not fit the model.
pub fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::In => "IN",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn new(field: &str, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, FilterOp::In, Value::Array(values))
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gt, value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte, value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt, value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lte, value.into())
    }

    /// Range filters matching every string that starts with `prefix`.
    pub fn prefix(field: &str, prefix: &str) -> [Self; 2] {
        [
            Self::gte(field, prefix),
            Self::lt(field, format!("{}{}", prefix, PREFIX_SENTINEL)),
        ]
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.field(&self.field);
        match self.op {
            FilterOp::Eq => match (actual, &self.value) {
                (None, Value::Null) => true,
                (Some(a), expected) => compare_values(a, expected) == Some(Ordering::Equal),
                (None, _) => false,
            },
            FilterOp::In => match (actual, &self.value) {
                (Some(a), Value::Array(options)) => options
                    .iter()
                    .any(|o| compare_values(a, o) == Some(Ordering::Equal)),
                _ => false,
            },
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let Some(ordering) = actual.and_then(|a| compare_values(a, &self.value)) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Gte => ordering != Ordering::Less,
                    FilterOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

/// Compare two JSON scalars of the same kind; different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    /// Order two documents by this field, ties broken by id in the same direction.
    ///
    /// Documents missing the field sort after every document that has it.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = match (a.field(&self.field), b.field(&self.field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = by_field.then_with(|| a.id.cmp(&b.id));
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Position after which the next page starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Value of the ordering field of the last document, `null` when unordered
    pub value: Value,
    pub id: String,
}

/// Declarative query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }

    /// Composite index this query needs, if it touches more than one field.
    pub fn required_index(&self) -> Option<IndexKey> {
        let mut fields: BTreeSet<String> = self.filters.iter().map(|f| f.field.clone()).collect();
        if let Some(order) = &self.order_by {
            fields.insert(order.field.clone());
        }
        (fields.len() > 1).then(|| IndexKey {
            collection: self.collection.clone(),
            fields,
        })
    }

    /// Cursor pointing at `doc` under this query's ordering.
    pub fn cursor_for(&self, doc: &Document) -> Cursor {
        let value = self
            .order_by
            .as_ref()
            .and_then(|o| doc.field(&o.field).cloned())
            .unwrap_or(Value::Null);
        Cursor {
            value,
            id: doc.id.clone(),
        }
    }

    /// An ordered query only sees documents carrying the ordering field.
    pub fn is_ordered_on(&self, doc: &Document) -> bool {
        match &self.order_by {
            Some(order) => doc.field(&order.field).is_some(),
            None => true,
        }
    }

    /// True if `doc` sorts strictly after the cursor.
    pub fn is_after_cursor(&self, doc: &Document) -> bool {
        let Some(cursor) = &self.start_after else {
            return true;
        };
        let Some(order) = &self.order_by else {
            return doc.id > cursor.id;
        };
        // A cursor without an ordering value points past every orderable document.
        if cursor.value.is_null() || doc.field(&order.field).is_none() {
            return false;
        }
        let marker = Document::new(
            cursor.id.clone(),
            std::iter::once((order.field.clone(), cursor.value.clone())).collect(),
        );
        order.compare(doc, &marker) == Ordering::Greater
    }

    /// Evaluate the whole query in memory, with the same results the store gives.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut rows: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.filters.iter().all(|f| f.matches(d)))
            .filter(|d| self.is_ordered_on(d))
            .filter(|d| self.is_after_cursor(d))
            .collect();
        match &self.order_by {
            Some(order) => rows.sort_by(|a, b| order.compare(a, b)),
            None => rows.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

/// A composite index: a collection plus the set of fields it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub collection: String,
    pub fields: BTreeSet<String>,
}

impl IndexKey {
    pub fn new<S: AsRef<str>>(collection: &str, fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            collection: collection.to_string(),
            fields: fields.into_iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        write!(f, "{}({})", self.collection, fields.join(","))
    }
}

/// Which composite indexes exist.
#[derive(Debug, Clone, Default)]
pub struct IndexPolicy {
    enforce: bool,
    declared: HashSet<IndexKey>,
}

impl IndexPolicy {
    pub fn new(enforce: bool, declared: impl IntoIterator<Item = IndexKey>) -> Self {
        Self {
            enforce,
            declared: declared.into_iter().collect(),
        }
    }

    /// Accept every query.
    pub fn permissive() -> Self {
        Self::new(false, [])
    }

    pub fn check(&self, query: &Query) -> Result<(), StoreError> {
        if !self.enforce {
            return Ok(());
        }
        match query.required_index() {
            Some(index) if !self.declared.contains(&index) => {
                Err(StoreError::MissingIndex(index.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        match data {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn test_filters_match_scalars() {
        let d = doc("d1", json!({ "status": "active", "amount": 250, "active": true }));
        assert!(Filter::eq("status", "active").matches(&d));
        assert!(Filter::eq("amount", 250.0).matches(&d));
        assert!(Filter::eq("active", true).matches(&d));
        assert!(!Filter::eq("active", "true").matches(&d));
        assert!(Filter::is_in("status", ["active", "completed"]).matches(&d));
        assert!(Filter::gte("amount", 250).matches(&d));
        assert!(!Filter::gt("amount", 250).matches(&d));
        assert!(!Filter::lt("missing", 10).matches(&d));
    }

    #[test]
    fn test_prefix_filters() {
        let d = doc("d1", json!({ "nameLower": "okul çantası" }));
        let [low, high] = Filter::prefix("nameLower", "okul");
        assert!(low.matches(&d) && high.matches(&d));
        let [low, high] = Filter::prefix("nameLower", "kitap");
        assert!(!(low.matches(&d) && high.matches(&d)));
    }

    #[test]
    fn test_required_index() {
        let single = Query::collection("notifications").order_by("createdAt", Direction::Desc);
        assert!(single.required_index().is_none());

        let composite = Query::collection("donations")
            .filter(Filter::eq("status", "completed"))
            .order_by("createdAt", Direction::Desc);
        assert_eq!(
            composite.required_index(),
            Some(IndexKey::new("donations", ["status", "createdAt"]))
        );
    }

    #[test]
    fn test_apply_orders_and_pages_with_cursor() {
        let docs = vec![
            doc("a", json!({ "createdAt": "2025-01-01T00:00:00.000Z" })),
            doc("b", json!({ "createdAt": "2025-01-03T00:00:00.000Z" })),
            doc("c", json!({ "createdAt": "2025-01-02T00:00:00.000Z" })),
            doc("d", json!({})),
        ];
        let first = Query::collection("x")
            .order_by("createdAt", Direction::Desc)
            .limit(2);
        let page = first.apply(docs.clone());
        let ids: Vec<&str> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);

        let cursor = first.cursor_for(&page[1]);
        let next = first.clone().start_after(Some(cursor)).apply(docs.clone());
        let ids: Vec<&str> = next.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a"]);

        // Unordered, the document without the field is visible again
        let all = Query::collection("x").apply(docs);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_index_policy() {
        let query = Query::collection("team_members")
            .filter(Filter::eq("emailLower", "a@b.com"))
            .filter(Filter::eq("active", true));

        assert!(IndexPolicy::permissive().check(&query).is_ok());
        assert!(matches!(
            IndexPolicy::new(true, []).check(&query),
            Err(StoreError::MissingIndex(_))
        ));
        let declared = IndexPolicy::new(true, [IndexKey::new("team_members", ["active", "emailLower"])]);
        assert!(declared.check(&query).is_ok());
    }

    #[test]
    fn test_decode_injects_id() {
        #[derive(Deserialize)]
        struct Row {
            id: String,
            title: String,
        }
        let row: Row = doc("n1", json!({ "title": "Merhaba" })).decode().unwrap();
        assert_eq!(row.id, "n1");
        assert_eq!(row.title, "Merhaba");
    }
}
