//! Grid payloads: rows, columns, grid definitions, data sets and mutation batches.
//!
//! Row values use named scalar fields (`text1`, `int1`, `relationship1`, ...)
//! flattened next to the row identity, so a row serializes as
//! `{"gridUuid": "...", "uuid": "...", "text1": "hello", "int1": 3}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::system_ids;

/// One row of a grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(rename = "gridUuid")]
    pub grid_id: String,
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_string: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Named scalar values keyed by column name.
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(grid_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            grid_id: grid_id.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    /// A fresh row with a new id, stamped created/updated now.
    pub fn create(grid_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            grid_id: grid_id.into(),
            id: uuid::Uuid::new_v4().to_string(),
            created: Some(now),
            updated: Some(now),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(Value::as_str)
    }

    pub fn reference(&self, column: &str) -> Option<&Reference> {
        self.references
            .iter()
            .find(|r| r.name.as_deref() == Some(column))
    }

    pub fn reference_mut(&mut self, column: &str) -> Option<&mut Reference> {
        self.references
            .iter_mut()
            .find(|r| r.name.as_deref() == Some(column))
    }
}

/// A relationship column's values as seen from one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub owned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "gridUuid", default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Row>,
}

/// Column definition inside a grid schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(rename = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<i64>,
    #[serde(default)]
    pub owned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(rename = "typeUuid", default)]
    pub type_id: String,
    #[serde(rename = "gridUuid", default)]
    pub grid_id: String,
    /// For usage entries: the grid that holds this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<Box<Grid>>,
    /// For relationship columns: the grid the values are picked from.
    #[serde(
        rename = "gridPromptUuid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub grid_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidirectional: Option<bool>,
}

impl Column {
    pub fn is_reference(&self) -> bool {
        self.type_id == system_ids::REFERENCE_COLUMN_TYPE
    }

    pub fn is_integer(&self) -> bool {
        self.type_id == system_ids::INT_COLUMN_TYPE
    }
}

/// Grid definition. A grid is itself a row of the Grids system grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "gridUuid", default)]
    pub grid_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
    /// Columns of other grids that reference this grid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns_usage: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl Grid {
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    /// Grids this grid points to through relationship columns.
    pub fn forward_references(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.is_reference())
            .filter_map(|c| c.grid_prompt_id.as_deref())
    }

    /// Grids holding relationship columns that point to this grid.
    pub fn backward_references(&self) -> impl Iterator<Item = &str> {
        self.columns_usage
            .iter()
            .filter_map(|c| c.grid.as_ref().map(|g| g.id.as_str()))
    }

    /// The grid as a row of the Grids system grid, for metadata edits.
    pub fn as_row(&self) -> Row {
        Row {
            grid_id: if self.grid_id.is_empty() {
                system_ids::GRIDS.to_string()
            } else {
                self.grid_id.clone()
            },
            id: self.id.clone(),
            display_string: self.display_string.clone(),
            references: Vec::new(),
            created: self.created,
            updated: Some(Utc::now()),
            values: self.values.clone(),
        }
    }
}

/// Reference-column filter applied when loading a grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "filterColumnOwned", default)]
    pub owned: bool,
    #[serde(rename = "filterColumnName")]
    pub column_name: String,
    #[serde(rename = "filterColumnGridUuid", default)]
    pub grid_id: String,
    #[serde(rename = "filterColumnValue", default)]
    pub value: String,
}

/// Identity of a cached data set: the same grid under a different row
/// scope or filter is a distinct entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub grid_id: String,
    /// Empty when the whole grid is loaded.
    pub row_id: String,
    pub filter: Option<Filter>,
}

impl ScopeKey {
    pub fn grid(grid_id: impl Into<String>) -> Self {
        Self {
            grid_id: grid_id.into(),
            ..Default::default()
        }
    }

    pub fn row(grid_id: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            grid_id: grid_id.into(),
            row_id: row_id.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn is_row_scoped(&self) -> bool {
        !self.row_id.is_empty()
    }
}

/// Relationship added to or removed from a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencePost {
    pub column_name: String,
    #[serde(rename = "fromUuid")]
    pub from_id: String,
    #[serde(rename = "toGridUuid")]
    pub to_grid_id: String,
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default)]
    pub owned: bool,
}

impl ReferencePost {
    pub fn new(
        column_name: impl Into<String>,
        from_id: impl Into<String>,
        to_grid_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            column_name: column_name.into(),
            from_id: from_id.into(),
            to_grid_id: to_grid_id.into(),
            id: id.into(),
            owned: false,
        }
    }
}

/// Batched mutation sent with a `change` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPost {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows_added: Vec<Row>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows_edited: Vec<Row>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows_deleted: Vec<Row>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_values_added: Vec<ReferencePost>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_values_removed: Vec<ReferencePost>,
}

impl GridPost {
    pub fn is_empty(&self) -> bool {
        self.rows_added.is_empty()
            && self.rows_edited.is_empty()
            && self.rows_deleted.is_empty()
            && self.referenced_values_added.is_empty()
            && self.referenced_values_removed.is_empty()
    }
}

/// Client-side cache of one grid's schema and rows for a scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSet {
    /// Empty on change replies that only echo deltas.
    #[serde(default)]
    pub grid: Grid,
    #[serde(default)]
    pub count_rows: i64,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(rename = "gridUuid", default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<String>,
    #[serde(rename = "rowUuid", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(rename = "columnUuid", default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    /// Deltas echoed back by a `change` reply.
    #[serde(flatten)]
    pub changes: GridPost,
    #[serde(default)]
    pub can_view_rows: bool,
    #[serde(default)]
    pub can_edit_rows: bool,
    #[serde(default)]
    pub can_add_rows: bool,
    #[serde(default)]
    pub can_edit_grid: bool,
    #[serde(flatten)]
    pub filter: Option<Filter>,
}

impl DataSet {
    pub fn scope(&self) -> ScopeKey {
        ScopeKey {
            grid_id: self
                .grid_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| self.grid.id.clone()),
            row_id: self.row_id.clone().unwrap_or_default(),
            filter: self.filter.clone(),
        }
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn row_mut(&mut self, row_id: &str) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == row_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_values_flatten_next_to_identity() {
        let row = Row::new("g1", "r1")
            .with_value("text1", "hello")
            .with_value("int1", 3);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            json!({"gridUuid": "g1", "uuid": "r1", "text1": "hello", "int1": 3})
        );
        let back: Row = serde_json::from_value(json).unwrap();
        assert_eq!(back.text("text1"), Some("hello"));
        assert_eq!(back, row);
    }

    #[test]
    fn scope_falls_back_to_grid_uuid() {
        let set: DataSet = serde_json::from_value(json!({
            "grid": {"uuid": "g1", "gridUuid": system_ids::GRIDS, "name": "Tasks"},
            "countRows": 0,
            "rows": []
        }))
        .unwrap();
        assert_eq!(set.scope(), ScopeKey::grid("g1"));
        assert!(set.filter.is_none());
    }

    #[test]
    fn scope_includes_row_and_filter() {
        let set: DataSet = serde_json::from_value(json!({
            "grid": {"uuid": "g1"},
            "gridUuid": "g1",
            "rowUuid": "r9",
            "filterColumnOwned": true,
            "filterColumnName": "relationship1",
            "filterColumnGridUuid": "g2",
            "filterColumnValue": "r2"
        }))
        .unwrap();
        let scope = set.scope();
        assert_eq!(scope.row_id, "r9");
        assert!(scope.is_row_scoped());
        let filter = scope.filter.unwrap();
        assert!(filter.owned);
        assert_eq!(filter.column_name, "relationship1");
        assert_eq!(filter.value, "r2");
    }

    #[test]
    fn grid_references_both_directions() {
        let grid: Grid = serde_json::from_value(json!({
            "uuid": "g1",
            "columns": [
                {"uuid": "c1", "name": "text1", "typeUuid": system_ids::TEXT_COLUMN_TYPE, "gridUuid": "g1"},
                {"uuid": "c2", "name": "relationship1", "typeUuid": system_ids::REFERENCE_COLUMN_TYPE,
                 "gridUuid": "g1", "gridPromptUuid": "g2"}
            ],
            "columnsUsage": [
                {"uuid": "c3", "name": "relationship1", "gridUuid": "g3", "grid": {"uuid": "g3"}}
            ]
        }))
        .unwrap();
        assert_eq!(grid.forward_references().collect::<Vec<_>>(), vec!["g2"]);
        assert_eq!(grid.backward_references().collect::<Vec<_>>(), vec!["g3"]);
    }

    #[test]
    fn empty_post_serializes_to_empty_object() {
        let post = GridPost::default();
        assert!(post.is_empty());
        assert_eq!(serde_json::to_value(&post).unwrap(), json!({}));
    }
}
