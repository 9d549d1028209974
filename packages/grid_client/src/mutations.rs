//! Optimistic local edits and the change batches that go with them.
//!
//! Every helper mutates the cached data set first and returns the
//! [`GridPost`] to send; the reply for that scope later replaces the
//! whole entry.

use chrono::Utc;
use grid_protocol::{Column, DataSet, Grid, GridPost, ReferencePost, Reference, Row, ScopeKey, system_ids};
use serde_json::Value;

/// Column names per storage prefix run from `<prefix>1` to this.
pub const MAX_COLUMNS_PER_PREFIX: usize = 10;

/// Debounce key for coalesced edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditKey {
    Cell { scope: ScopeKey, row_id: String },
    Grid(String),
    Column { scope: ScopeKey, column_id: String },
}

/// Spreadsheet-style column label for a zero-based index: A..Z, AA, AB, ...
pub fn number_to_letters(mut n: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Lowest free storage column for a column type, e.g. `text3`.
///
/// Names freed by a removed column are handed out again first.
pub fn next_column_name(grid: &Grid, type_id: &str) -> Option<String> {
    let prefix = system_ids::column_prefix(type_id)?;
    (1..=MAX_COLUMNS_PER_PREFIX)
        .map(|n| format!("{prefix}{n}"))
        .find(|name| grid.columns.iter().all(|c| &c.name != name))
}

/// Copy of `row` with integer columns reduced to digits and `-`.
///
/// Empty and `<br>` values are cleared; strings that still don't parse are dropped.
pub fn coerce_integer_cells(grid: &Grid, row: &Row) -> Row {
    let mut coerced = row.clone();
    for column in grid.columns.iter().filter(|c| c.is_integer()) {
        let Some(value) = row.value(&column.name) else {
            continue;
        };
        let replacement = match value {
            Value::Number(_) => continue,
            Value::String(s) if s.is_empty() || s == "<br>" => None,
            Value::String(s) => {
                let digits: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
                digits.parse::<i64>().ok().map(Value::from)
            }
            _ => None,
        };
        match replacement {
            Some(v) => {
                coerced.values.insert(column.name.clone(), v);
            }
            None => {
                coerced.values.remove(&column.name);
            }
        }
    }
    coerced
}

pub fn add_row(set: &mut DataSet) -> GridPost {
    let row = Row::create(set.grid.id.clone());
    set.rows.push(row.clone());
    set.count_rows += 1;
    GridPost {
        rows_added: vec![row],
        ..Default::default()
    }
}

pub fn remove_row(set: &mut DataSet, row_id: &str) -> Option<GridPost> {
    let index = set.rows.iter().position(|r| r.id == row_id)?;
    set.rows.remove(index);
    set.count_rows -= 1;
    Some(GridPost {
        rows_deleted: vec![Row::new(set.grid.id.clone(), row_id)],
        ..Default::default()
    })
}

/// Stamp the row as updated and build its edit batch.
pub fn edit_row(set: &mut DataSet, row_id: &str) -> Option<GridPost> {
    let row = set.row_mut(row_id)?;
    row.updated = Some(Utc::now());
    let row = row.clone();
    Some(GridPost {
        rows_edited: vec![coerce_integer_cells(&set.grid, &row)],
        ..Default::default()
    })
}

/// Append a column of the type described by `column_type` (a row of the
/// column types grid). Relationship columns name the grid they point to.
pub fn add_column(set: &mut DataSet, column_type: &Row, reference_grid: Option<&str>) -> Option<GridPost> {
    let name = next_column_name(&set.grid, &column_type.id)?;
    let position = set.grid.columns.len();
    let label = number_to_letters(position);
    let order = position as i64 + 1;
    let column = Column {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.clone(),
        order_number: Some(order),
        owned: true,
        label: Some(label.clone()),
        type_name: column_type.text("text1").unwrap_or("?").to_string(),
        type_id: column_type.id.clone(),
        grid_id: set.grid.id.clone(),
        grid: None,
        grid_prompt_id: reference_grid.map(str::to_string),
        bidirectional: None,
    };

    let mut row = Row::create(system_ids::COLUMNS)
        .with_value("text1", label)
        .with_value("text2", name)
        .with_value("int1", order);
    row.id = column.id.clone();

    let mut references = vec![
        ReferencePost::new("relationship1", &column.id, system_ids::GRIDS, &set.grid.id),
        ReferencePost::new("relationship1", &column.id, system_ids::COLUMN_TYPES, &column_type.id),
    ];
    if let Some(grid) = reference_grid {
        references.push(ReferencePost::new("relationship2", &column.id, system_ids::GRIDS, grid));
    }
    set.grid.columns.push(column);

    Some(GridPost {
        rows_added: vec![row],
        referenced_values_added: references,
        ..Default::default()
    })
}

pub fn remove_column(set: &mut DataSet, column_id: &str) -> Option<GridPost> {
    let index = set.grid.columns.iter().position(|c| c.id == column_id)?;
    let column = set.grid.columns.remove(index);
    Some(GridPost {
        rows_deleted: vec![Row::new(system_ids::COLUMNS, &column.id)],
        referenced_values_removed: vec![
            ReferencePost::new("relationship1", &column.id, system_ids::GRIDS, &set.grid.id),
            ReferencePost::new("relationship1", &column.id, system_ids::COLUMN_TYPES, &column.type_id),
        ],
        ..Default::default()
    })
}

/// Metadata row for a new, empty grid.
pub fn new_grid() -> (String, GridPost) {
    let row = Row::create(system_ids::GRIDS)
        .with_value("text1", "New grid")
        .with_value("text2", "Untitled")
        .with_value("text3", "journal");
    let row = Row {
        display_string: Some("New grid".to_string()),
        ..row
    };
    (
        row.id.clone(),
        GridPost {
            rows_added: vec![row],
            ..Default::default()
        },
    )
}

/// Link `target` into the row's values for a relationship column.
pub fn add_reference(set: &mut DataSet, column_id: &str, row_id: &str, target: &Row) -> Option<GridPost> {
    let column = set.grid.column(column_id)?.clone();
    let row = set.row_mut(row_id)?;
    match row.reference_mut(&column.name) {
        Some(reference) => reference.rows.push(target.clone()),
        None => row.references.push(Reference {
            owned: column.owned,
            label: column.label.clone(),
            name: Some(column.name.clone()),
            grid_id: column.grid_prompt_id.clone(),
            rows: vec![target.clone()],
        }),
    }
    Some(GridPost {
        referenced_values_added: vec![ReferencePost::new(column.name, row_id, &target.grid_id, &target.id)],
        ..Default::default()
    })
}

pub fn remove_reference(set: &mut DataSet, column_id: &str, row_id: &str, target: &Row) -> Option<GridPost> {
    let column = set.grid.column(column_id)?.clone();
    let row = set.row_mut(row_id)?;
    if let Some(reference) = row.reference_mut(&column.name) {
        reference.rows.retain(|r| r.id != target.id);
    }
    Some(GridPost {
        referenced_values_removed: vec![ReferencePost::new(column.name, row_id, &target.grid_id, &target.id)],
        ..Default::default()
    })
}

pub fn grid_metadata(grid: &Grid) -> GridPost {
    GridPost {
        rows_edited: vec![grid.as_row()],
        ..Default::default()
    }
}

pub fn column_metadata(column: &Column) -> GridPost {
    let mut row = Row::new(system_ids::COLUMNS, &column.id)
        .with_value("text1", column.label.clone().unwrap_or_default())
        .with_value("text2", column.name.clone());
    if let Some(order) = column.order_number {
        row = row.with_value("int1", order);
    }
    row.updated = Some(Utc::now());
    GridPost {
        rows_edited: vec![row],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{data_set, text_column};
    use serde_json::json;

    fn int_column(id: &str, grid: &str, name: &str) -> Column {
        Column {
            type_id: system_ids::INT_COLUMN_TYPE.to_string(),
            ..text_column(id, grid, name)
        }
    }

    fn column_type(type_id: &str, name: &str) -> Row {
        Row::new(system_ids::COLUMN_TYPES, type_id).with_value("text1", name)
    }

    #[test]
    fn letters() {
        assert_eq!(number_to_letters(0), "A");
        assert_eq!(number_to_letters(25), "Z");
        assert_eq!(number_to_letters(26), "AA");
        assert_eq!(number_to_letters(27), "AB");
        assert_eq!(number_to_letters(701), "ZZ");
        assert_eq!(number_to_letters(702), "AAA");
    }

    #[test]
    fn column_names_count_per_prefix() {
        let mut set = data_set("g1", None, 0);
        set.grid.columns.push(text_column("c1", "g1", "text1"));
        set.grid.columns.push(int_column("c2", "g1", "int1"));
        assert_eq!(
            next_column_name(&set.grid, system_ids::RICH_TEXT_COLUMN_TYPE).as_deref(),
            Some("text2")
        );
        assert_eq!(
            next_column_name(&set.grid, system_ids::REFERENCE_COLUMN_TYPE).as_deref(),
            Some("relationship1")
        );
        assert_eq!(next_column_name(&set.grid, "unknown"), None);

        for i in 2..=MAX_COLUMNS_PER_PREFIX {
            set.grid.columns.push(text_column(&format!("t{i}"), "g1", &format!("text{i}")));
        }
        assert_eq!(next_column_name(&set.grid, system_ids::TEXT_COLUMN_TYPE), None);
    }

    #[test]
    fn removed_column_name_is_reused() {
        let mut set = data_set("g1", None, 0);
        set.grid.columns.push(text_column("c1", "g1", "text1"));
        set.grid.columns.push(text_column("c2", "g1", "text2"));
        remove_column(&mut set, "c1").unwrap();
        assert_eq!(
            next_column_name(&set.grid, system_ids::TEXT_COLUMN_TYPE).as_deref(),
            Some("text1")
        );

        set.grid.columns.push(text_column("c3", "g1", "text1"));
        assert_eq!(
            next_column_name(&set.grid, system_ids::TEXT_COLUMN_TYPE).as_deref(),
            Some("text3")
        );
    }

    #[test]
    fn integer_cells_are_coerced() {
        let mut set = data_set("g1", None, 0);
        set.grid.columns.push(int_column("c1", "g1", "int1"));
        set.grid.columns.push(int_column("c2", "g1", "int2"));
        set.grid.columns.push(int_column("c3", "g1", "int3"));
        set.grid.columns.push(text_column("c4", "g1", "text1"));
        let row = Row::new("g1", "r1")
            .with_value("int1", "1 2-3x")
            .with_value("int2", "<br>")
            .with_value("int3", 7)
            .with_value("text1", "12ab");
        let coerced = coerce_integer_cells(&set.grid, &row);
        assert_eq!(coerced.value("int1"), None);
        assert_eq!(coerced.value("int2"), None);
        assert_eq!(coerced.value("int3"), Some(&json!(7)));
        assert_eq!(coerced.text("text1"), Some("12ab"));

        let row = Row::new("g1", "r1").with_value("int1", "1 234");
        assert_eq!(coerce_integer_cells(&set.grid, &row).value("int1"), Some(&json!(1234)));
        let row = Row::new("g1", "r1").with_value("int1", "-42");
        assert_eq!(coerce_integer_cells(&set.grid, &row).value("int1"), Some(&json!(-42)));
    }

    #[test]
    fn add_and_remove_row_track_count() {
        let mut set = data_set("g1", None, 2);
        let post = add_row(&mut set);
        assert_eq!(set.count_rows, 3);
        let added = &post.rows_added[0];
        assert_eq!(added.grid_id, "g1");
        assert!(added.created.is_some());

        let post = remove_row(&mut set, &added.id.clone()).unwrap();
        assert_eq!(set.count_rows, 2);
        assert_eq!(post.rows_deleted[0].grid_id, "g1");
        assert!(remove_row(&mut set, "missing").is_none());
    }

    #[test]
    fn add_column_builds_metadata_batch() {
        let mut set = data_set("g1", None, 0);
        set.grid.columns.push(text_column("c1", "g1", "text1"));
        let post = add_column(
            &mut set,
            &column_type(system_ids::REFERENCE_COLUMN_TYPE, "Reference"),
            Some("g2"),
        )
        .unwrap();

        let column = set.grid.columns.last().unwrap();
        assert_eq!(column.name, "relationship1");
        assert_eq!(column.label.as_deref(), Some("B"));
        assert_eq!(column.order_number, Some(2));
        assert_eq!(column.grid_prompt_id.as_deref(), Some("g2"));

        let row = &post.rows_added[0];
        assert_eq!(row.grid_id, system_ids::COLUMNS);
        assert_eq!(row.id, column.id);
        assert_eq!(row.text("text2"), Some("relationship1"));
        assert_eq!(post.referenced_values_added.len(), 3);
        assert_eq!(post.referenced_values_added[2].column_name, "relationship2");
        assert_eq!(post.referenced_values_added[2].id, "g2");
    }

    #[test]
    fn remove_column_unlinks_grid_and_type() {
        let mut set = data_set("g1", None, 0);
        set.grid.columns.push(text_column("c1", "g1", "text1"));
        let post = remove_column(&mut set, "c1").unwrap();
        assert!(set.grid.columns.is_empty());
        assert_eq!(post.rows_deleted[0].id, "c1");
        assert_eq!(post.referenced_values_removed[1].id, system_ids::TEXT_COLUMN_TYPE);
        assert!(remove_column(&mut set, "c1").is_none());
    }

    #[test]
    fn references_are_linked_and_unlinked() {
        let mut set = data_set("g1", None, 1);
        let mut column = text_column("c1", "g1", "relationship1");
        column.type_id = system_ids::REFERENCE_COLUMN_TYPE.to_string();
        column.grid_prompt_id = Some("g2".to_string());
        set.grid.columns.push(column);
        let row_id = set.rows[0].id.clone();
        let target = Row::new("g2", "t1");

        let post = add_reference(&mut set, "c1", &row_id, &target).unwrap();
        assert_eq!(post.referenced_values_added[0].to_grid_id, "g2");
        let reference = set.row(&row_id).unwrap().reference("relationship1").unwrap();
        assert_eq!(reference.rows.len(), 1);
        assert_eq!(reference.grid_id.as_deref(), Some("g2"));

        add_reference(&mut set, "c1", &row_id, &Row::new("g2", "t2")).unwrap();
        let post = remove_reference(&mut set, "c1", &row_id, &target).unwrap();
        assert_eq!(post.referenced_values_removed[0].id, "t1");
        let reference = set.row(&row_id).unwrap().reference("relationship1").unwrap();
        assert_eq!(reference.rows.len(), 1);
        assert_eq!(reference.rows[0].id, "t2");
    }

    #[test]
    fn new_grid_row_targets_grids() {
        let (id, post) = new_grid();
        assert_eq!(post.rows_added[0].id, id);
        assert_eq!(post.rows_added[0].grid_id, system_ids::GRIDS);
        assert_eq!(post.rows_added[0].display_string.as_deref(), Some("New grid"));
    }
}
