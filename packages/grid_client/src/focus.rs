//! Focus: the grid cell the session currently points at.

use crate::dataset::DataSetCache;

/// A view pointer into the cache, by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Focus {
    grid_id: Option<String>,
    column_id: Option<String>,
    row_id: Option<String>,
}

impl Focus {
    pub fn set(&mut self, grid_id: &str, column_id: Option<&str>, row_id: Option<&str>) {
        self.grid_id = Some(grid_id.to_string());
        self.column_id = column_id.map(str::to_string);
        self.row_id = row_id.map(str::to_string);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_set(&self) -> bool {
        self.grid_id.is_some()
    }

    pub fn grid_id(&self) -> Option<&str> {
        self.grid_id.as_deref()
    }

    pub fn column_id(&self) -> Option<&str> {
        self.column_id.as_deref()
    }

    pub fn row_id(&self) -> Option<&str> {
        self.row_id.as_deref()
    }

    pub fn is_focused(&self, grid_id: &str, column_id: &str, row_id: &str) -> bool {
        self.grid_id.as_deref() == Some(grid_id)
            && self.column_id.as_deref() == Some(column_id)
            && self.row_id.as_deref() == Some(row_id)
    }

    /// Point at whatever a `locate` reply names, as far as the cache can resolve it.
    ///
    /// A grid without columns gets grid-level focus; an unknown column keeps the
    /// row; an uncached grid clears focus.
    pub fn locate(
        &mut self,
        cache: &DataSetCache,
        grid_id: Option<&str>,
        column_id: Option<&str>,
        row_id: Option<&str>,
    ) {
        let Some(set) = grid_id.and_then(|id| cache.find_grid(id)) else {
            self.reset();
            return;
        };
        let grid = set.scope().grid_id;
        if set.grid.columns.is_empty() {
            self.set(&grid, None, None);
            return;
        }
        let row = row_id.and_then(|id| set.row(id)).map(|r| r.id.as_str());
        let column = column_id
            .and_then(|id| set.grid.column(id))
            .map(|c| c.id.as_str());
        self.set(&grid, column, row);
    }
}
