//! Well-known ids of the system grids and column types.

pub const GRIDS: &str = "f35ef7de-66e7-4e51-9a09-6ff8667da8f7";
pub const GRID_COLUMN_NAME: &str = "e9e4a415-c31e-4383-ae70-18949d6ec692";
pub const GRID_COLUMN_DESC: &str = "bc1c489d-40c3-441c-9257-c8717be290cd";
pub const GRID_COLUMN_COLUMNS: &str = "e91060d9-2887-424e-b8a1-72650cdaafb3";

pub const COLUMNS: &str = "533b6862-add3-4fef-8f93-20a17aaaaf5a";
pub const COLUMN_COLUMN_ORDER: &str = "808963d8-dced-4640-8310-00bda0c5faf4";
pub const COLUMN_COLUMN_NAME: &str = "a5194e16-415e-45fd-a603-b5db45d13d7d";
pub const COLUMN_COLUMN_TYPE: &str = "87245ad9-323a-4946-a0a7-a4082beae745";

pub const COLUMN_TYPES: &str = "2114a6ae-013c-4bb1-be6e-3ee875ae517f";
pub const TEXT_COLUMN_TYPE: &str = "65f3c258-fb1e-4f8b-96ca-f790e70d29c1";
pub const RICH_TEXT_COLUMN_TYPE: &str = "ebd6b135-0ecb-4611-b062-e48a6245a281";
pub const INT_COLUMN_TYPE: &str = "8c28d527-66f4-481c-902e-ac1e65a8abb0";
pub const REFERENCE_COLUMN_TYPE: &str = "c8b16312-d4f0-40a5-aa04-c0bc1350fea7";
pub const PASSWORD_COLUMN_TYPE: &str = "5f038b21-d9a4-45fc-aa3f-fc405342c287";
pub const BOOLEAN_COLUMN_TYPE: &str = "6e205ebd-6567-44dc-8fd4-ef6ad281ab40";
pub const UUID_COLUMN_TYPE: &str = "d7c004ff-da5e-4a18-9520-cd42b2847508";
pub const DATE_COLUMN_TYPE: &str = "28ac131f-f04b-4350-b464-3db4f8920597";

pub const USERS: &str = "018803e1-b4bf-42fa-b58f-ac5faaeeb0c2";

/// Storage prefix for values of a column type: `text`, `int` or `relationship`.
pub fn column_prefix(type_id: &str) -> Option<&'static str> {
    match type_id {
        TEXT_COLUMN_TYPE | RICH_TEXT_COLUMN_TYPE | PASSWORD_COLUMN_TYPE | UUID_COLUMN_TYPE
        | BOOLEAN_COLUMN_TYPE | DATE_COLUMN_TYPE => Some("text"),
        INT_COLUMN_TYPE => Some("int"),
        REFERENCE_COLUMN_TYPE => Some("relationship"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert_eq!(column_prefix(RICH_TEXT_COLUMN_TYPE), Some("text"));
        assert_eq!(column_prefix(INT_COLUMN_TYPE), Some("int"));
        assert_eq!(column_prefix(REFERENCE_COLUMN_TYPE), Some("relationship"));
        assert_eq!(column_prefix(GRIDS), None);
    }
}
