// src/import/normalizer.rs
use csv::StringRecord;

use super::error::{ReadError, RowError};
use crate::models::product::ProductRecord;

pub const MAX_SKU_LEN: usize = 255;
pub const MAX_NAME_LEN: usize = 500;

/// Positions of the recognised columns in the header row. Column names are
/// matched case-insensitively; unknown columns are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    sku: usize,
    name: usize,
    description: Option<usize>,
    is_active: Option<usize>,
}

impl Columns {
    pub fn from_headers(headers: &StringRecord) -> Result<Self, ReadError> {
        let position = |wanted: &str| {
            headers.iter().position(|h| {
                h.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(wanted)
            })
        };

        Ok(Self {
            sku: position("sku").ok_or(ReadError::MissingColumn("sku"))?,
            name: position("name").ok_or(ReadError::MissingColumn("name"))?,
            description: position("description"),
            is_active: position("is_active"),
        })
    }
}

/// Turns one raw CSV record into a [`ProductRecord`], or explains why the row
/// has to be skipped. Pure: never touches the store.
pub fn normalize(record: &StringRecord, columns: &Columns) -> Result<ProductRecord, RowError> {
    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

    let sku = field(columns.sku);
    if sku.is_empty() {
        return Err(RowError::MissingField("sku"));
    }
    if sku.chars().count() > MAX_SKU_LEN {
        return Err(RowError::TooLong { field: "sku", max: MAX_SKU_LEN });
    }

    let name = field(columns.name);
    if name.is_empty() {
        return Err(RowError::MissingField("name"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RowError::TooLong { field: "name", max: MAX_NAME_LEN });
    }

    let description = columns
        .description
        .map(field)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let is_active = columns
        .is_active
        .map(field)
        .filter(|v| !v.is_empty())
        .map(parse_active);

    Ok(ProductRecord {
        sku: sku.to_string(),
        name: name.to_string(),
        description,
        is_active,
    })
}

/// Unrecognised values fall back to active.
pub fn parse_active(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    !matches!(value.as_str(), "false" | "0" | "no" | "inactive")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(header: &[&str]) -> Columns {
        Columns::from_headers(&StringRecord::from(header.to_vec())).unwrap()
    }

    #[test]
    fn trims_and_keeps_description() {
        let cols = columns(&["sku", "name", "description"]);
        let row = normalize(&StringRecord::from(vec!["  A1 ", " Widget ", " d1 "]), &cols).unwrap();
        assert_eq!(
            row,
            ProductRecord {
                sku: "A1".into(),
                name: "Widget".into(),
                description: Some("d1".into()),
                is_active: None,
            }
        );
    }

    #[test]
    fn blank_description_becomes_none() {
        let cols = columns(&["sku", "name", "description"]);
        let row = normalize(&StringRecord::from(vec!["A2", "Gadget", "   "]), &cols).unwrap();
        assert_eq!(row.description, None);
    }

    #[test]
    fn rejects_missing_sku_or_name() {
        let cols = columns(&["sku", "name"]);
        assert_eq!(
            normalize(&StringRecord::from(vec!["  ", "Widget"]), &cols),
            Err(RowError::MissingField("sku"))
        );
        assert_eq!(
            normalize(&StringRecord::from(vec!["A1", ""]), &cols),
            Err(RowError::MissingField("name"))
        );
        // short row: the name field is absent altogether
        assert_eq!(
            normalize(&StringRecord::from(vec!["A1"]), &cols),
            Err(RowError::MissingField("name"))
        );
    }

    #[test]
    fn rejects_oversized_fields() {
        let cols = columns(&["sku", "name"]);
        let long_sku = "A".repeat(MAX_SKU_LEN + 1);
        assert_eq!(
            normalize(&StringRecord::from(vec![long_sku.as_str(), "ok"]), &cols),
            Err(RowError::TooLong { field: "sku", max: MAX_SKU_LEN })
        );
        let long_name = "n".repeat(MAX_NAME_LEN + 1);
        assert!(normalize(&StringRecord::from(vec!["A1", long_name.as_str()]), &cols).is_err());
    }

    #[test]
    fn header_lookup_ignores_case_order_and_bom() {
        let cols = columns(&["\u{feff}Name", "price", " SKU "]);
        let row = normalize(&StringRecord::from(vec!["Widget", "9.99", "A1"]), &cols).unwrap();
        assert_eq!(row.sku, "A1");
        assert_eq!(row.name, "Widget");
    }

    #[test]
    fn header_without_sku_is_rejected() {
        let err = Columns::from_headers(&StringRecord::from(vec!["name", "description"])).unwrap_err();
        assert!(matches!(err, ReadError::MissingColumn("sku")));
    }

    #[test]
    fn is_active_column_is_parsed() {
        let cols = columns(&["sku", "name", "is_active"]);
        let inactive = normalize(&StringRecord::from(vec!["A1", "W", "Inactive"]), &cols).unwrap();
        assert_eq!(inactive.is_active, Some(false));
        let active = normalize(&StringRecord::from(vec!["A2", "W", "yes"]), &cols).unwrap();
        assert_eq!(active.is_active, Some(true));
        let blank = normalize(&StringRecord::from(vec!["A3", "W", ""]), &cols).unwrap();
        assert_eq!(blank.is_active, None);
        assert!(parse_active("maybe"));
    }
}
