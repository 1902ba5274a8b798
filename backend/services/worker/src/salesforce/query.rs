use prodsync_pipeline::watermark::{format_watermark, ExtractionWindow};

pub const PRODUCT_FIELDS: &str = "Id, Name, ProductCode, Description, IsActive, LastModifiedDate";

/// SOQL for products modified inside `window`, oldest first.
///
/// Generates: `SELECT ... FROM Product2 WHERE LastModifiedDate >= 2026-03-01T09:00:00.000Z
/// AND LastModifiedDate < 2026-03-01T10:00:00.000Z ORDER BY LastModifiedDate ASC`
pub fn build_modified_products_soql(window: &ExtractionWindow) -> String {
    format!(
        "SELECT {PRODUCT_FIELDS} FROM Product2 WHERE LastModifiedDate >= {} AND LastModifiedDate < {} ORDER BY LastModifiedDate ASC",
        format_watermark(window.from),
        format_watermark(window.until)
    )
}

/// SOQL for products with an exact name.
pub fn build_products_by_name_soql(name: &str) -> String {
    format!(
        "SELECT {PRODUCT_FIELDS} FROM Product2 WHERE Name = '{}'",
        escape_soql_string(name)
    )
}

/// Escape a value for use inside a single-quoted SOQL string literal.
fn escape_soql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
