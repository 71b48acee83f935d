//! Collapsed names
//!
//! Sheet-scoped items are promoted to the top-level JSON payload under a
//! single, globally unique identifier encoding `(sheetName, itemName)`. The
//! encoding must survive the identifier rules of spreadsheet names, so the
//! characters a sheet name may carry but a name may not are escaped:
//! `_` -> `..us..`, space -> `__`, `-` -> `MNS`, `+` -> `PLS`, and the result
//! is `_<encodedSheetName>_<itemName>`.

/// Build a unique top-level identifier for an item on a generated sheet.
pub fn collapse_name(sheet_name: &str, item_name: &str) -> String {
    let encoded = sheet_name
        .replace('_', "..us..")
        .replace(' ', "__")
        .replace('-', "MNS")
        .replace('+', "PLS");
    format!("_{encoded}_{item_name}")
}

/// Split a collapsed name back into `(sheetName, itemName)`.
///
/// The two boundaries are the first two single (non-doubled) underscores; the
/// item name keeps any underscores of its own. Strings that do not carry two
/// such boundaries are not collapsed names and return `None`.
pub fn expand_name(collapsed: &str) -> Option<(String, String)> {
    let bytes = collapsed.as_bytes();
    let mut boundaries = Vec::with_capacity(2);
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'_' {
            continue;
        }
        let prev_is_underscore = i > 0 && bytes[i - 1] == b'_';
        let next_is_underscore = i + 1 < bytes.len() && bytes[i + 1] == b'_';
        if !prev_is_underscore && !next_is_underscore {
            boundaries.push(i);
            if boundaries.len() == 2 {
                break;
            }
        }
    }
    if boundaries.len() < 2 {
        return None;
    }
    let encoded_sheet = &collapsed[boundaries[0] + 1..boundaries[1]];
    let item_name = &collapsed[boundaries[1] + 1..];
    let sheet_name = encoded_sheet
        .replace("__", " ")
        .replace("..us..", "_")
        .replace("MNS", "-")
        .replace("PLS", "+");
    Some((sheet_name, item_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_plain() {
        let collapsed = collapse_name("Sheet1", "Items");
        assert_eq!(collapsed, "_Sheet1_Items");
        assert_eq!(
            expand_name(&collapsed),
            Some(("Sheet1".to_string(), "Items".to_string()))
        );
    }

    #[test]
    fn test_round_trip_special_characters() {
        for sheet in ["My Sheet", "Q1-2024", "A+B", "Two  Spaces"] {
            let collapsed = collapse_name(sheet, "Orders");
            assert_eq!(
                expand_name(&collapsed),
                Some((sheet.to_string(), "Orders".to_string())),
                "sheet [{sheet}]"
            );
        }
    }

    #[test]
    fn test_round_trip_item_with_underscores() {
        let collapsed = collapse_name("Budget", "line_item_total");
        assert_eq!(
            expand_name(&collapsed),
            Some(("Budget".to_string(), "line_item_total".to_string()))
        );
    }

    #[test]
    fn test_non_collapsed_names_unexpanded() {
        assert_eq!(expand_name("Items"), None);
        assert_eq!(expand_name("plain_name"), None);
        assert_eq!(expand_name("__double__underscores__"), None);
        assert_eq!(expand_name(""), None);
    }

    #[test]
    fn test_encoding_shape() {
        assert_eq!(collapse_name("My Sheet", "T"), "_My__Sheet_T");
        assert_eq!(collapse_name("a_b", "T"), "_a..us..b_T");
        assert_eq!(collapse_name("x-y", "T"), "_xMNSy_T");
        assert_eq!(collapse_name("x+y", "T"), "_xPLSy_T");
    }
}
