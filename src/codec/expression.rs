//! Expression tables: `0=Male,1=Female,2=Unknown`

/// Parse `code=label` pairs, ignoring malformed items
fn pairs(expression: &str) -> impl Iterator<Item = (&str, &str)> {
    expression
        .split(',')
        .filter_map(|item| item.split_once('='))
        .map(|(code, label)| (code.trim(), label.trim()))
}

fn map_values(value: &str, separator: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    if separator.is_empty() || !value.contains(separator) {
        return lookup(value).unwrap_or_default();
    }
    value
        .split(separator)
        .filter_map(lookup)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Code(s) to label(s). Unknown codes resolve to nothing.
pub fn convert_by_exp(value: &str, expression: &str, separator: &str) -> String {
    map_values(value, separator, |v| {
        pairs(expression)
            .find(|(code, _)| *code == v)
            .map(|(_, label)| label.to_string())
    })
}

/// Label(s) back to code(s)
pub fn reverse_by_exp(value: &str, expression: &str, separator: &str) -> String {
    map_values(value, separator, |v| {
        pairs(expression)
            .find(|(_, label)| *label == v)
            .map(|(code, _)| code.to_string())
    })
}

/// All labels in declaration order, used for dropdowns
pub fn labels(expression: &str) -> Vec<String> {
    pairs(expression).map(|(_, label)| label.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEX: &str = "0=Male,1=Female,2=Unknown";

    #[test]
    fn test_convert_single() {
        assert_eq!(convert_by_exp("1", SEX, ","), "Female");
        assert_eq!(convert_by_exp("9", SEX, ","), "");
    }

    #[test]
    fn test_reverse_single() {
        assert_eq!(reverse_by_exp("Unknown", SEX, ","), "2");
    }

    #[test]
    fn test_multi_value_with_custom_separator() {
        let exp = "a=Read,b=Write,c=Exec";
        assert_eq!(convert_by_exp("a;c", exp, ";"), "Read;Exec");
        assert_eq!(reverse_by_exp("Write;Read", exp, ";"), "b;a");
    }

    #[test]
    fn test_labels_ignore_malformed_items() {
        assert_eq!(labels("0=Off,junk,1=On"), vec!["Off", "On"]);
    }
}
