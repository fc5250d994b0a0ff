use crate::types::FieldValue;
use std::fmt::Debug;
use std::sync::Arc;

/// Custom formatting strategy attached to a column at schema-build time
pub trait CellHandler: Send + Sync + Debug {
    /// Field value to cell text on export
    fn format(&self, value: &FieldValue, args: &[String]) -> String;

    /// Cell text to field value on import. Defaults to the raw text.
    fn parse(&self, text: &str, _args: &[String]) -> FieldValue {
        if text.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(text.to_string())
        }
    }
}

/// Handlers addressable by name from schema files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHandler {
    Uppercase,
    Lowercase,
    Trim,
    /// Keep `args[0]` leading and `args[1]` trailing characters, mask the rest
    Mask,
    /// Substitute the value into `args[0]` at `{}`
    Template,
}

impl BuiltinHandler {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "uppercase" | "upper" => Some(Self::Uppercase),
            "lowercase" | "lower" => Some(Self::Lowercase),
            "trim" => Some(Self::Trim),
            "mask" => Some(Self::Mask),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    pub fn into_handler(self) -> Arc<dyn CellHandler> {
        Arc::new(self)
    }
}

impl CellHandler for BuiltinHandler {
    fn format(&self, value: &FieldValue, args: &[String]) -> String {
        let text = value.to_text();
        match self {
            Self::Uppercase => text.to_uppercase(),
            Self::Lowercase => text.to_lowercase(),
            Self::Trim => text.trim().to_string(),
            Self::Mask => {
                let keep_head = arg_usize(args, 0, 3);
                let keep_tail = arg_usize(args, 1, 4);
                mask(&text, keep_head, keep_tail)
            }
            Self::Template => match args.first() {
                Some(template) if !text.is_empty() => template.replacen("{}", &text, 1),
                _ => text,
            },
        }
    }

    fn parse(&self, text: &str, args: &[String]) -> FieldValue {
        let parsed = match self {
            Self::Trim => text.trim().to_string(),
            Self::Template => args
                .first()
                .and_then(|t| t.split_once("{}"))
                .and_then(|(pre, post)| text.strip_prefix(pre)?.strip_suffix(post))
                .unwrap_or(text)
                .to_string(),
            _ => text.to_string(),
        };
        if parsed.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(parsed)
        }
    }
}

fn arg_usize(args: &[String], idx: usize, default: usize) -> usize {
    args.get(idx)
        .and_then(|a| a.trim().parse().ok())
        .unwrap_or(default)
}

fn mask(text: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= head + tail {
        return text.to_string();
    }
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < head || i >= chars.len() - tail { *c } else { '*' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_by_name() {
        assert_eq!(BuiltinHandler::from_name("Upper"), Some(BuiltinHandler::Uppercase));
        assert_eq!(BuiltinHandler::from_name("rot13"), None);
    }

    #[test]
    fn test_mask_phone() {
        let v = FieldValue::Text("13812345678".into());
        assert_eq!(BuiltinHandler::Mask.format(&v, &[]), "138****5678");
        assert_eq!(BuiltinHandler::Mask.format(&v, &args(&["1", "1"])), "1*********8");
        let short = FieldValue::Text("1234".into());
        assert_eq!(BuiltinHandler::Mask.format(&short, &[]), "1234");
    }

    #[test]
    fn test_template_round_trip() {
        let a = args(&["{} kg"]);
        let text = BuiltinHandler::Template.format(&FieldValue::Int(70), &a);
        assert_eq!(text, "70 kg");
        assert_eq!(
            BuiltinHandler::Template.parse(&text, &a),
            FieldValue::Text("70".into())
        );
    }

    #[test]
    fn test_default_parse_blank_is_null() {
        assert_eq!(BuiltinHandler::Uppercase.parse("", &[]), FieldValue::Null);
    }
}
