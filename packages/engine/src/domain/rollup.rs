#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupFunction {
    Sum,
    Count,
    CountA,
    CountAll,
    Average,
    Min,
    Max,
    And,
    Or,
    Xor,
    ArrayJoin,
    Concatenate,
    ArrayUnique,
    ArrayCompact,
}

impl RollupFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name.to_ascii_lowercase().as_str() {
            "sum" => Self::Sum,
            "count" => Self::Count,
            "counta" => Self::CountA,
            "countall" => Self::CountAll,
            "average" | "avg" => Self::Average,
            "min" => Self::Min,
            "max" => Self::Max,
            "and" => Self::And,
            "or" => Self::Or,
            "xor" => Self::Xor,
            "array_join" => Self::ArrayJoin,
            "concatenate" => Self::Concatenate,
            "array_unique" => Self::ArrayUnique,
            "array_compact" => Self::ArrayCompact,
            _ => return None,
        };
        Some(function)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::CountA => "counta",
            Self::CountAll => "countall",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::ArrayJoin => "array_join",
            Self::Concatenate => "concatenate",
            Self::ArrayUnique => "array_unique",
            Self::ArrayCompact => "array_compact",
        }
    }

    /// Functions whose result depends on the order of the input rows.
    pub const fn is_order_sensitive(self) -> bool {
        matches!(
            self,
            Self::ArrayJoin | Self::Concatenate | Self::ArrayUnique | Self::ArrayCompact
        )
    }

    /// Counting and summing functions report 0 over an empty set.
    pub const fn zero_when_empty(self) -> bool {
        matches!(self, Self::Sum | Self::Count | Self::CountA | Self::CountAll)
    }
}

/// Parses `fn({values})` into its rollup function.
pub fn parse_rollup_expression(expression: &str) -> Option<RollupFunction> {
    let trimmed = expression.trim();
    let open = trimmed.find('(')?;
    let name = trimmed[..open].trim();
    let args = trimmed[open + 1..].strip_suffix(')')?;
    if args.trim() != "{values}" {
        return None;
    }
    RollupFunction::from_name(name)
}

#[cfg(test)]
mod tests {
    use super::{parse_rollup_expression, RollupFunction};

    #[test]
    fn parses_known_templates() {
        assert_eq!(parse_rollup_expression("sum({values})"), Some(RollupFunction::Sum));
        assert_eq!(
            parse_rollup_expression("  array_join( {values} ) "),
            Some(RollupFunction::ArrayJoin)
        );
        assert_eq!(
            parse_rollup_expression("COUNTALL({values})"),
            Some(RollupFunction::CountAll)
        );
    }

    #[test]
    fn rejects_malformed_templates() {
        assert_eq!(parse_rollup_expression("sum(values)"), None);
        assert_eq!(parse_rollup_expression("median({values})"), None);
        assert_eq!(parse_rollup_expression("sum({values}"), None);
        assert_eq!(parse_rollup_expression("{values}"), None);
    }
}
