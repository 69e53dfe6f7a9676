//! Column kinds and the type-tag registry
//!
//! A schema column declares its variant with a type tag such as `string`,
//! `enum` or `foreign.tags`. The registry below maps the tag's kind to a
//! builder that validates the column's feature bag and produces a
//! [`ColumnKind`]. The kind then constructs cells for that column.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::id::IdStrategy;
use super::{money, time, Cell, EntryType, EnumValue, ForeignKey, ForeignList};
use crate::storage::Primitive;

/// Per-column configuration carried in the schema
pub type Features = BTreeMap<String, Primitive>;

/// Separator between enum values in the `values` feature
pub const ENUM_SEPARATOR: &str = ", ";

/// A type tag split into `{kind, argument}`: `foreign.tags` -> (`foreign`, `tags`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTag {
    pub kind: String,
    pub argument: Option<String>,
}

impl TypeTag {
    pub fn parse(tag: &str) -> Self {
        match tag.split_once('.') {
            Some((kind, argument)) => TypeTag {
                kind: kind.to_string(),
                argument: Some(argument.to_string()),
            },
            None => TypeTag {
                kind: tag.to_string(),
                argument: None,
            },
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == "dynamic"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Integer,
    Date,
    Time,
    MoneyAmount,
    Id(IdStrategy),
    Enum { values: Arc<[String]> },
    Foreign { table: Arc<str> },
    Foreigns { table: Arc<str> },
}

type Builder = fn(Option<&str>, &mut Features) -> Result<ColumnKind, String>;

const REGISTRY: &[(&str, Builder)] = &[
    ("string", build_string),
    ("int", build_integer),
    ("date", build_date),
    ("time", build_time),
    ("moneyamt", build_money),
    ("id", build_id),
    ("enum", build_enum),
    ("foreign", build_foreign),
    ("foreigns", build_foreigns),
];

fn no_argument(argument: Option<&str>, kind: ColumnKind) -> Result<ColumnKind, String> {
    match argument {
        None => Ok(kind),
        Some(arg) => Err(format!("unexpected type argument '{arg}'")),
    }
}

fn build_string(argument: Option<&str>, _: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::String)
}

fn build_integer(argument: Option<&str>, _: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::Integer)
}

fn build_date(argument: Option<&str>, _: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::Date)
}

fn build_time(argument: Option<&str>, _: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::Time)
}

fn build_money(argument: Option<&str>, _: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::MoneyAmount)
}

fn build_id(argument: Option<&str>, features: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::String)?;
    let strategy = features
        .get("strategy")
        .ok_or("ID schema must have a strategy")?
        .as_str()
        .ok_or("ID strategy must be a string")?;
    match strategy {
        "hex" => {
            let length = features
                .get("length")
                .ok_or("hex strategy must have a length")?
                .as_i64()
                .ok_or("length must be an integer")?;
            if length < 1 {
                return Err(format!("length must be at least 1, got {length}"));
            }
            Ok(ColumnKind::Id(IdStrategy::Hex { length: length as usize }))
        }
        other => Err(format!("unknown strategy: {other}")),
    }
}

fn build_enum(argument: Option<&str>, features: &mut Features) -> Result<ColumnKind, String> {
    no_argument(argument, ColumnKind::String)?;
    let values = features
        .get("values")
        .ok_or("features for enum has no values")?
        .as_str()
        .ok_or("values must be a string")?;
    let values: Vec<String> = values.split(ENUM_SEPARATOR).map(str::to_string).collect();
    Ok(ColumnKind::Enum { values: values.into() })
}

/// The referenced table comes from the tag argument, else from features
fn foreign_table(argument: Option<&str>, features: &mut Features) -> Result<Arc<str>, String> {
    let table = match argument {
        Some(table) => table.to_string(),
        None => features
            .get("table")
            .and_then(Primitive::as_str)
            .ok_or("table not provided for foreign key")?
            .to_string(),
    };
    if table.is_empty() {
        return Err("foreign table name is empty".to_string());
    }
    features.insert("table".to_string(), Primitive::Text(table.clone()));
    Ok(Arc::from(table))
}

fn build_foreign(argument: Option<&str>, features: &mut Features) -> Result<ColumnKind, String> {
    Ok(ColumnKind::Foreign { table: foreign_table(argument, features)? })
}

fn build_foreigns(argument: Option<&str>, features: &mut Features) -> Result<ColumnKind, String> {
    Ok(ColumnKind::Foreigns { table: foreign_table(argument, features)? })
}

impl ColumnKind {
    /// Resolve a type tag through the registry, validating the feature bag
    pub fn from_tag(tag: &TypeTag, features: &mut Features) -> Result<ColumnKind, String> {
        let builder = REGISTRY
            .iter()
            .find(|(kind, _)| *kind == tag.kind)
            .map(|(_, builder)| *builder)
            .ok_or_else(|| format!("invalid type '{}'", tag.kind))?;
        builder(tag.argument.as_deref(), features)
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            ColumnKind::String => EntryType::String,
            ColumnKind::Integer => EntryType::Int,
            ColumnKind::Date => EntryType::Date,
            ColumnKind::Time => EntryType::Time,
            ColumnKind::MoneyAmount => EntryType::MoneyAmount,
            ColumnKind::Id(_) => EntryType::Id,
            ColumnKind::Enum { .. } => EntryType::Enum,
            ColumnKind::Foreign { .. } => EntryType::Foreign,
            ColumnKind::Foreigns { .. } => EntryType::Foreigns,
        }
    }

    pub fn foreign_table(&self) -> Option<&str> {
        match self {
            ColumnKind::Foreign { table } | ColumnKind::Foreigns { table } => Some(&**table),
            _ => None,
        }
    }

    pub fn values(&self) -> &[String] {
        match self {
            ColumnKind::Enum { values } => &values[..],
            _ => &[],
        }
    }

    /// The variant's null form. ID columns generate a fresh identifier.
    pub fn null_cell(&self) -> Cell {
        match self {
            ColumnKind::String => Cell::String(String::new()),
            ColumnKind::Integer => Cell::Integer(0),
            ColumnKind::Date => Cell::Date(0),
            ColumnKind::Time => Cell::Time(0),
            ColumnKind::MoneyAmount => Cell::MoneyAmount(0),
            ColumnKind::Id(strategy) => Cell::Id(strategy.generate()),
            ColumnKind::Enum { values } => Cell::Enum(EnumValue::new(Arc::clone(values), 0)),
            ColumnKind::Foreign { table } => Cell::ForeignKey(ForeignKey {
                table: Arc::clone(table),
                key: String::new(),
            }),
            ColumnKind::Foreigns { table } => Cell::ForeignList(ForeignList {
                table: Arc::clone(table),
                keys: Vec::new(),
            }),
        }
    }

    /// Build a cell from an encoded value; null means the null form
    pub fn decode(&self, value: &Primitive) -> Result<Cell, String> {
        if value.is_null() {
            return Ok(self.null_cell());
        }
        let mismatch = || format!("expected {} value, found {}", self.expected(), value.kind());
        match self {
            ColumnKind::String => value.as_str().map(|s| Cell::String(s.to_string())).ok_or_else(mismatch),
            ColumnKind::Id(_) => value.as_str().map(|s| Cell::Id(s.to_string())).ok_or_else(mismatch),
            ColumnKind::Integer => value.as_i64().map(Cell::Integer).ok_or_else(mismatch),
            ColumnKind::Date => value.as_i64().map(Cell::Date).ok_or_else(mismatch),
            ColumnKind::Time => value.as_i64().map(Cell::Time).ok_or_else(mismatch),
            ColumnKind::MoneyAmount => value.as_i64().map(Cell::MoneyAmount).ok_or_else(mismatch),
            ColumnKind::Enum { .. } => {
                let s = value.as_str().ok_or_else(mismatch)?;
                self.enum_cell(s)
            }
            ColumnKind::Foreign { table } => value
                .as_str()
                .map(|key| {
                    Cell::ForeignKey(ForeignKey {
                        table: Arc::clone(table),
                        key: key.to_string(),
                    })
                })
                .ok_or_else(mismatch),
            ColumnKind::Foreigns { table } => match value {
                Primitive::List(keys) => Ok(Cell::ForeignList(ForeignList {
                    table: Arc::clone(table),
                    keys: keys.clone(),
                })),
                _ => Err(mismatch()),
            },
        }
    }

    /// Build a cell from user-entered text, the inverse of `Cell::format(hint)`
    pub fn reverse(&self, hint: &str, input: &str) -> Result<Cell, String> {
        match self {
            ColumnKind::String => Ok(Cell::String(input.to_string())),
            ColumnKind::Id(_) => Ok(Cell::Id(input.to_string())),
            ColumnKind::Integer => input
                .trim()
                .parse()
                .map(Cell::Integer)
                .map_err(|e| format!("cannot parse integer '{input}': {e}")),
            ColumnKind::Date => time::parse_date(hint, input).map(Cell::Date),
            ColumnKind::Time => time::parse_time(hint, input).map(Cell::Time),
            ColumnKind::MoneyAmount => money::parse_cents(input).map(Cell::MoneyAmount),
            ColumnKind::Enum { .. } => self.enum_cell(input),
            ColumnKind::Foreign { table } => Ok(Cell::ForeignKey(ForeignKey {
                table: Arc::clone(table),
                key: input.to_string(),
            })),
            ColumnKind::Foreigns { table } => Ok(Cell::ForeignList(ForeignList {
                table: Arc::clone(table),
                keys: input
                    .split(|c| c == '\n' || c == ',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect(),
            })),
        }
    }

    fn enum_cell(&self, input: &str) -> Result<Cell, String> {
        let ColumnKind::Enum { values } = self else {
            return Err(format!("not an enum column: {:?}", self.entry_type()));
        };
        values
            .iter()
            .position(|v| v == input)
            .map(|index| Cell::Enum(EnumValue::new(Arc::clone(values), index)))
            .ok_or_else(|| format!("'{input}' is not one of: {}", values.join(ENUM_SEPARATOR)))
    }

    fn expected(&self) -> &'static str {
        match self {
            ColumnKind::String | ColumnKind::Id(_) | ColumnKind::Enum { .. } | ColumnKind::Foreign { .. } => "string",
            ColumnKind::Integer | ColumnKind::Date | ColumnKind::Time | ColumnKind::MoneyAmount => "integer",
            ColumnKind::Foreigns { .. } => "list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, Primitive)]) -> Features {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_type_tag_parse() {
        assert_eq!(TypeTag::parse("string"), TypeTag { kind: "string".into(), argument: None });
        let tag = TypeTag::parse("foreign.tags");
        assert_eq!(tag.kind, "foreign");
        assert_eq!(tag.argument.as_deref(), Some("tags"));
        assert!(TypeTag::parse("dynamic.count").is_dynamic());
    }

    #[test]
    fn test_registry_rejects_unknown() {
        let err = ColumnKind::from_tag(&TypeTag::parse("blob"), &mut Features::new()).unwrap_err();
        assert!(err.contains("blob"));
    }

    #[test]
    fn test_foreign_records_table_in_features() {
        let mut f = Features::new();
        let kind = ColumnKind::from_tag(&TypeTag::parse("foreign.tags"), &mut f).unwrap();
        assert_eq!(kind.foreign_table(), Some("tags"));
        assert_eq!(f.get("table"), Some(&Primitive::from("tags")));
    }

    #[test]
    fn test_enum_requires_values() {
        let tag = TypeTag::parse("enum");
        assert!(ColumnKind::from_tag(&tag, &mut Features::new()).is_err());
        let mut f = features(&[("values", Primitive::from(3))]);
        assert!(ColumnKind::from_tag(&tag, &mut f).is_err());

        let mut f = features(&[("values", Primitive::from("a, b, c"))]);
        let kind = ColumnKind::from_tag(&tag, &mut f).unwrap();
        assert_eq!(kind.values(), ["a", "b", "c"]);
        assert_eq!(kind.null_cell().format(""), "a");
        assert_eq!(kind.decode(&Primitive::from("b")).unwrap().format(""), "b");
        assert!(kind.decode(&Primitive::from("z")).is_err());
    }

    #[test]
    fn test_id_generates_on_null() {
        let tag = TypeTag::parse("id");
        assert!(ColumnKind::from_tag(&tag, &mut Features::new()).is_err());
        let mut bad = features(&[("strategy", Primitive::from("uuid"))]);
        assert!(ColumnKind::from_tag(&tag, &mut bad).is_err());

        let mut f = features(&[("strategy", Primitive::from("hex")), ("length", Primitive::from(8))]);
        let kind = ColumnKind::from_tag(&tag, &mut f).unwrap();
        let fresh = kind.decode(&Primitive::Null).unwrap();
        assert_eq!(fresh.format("").len(), 8);
        assert_eq!(kind.decode(&Primitive::from("cafe")).unwrap().format(""), "cafe");
    }

    #[test]
    fn test_decode_type_mismatch() {
        assert!(ColumnKind::Date.decode(&Primitive::from("01 Jan 1970")).is_err());
        assert!(ColumnKind::String.decode(&Primitive::from(1)).is_err());
        assert_eq!(ColumnKind::Date.decode(&Primitive::Null).unwrap(), Cell::Date(0));
    }

    #[test]
    fn test_decode_accepts_integral_floats_only() {
        assert_eq!(ColumnKind::Integer.decode(&Primitive::Float(3.0)).unwrap(), Cell::Integer(3));
        assert_eq!(ColumnKind::MoneyAmount.decode(&Primitive::Float(150.0)).unwrap(), Cell::MoneyAmount(150));
        let err = ColumnKind::Integer.decode(&Primitive::Float(3.5)).unwrap_err();
        assert!(err.contains("float"), "{err}");

        let tags = ColumnKind::Foreigns { table: Arc::from("tags") };
        let err = tags
            .decode(&Primitive::Array(vec![Primitive::from("a"), Primitive::from(1)]))
            .unwrap_err();
        assert!(err.contains("array"), "{err}");
    }

    #[test]
    fn test_reverse_matches_format() {
        let kinds = [
            (ColumnKind::Integer, Primitive::from(-42)),
            (ColumnKind::Date, Primitive::from(19_000)),
            (ColumnKind::Time, Primitive::from(1_700_000_000)),
            (ColumnKind::MoneyAmount, Primitive::from(-1999)),
            (ColumnKind::String, Primitive::from("hello")),
        ];
        for (kind, encoded) in kinds {
            let cell = kind.decode(&encoded).unwrap();
            assert_eq!(kind.reverse("", &cell.format("")).unwrap(), cell);
        }
    }

    #[test]
    fn test_foreign_list_reverse_accepts_list_format() {
        let kind = ColumnKind::Foreigns { table: Arc::from("tags") };
        let cell = kind.decode(&Primitive::List(vec!["t1".into(), "t2".into()])).unwrap();
        assert_eq!(kind.reverse("", &cell.format(super::super::LIST_FORMAT)).unwrap(), cell);
        assert_eq!(kind.reverse("", "t1, t2").unwrap(), cell);
    }
}
