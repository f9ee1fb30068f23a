use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::BatchError;

use super::item::RawRecord;

/// Transforms a raw field value before it reaches the column mapper.
pub trait FieldConverter: Send + Sync {
    fn convert(&self, value: &str) -> Result<String, BatchError>;
}

/// Removes surrounding whitespace.
#[derive(Default)]
pub struct TrimConverter;

impl FieldConverter for TrimConverter {
    fn convert(&self, value: &str) -> Result<String, BatchError> {
        Ok(value.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Lower,
    Upper,
}

pub struct CaseConverter {
    case: Case,
}

impl CaseConverter {
    pub fn new(case: Case) -> Self {
        Self { case }
    }
}

impl FieldConverter for CaseConverter {
    fn convert(&self, value: &str) -> Result<String, BatchError> {
        Ok(match self.case {
            Case::Lower => value.to_lowercase(),
            Case::Upper => value.to_uppercase(),
        })
    }
}

/// Re-formats a date (or date-time) from an input pattern to an output
/// pattern, both in `chrono` strftime syntax. Empty values pass through.
pub struct DateConverter {
    input: String,
    output: String,
}

impl DateConverter {
    pub fn new<S: Into<String>>(input: S, output: S) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl FieldConverter for DateConverter {
    fn convert(&self, value: &str) -> Result<String, BatchError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(String::new());
        }

        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, &self.input) {
            return Ok(datetime.format(&self.output).to_string());
        }

        NaiveDate::parse_from_str(value, &self.input)
            .map(|date| date.format(&self.output).to_string())
            .map_err(|err| {
                BatchError::Record(format!(
                    "invalid date \"{}\" for format \"{}\": {}",
                    value, self.input, err
                ))
            })
    }
}

/// Converters registered per column position.
#[derive(Default)]
pub struct Converters {
    by_position: BTreeMap<usize, Box<dyn FieldConverter>>,
}

impl Converters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, position: usize, converter: Box<dyn FieldConverter>) {
        self.by_position.insert(position, converter);
    }

    /// Builds a converter from its configuration string:
    /// `trim`, `lower`, `upper`, `date:<input>` or `date:<input>|<output>`.
    ///
    /// The default date output is ISO 8601 (`%Y-%m-%d`).
    pub fn parse(spec: &str) -> Result<Box<dyn FieldConverter>, BatchError> {
        let (name, args) = match spec.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (spec, None),
        };

        match (name, args) {
            ("trim", None) => Ok(Box::new(TrimConverter)),
            ("lower", None) => Ok(Box::new(CaseConverter::new(Case::Lower))),
            ("upper", None) => Ok(Box::new(CaseConverter::new(Case::Upper))),
            ("date", Some(args)) => {
                let (input, output) = args.split_once('|').unwrap_or((args, "%Y-%m-%d"));
                if input.is_empty() {
                    return Err(BatchError::Configuration(format!(
                        "converter \"{}\" has no input format",
                        spec
                    )));
                }
                Ok(Box::new(DateConverter::new(input, output)))
            }
            _ => Err(BatchError::Configuration(format!(
                "unknown converter \"{}\"",
                spec
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    /// Converts the registered positions of a row in place.
    pub fn apply(&self, record: &mut RawRecord) -> Result<(), BatchError> {
        for (position, converter) in &self.by_position {
            if let Some(value) = record.get_mut(*position) {
                *value = converter.convert(value)?;
            }
        }
        Ok(())
    }
}
