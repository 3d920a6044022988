//! Helper functions to [`toml_span`].

use std::borrow::Cow;

use toml_span::{DeserError, Span, value::ValueInner};

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<T>(toml_str: &str) -> Result<T, DeserError>
where
    T: toml_span::Deserialize<'static>,
{
    let mut value = toml_span::de::parse(toml_str)?.into_static_value();
    T::deserialize(&mut value)
}

/// Convert a `toml_span::Value<'_>` to a `toml_span::Value<'static>`.
pub trait IntoStaticValue {
    /// Our output type.
    type Output;

    /// Convert to a static value.
    fn into_static_value(self) -> Self::Output;
}

impl IntoStaticValue for toml_span::Value<'_> {
    type Output = toml_span::Value<'static>;

    fn into_static_value(mut self) -> Self::Output {
        let inner = self.take().into_static_value();
        toml_span::Value::with_span(inner, self.span)
    }
}

impl IntoStaticValue for ValueInner<'_> {
    type Output = ValueInner<'static>;

    fn into_static_value(self) -> Self::Output {
        match self {
            ValueInner::String(cow) => ValueInner::String(cow.into_owned().into()),
            ValueInner::Integer(i) => ValueInner::Integer(i),
            ValueInner::Float(f) => ValueInner::Float(f),
            ValueInner::Boolean(b) => ValueInner::Boolean(b),
            ValueInner::Array(values) => {
                let values = values
                    .into_iter()
                    .map(IntoStaticValue::into_static_value)
                    .collect();
                ValueInner::Array(values)
            }
            ValueInner::Table(btree_map) => {
                let btree_map = btree_map
                    .into_iter()
                    .map(|(k, v)| (k.into_static_value(), v.into_static_value()))
                    .collect();
                ValueInner::Table(btree_map)
            }
        }
    }
}

impl IntoStaticValue for toml_span::value::Key<'_> {
    type Output = toml_span::value::Key<'static>;

    fn into_static_value(self) -> Self::Output {
        toml_span::value::Key {
            name: self.name.into_owned().into(),
            span: self.span,
        }
    }
}

/// Create a custom [`DeserError`] with a span.
pub fn custom_deser_error(span: Span, msg: impl Into<Cow<'static, str>>) -> DeserError {
    let err_kind = toml_span::ErrorKind::Custom(msg.into());
    let err = toml_span::Error::from((err_kind, span));
    DeserError::from(err)
}

/// A TOML number. Reference ranges are often written as integers (`120`) and
/// sometimes as floats (`3.5`), and we want to accept both.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TomlNumber(pub f64);

impl<'de> toml_span::Deserialize<'de> for TomlNumber {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        match value.take() {
            ValueInner::Integer(i) => Ok(TomlNumber(i as f64)),
            ValueInner::Float(f) if f.is_finite() => Ok(TomlNumber(f)),
            ValueInner::Float(_) => {
                Err(custom_deser_error(value.span, "expected a finite number"))
            }
            _ => Err(custom_deser_error(value.span, "expected a number")),
        }
    }
}

/// Convert a byte offset into a 1-based `(line, column)` pair.
pub fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_column() {
        let source = "a = 1\nbb = 2\n";
        assert_eq!(line_and_column(source, 0), (1, 1));
        assert_eq!(line_and_column(source, 6), (2, 1));
        assert_eq!(line_and_column(source, 9), (2, 4));
        assert_eq!(line_and_column(source, 1000), (3, 1));
    }

    #[test]
    fn test_toml_number_accepts_integers_and_floats() {
        #[derive(Debug)]
        struct Pair {
            a: TomlNumber,
            b: TomlNumber,
        }

        impl<'de> toml_span::Deserialize<'de> for Pair {
            fn deserialize(
                value: &mut toml_span::Value<'de>,
            ) -> Result<Self, DeserError> {
                let mut th = toml_span::de_helpers::TableHelper::new(value)?;
                let a = th.required("a")?;
                let b = th.required("b")?;
                th.finalize(None)?;
                Ok(Pair { a, b })
            }
        }

        let pair: Pair = from_toml_str("a = 120\nb = 3.5\n").unwrap();
        assert_eq!(pair.a, TomlNumber(120.0));
        assert_eq!(pair.b, TomlNumber(3.5));
        assert!(from_toml_str::<Pair>("a = \"x\"\nb = 1\n").is_err());
    }
}
