//! Tag key/value pairs attached to spans, logs and sampling decisions.
use std::fmt;

/// The value of a `Tag`.
///
/// Every tag value is one of these five kinds;
/// anything else a caller passes in is converted deterministically to one
/// of them (objects and byte values become their textual representation).
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum TagValue {
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Integer(i64),
    /// An unsigned 64-bit integer.
    UInteger(u64),
    /// A 64-bit float.
    Float(f64),
    /// A boolean.
    Boolean(bool),
}
impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TagValue::String(ref v) => write!(f, "{}", v),
            TagValue::Integer(v) => write!(f, "{}", v),
            TagValue::UInteger(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}
impl From<String> for TagValue {
    fn from(f: String) -> Self {
        TagValue::String(f)
    }
}
impl<'a> From<&'a str> for TagValue {
    fn from(f: &'a str) -> Self {
        TagValue::String(f.to_owned())
    }
}
impl From<i64> for TagValue {
    fn from(f: i64) -> Self {
        TagValue::Integer(f)
    }
}
impl From<u64> for TagValue {
    fn from(f: u64) -> Self {
        TagValue::UInteger(f)
    }
}
impl From<f64> for TagValue {
    fn from(f: f64) -> Self {
        TagValue::Float(f)
    }
}
impl From<bool> for TagValue {
    fn from(f: bool) -> Self {
        TagValue::Boolean(f)
    }
}

/// A tag (a named `TagValue`) attached to a span, a log entry, or a
/// `SamplingStatus`.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct Tag {
    name: String,
    value: TagValue,
}
impl Tag {
    /// Makes a new `Tag`.
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<TagValue>,
    {
        Tag {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the name of this tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this tag.
    pub fn value(&self) -> &TagValue {
        &self.value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_value_conversions() {
        assert_eq!(Tag::new("k", "v").value(), &TagValue::String("v".into()));
        assert_eq!(Tag::new("k", 1i64).value(), &TagValue::Integer(1));
        assert_eq!(Tag::new("k", 1u64).value(), &TagValue::UInteger(1));
        assert_eq!(Tag::new("k", 1.5f64).value(), &TagValue::Float(1.5));
        assert_eq!(Tag::new("k", true).value(), &TagValue::Boolean(true));
    }
}
