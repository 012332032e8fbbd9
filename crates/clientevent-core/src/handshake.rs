//! Handshake query parameters.
//!
//! The transport reports the query string of the upgrade request as an
//! ordered list of name/value pairs ([`QueryParams`]). Application code sees
//! the folded form ([`HandshakeParams`]): a name that appeared once maps to a
//! single string, a name that repeated maps to every value in order.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Raw handshake query parameters, in the order the client sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parse a URL query string (without the leading `?`).
    ///
    /// Names and values are percent-decoded and `+` becomes a space.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self { pairs }
    }

    /// Build from already-decoded pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// All pairs in arrival order.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Every value reported for `name`, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fold into [`HandshakeParams`].
    ///
    /// Names keep the order of their first appearance. Values for one name
    /// keep arrival order.
    #[must_use]
    pub fn fold(&self) -> HandshakeParams {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in &self.pairs {
            match grouped.iter_mut().find(|(n, _)| n == name) {
                Some((_, values)) => values.push(value.clone()),
                None => grouped.push((name.clone(), vec![value.clone()])),
            }
        }

        let params = grouped
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    ParamValue::Single(values.remove(0))
                } else {
                    ParamValue::Multiple(values)
                };
                (name, value)
            })
            .collect();

        HandshakeParams { params }
    }
}

/// Value of one handshake parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// The parameter appeared exactly once.
    Single(String),
    /// The parameter appeared more than once; values in arrival order.
    Multiple(Vec<String>),
}

impl ParamValue {
    /// The value if the parameter appeared exactly once.
    #[must_use]
    pub fn as_single(&self) -> Option<&str> {
        match self {
            ParamValue::Single(v) => Some(v),
            ParamValue::Multiple(_) => None,
        }
    }

    /// The values if the parameter repeated.
    #[must_use]
    pub fn as_multiple(&self) -> Option<&[String]> {
        match self {
            ParamValue::Single(_) => None,
            ParamValue::Multiple(vs) => Some(vs),
        }
    }

    /// Every value, whichever shape the parameter has.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            ParamValue::Single(v) => vec![v.as_str()],
            ParamValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Single(v) => serializer.serialize_str(v),
            ParamValue::Multiple(vs) => vs.serialize(serializer),
        }
    }
}

/// Folded handshake parameters passed to the connect callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeParams {
    params: Vec<(String, ParamValue)>,
}

impl HandshakeParams {
    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Check if a parameter is present.
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over parameters in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of distinct parameter names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Serialize for HandshakeParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, value) in &self.params {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
