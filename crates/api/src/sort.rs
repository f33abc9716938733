use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// A field to sort search results by.
///
/// In a `POST` body this serializes as `{"field": ..., "direction": ...}`. In a
/// `GET` query string it is written as `+field` or `-field`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sortby {
    /// The field to sort on, e.g. `properties.eo:cloud_cover`.
    pub field: String,

    /// The direction of the sort.
    pub direction: Direction,
}

/// The direction of a [Sortby].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,

    /// Descending.
    Desc,
}

impl Sortby {
    /// Creates a new ascending sortby.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Sortby;
    /// let sortby = Sortby::asc("id");
    /// assert_eq!(sortby.to_string(), "+id");
    /// ```
    pub fn asc(field: impl ToString) -> Sortby {
        Sortby {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    /// Creates a new descending sortby.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Sortby;
    /// let sortby = Sortby::desc("datetime");
    /// assert_eq!(sortby.to_string(), "-datetime");
    /// ```
    pub fn desc(field: impl ToString) -> Sortby {
        Sortby {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }

    /// Parses a comma-delimited list of sortbys.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Sortby;
    /// let sortby = Sortby::parse_list("+id,-datetime").unwrap();
    /// assert_eq!(sortby, vec![Sortby::asc("id"), Sortby::desc("datetime")]);
    /// ```
    pub fn parse_list(s: &str) -> Result<Vec<Sortby>, Error> {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Sortby {
    type Err = Error;

    fn from_str(s: &str) -> Result<Sortby, Error> {
        let (direction, field) = if let Some(field) = s.strip_prefix('-') {
            (Direction::Desc, field)
        } else if let Some(field) = s.strip_prefix('+') {
            (Direction::Asc, field)
        } else {
            (Direction::Asc, s)
        };
        if field.is_empty() {
            Err(Error::InvalidSortby(s.to_string()))
        } else {
            Ok(Sortby {
                field: field.to_string(),
                direction,
            })
        }
    }
}

impl Display for Sortby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "+{}", self.field),
            Direction::Desc => write!(f, "-{}", self.field),
        }
    }
}
