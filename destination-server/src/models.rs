//! Response models

use destination_db::{DbError, Row};
use serde::{Deserialize, Serialize};

/// A `(country, city)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
}

impl Location {
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            country: row.get("country")?,
            city: row.get("city")?,
        })
    }
}

/// Full destination record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub population: i64,
    pub description: String,
    pub images: Vec<String>,
}

impl Destination {
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        // ids are text in the seed data, serial in older schemas
        let id = row
            .get::<String, _>("id")
            .or_else(|_| row.get::<i64, _>("id").map(|id| id.to_string()))?;

        Ok(Self {
            id,
            city: row.get("city")?,
            country: row.get("country")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            population: row.get("population")?,
            description: row.get::<Option<String>, _>("description")?.unwrap_or_default(),
            images: row.get::<Option<Vec<String>>, _>("images")?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use destination_db::Value;

    #[test]
    fn destination_from_row() {
        let row = Row::from_pairs([
            ("id", Value::Int(7)),
            ("city", Value::from("Paris")),
            ("country", Value::from("France")),
            ("latitude", Value::Float(48.8566)),
            ("longitude", Value::Float(2.3522)),
            ("population", Value::Int(2_165_423)),
            ("description", Value::Null),
            ("images", Value::from(vec!["eiffel.jpg".to_string()])),
        ]);

        let destination = Destination::from_row(&row).unwrap();
        assert_eq!(destination.id, "7");
        assert_eq!(destination.city, "Paris");
        assert_eq!(destination.description, "");
        assert_eq!(destination.images, ["eiffel.jpg"]);
    }

    #[test]
    fn missing_column_is_decode_error() {
        let row = Row::from_pairs([("country", Value::from("France"))]);
        let err = Location::from_row(&row).unwrap_err();
        assert!(matches!(err, DbError::Decode { ref column, .. } if column == "city"));
    }
}
