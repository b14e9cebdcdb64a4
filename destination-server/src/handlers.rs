//! Destination endpoints
//!
//! - `GET /api/v1/destinations` - every location
//! - `GET /api/v1/destinations/{country}` - locations of one country
//! - `GET /api/v1/destinations/{country}/{city}` - one destination

use axum::extract::{Path, State};
use axum::Json;
use destination_db::{Database, DbError, Scope, Statement};

use crate::error::ApiError;
use crate::extractors::RequestScope;
use crate::models::{Destination, Location};
use crate::queries::{DESTINATION_BY_CITY, LIST_LOCATIONS, LIST_LOCATIONS_BY_COUNTRY};
use crate::router::{PathRouter, RouteError};
use crate::state::AppState;

/// Lowercase tokens kept as-is inside place names ("Rio de Janeiro").
const LOWERCASE_TOKENS: [&str; 3] = ["es", "de", "au"];

/// Register the destination routes under `root`.
pub fn routes(root: &mut PathRouter<'_, AppState>) -> Result<(), RouteError> {
    root.path("/api/v1/destinations", |r| {
        r.get(list_destinations)?;
        r.path("{country:string}", |r| {
            r.get(list_destinations_by_country)?;
            r.path("{city:string}", |r| {
                r.get(get_destination)?;
                Ok(())
            })?;
            Ok(())
        })?;
        Ok(())
    })?;
    Ok(())
}

/// GET /api/v1/destinations
async fn list_destinations(
    State(state): State<AppState>,
    RequestScope(scope): RequestScope,
) -> Result<Json<Vec<Location>>, ApiError> {
    let locations = query_locations(state.db(), &scope, Statement::new(LIST_LOCATIONS)).await?;
    Ok(Json(locations))
}

/// GET /api/v1/destinations/{country}
async fn list_destinations_by_country(
    State(state): State<AppState>,
    RequestScope(scope): RequestScope,
    Path(country): Path<String>,
) -> Result<Json<Vec<Location>>, ApiError> {
    let stmt = Statement::new(LIST_LOCATIONS_BY_COUNTRY).bind(normalize_name(&country));
    let locations = query_locations(state.db(), &scope, stmt).await?;
    Ok(Json(locations))
}

/// GET /api/v1/destinations/{country}/{city}
async fn get_destination(
    State(state): State<AppState>,
    RequestScope(scope): RequestScope,
    Path((country, city)): Path<(String, String)>,
) -> Result<Json<Destination>, ApiError> {
    let (country, city) = (normalize_name(&country), normalize_name(&city));
    let stmt = Statement::new(DESTINATION_BY_CITY)
        .bind(country.as_str())
        .bind(city.as_str());

    let destination = state
        .db()
        .query_row(&scope, stmt)
        .scan(Destination::from_row)
        .await
        .map_err(|e| match e {
            DbError::NotFound => ApiError::NotFound {
                resource: "destination",
                id: format!("{country}/{city}"),
            },
            other => other.into(),
        })?;

    Ok(Json(destination))
}

async fn query_locations(
    db: &Database,
    scope: &Scope,
    stmt: Statement,
) -> Result<Vec<Location>, DbError> {
    let mut locations = Vec::new();
    db.query_each(scope, stmt, |row| {
        locations.push(Location::from_row(row)?);
        Ok(())
    })
    .await?;
    Ok(locations)
}

/// Turn a path input into the stored place name.
///
/// Words are split on `-` and spaces and title-cased, except the tokens in
/// [`LOWERCASE_TOKENS`]. Names containing `au` keep their hyphens:
/// `new-york` becomes `New York`, `port-au-prince` becomes `Port-au-Prince`.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let tokens: Vec<&str> = lower
        .split(['-', ' '])
        .filter(|token| !token.is_empty())
        .collect();

    let joiner = if tokens.contains(&"au") { "-" } else { " " };
    tokens
        .iter()
        .map(|token| {
            if LOWERCASE_TOKENS.contains(token) {
                token.to_string()
            } else {
                title_case(token)
            }
        })
        .collect::<Vec<_>>()
        .join(joiner)
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_names() {
        assert_eq!(normalize_name("france"), "France");
        assert_eq!(normalize_name("PARIS"), "Paris");
    }

    #[test]
    fn hyphenated_names_become_spaced() {
        assert_eq!(normalize_name("new-york"), "New York");
        assert_eq!(normalize_name("united-states"), "United States");
        assert_eq!(normalize_name("New York"), "New York");
    }

    #[test]
    fn particles_stay_lowercase() {
        assert_eq!(normalize_name("rio-de-janeiro"), "Rio de Janeiro");
        assert_eq!(normalize_name("port-au-prince"), "Port-au-Prince");
    }

    #[test]
    fn unicode_names() {
        assert_eq!(normalize_name("zürich"), "Zürich");
        assert_eq!(normalize_name("ÎLE-DE-FRANCE"), "Île de France");
    }
}
