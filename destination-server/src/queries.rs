//! SQL for the `destination` table

/// Every `(country, city)` pair.
pub const LIST_LOCATIONS: &str = "SELECT country, city FROM destination ORDER BY country, city";

/// `(country, city)` pairs of one country. `$1`: country.
pub const LIST_LOCATIONS_BY_COUNTRY: &str =
    "SELECT country, city FROM destination WHERE country = $1 ORDER BY city";

/// Full record of one destination. `$1`: country, `$2`: city.
pub const DESTINATION_BY_CITY: &str = "SELECT id, city, country, latitude, longitude, \
     population, description, images FROM destination WHERE country = $1 AND city = $2";
