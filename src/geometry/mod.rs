//! Geometry capability used by the store: repair, predicates and decoding.

mod engine;
mod parse;

pub use engine::{GeoEngine, GeometryEngine};
pub use parse::{geojson_to_multipolygon, parse_geojson, parse_wkt, to_multipolygon};
