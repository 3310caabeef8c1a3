pub mod catalog;
pub mod lists;
pub mod recommendations;

pub use catalog::{CatalogClient, TmdbCatalog};
pub use lists::ListService;
pub use recommendations::RecommendationService;
