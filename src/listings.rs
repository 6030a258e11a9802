//! Rental listings preset: schema, spaces and the named queries served by
//! the REST layer.

use chrono::{DateTime, Duration, Utc};
use staysearch_core::{
    AttributeKind, CategorySpace, Comparator, IndexConfig, NumberMode, NumberScale, NumberSpace,
    RecencySpace, Schema, Space, TextSpace,
};
use staysearch_query::QueryTemplate;

pub const SCHEMA_NAME: &str = "listing";
pub const INDEX_NAME: &str = "airbnb_index";

pub const ROOM_TYPES: [&str; 4] = ["Private room", "Entire home/apt", "Shared room", "Hotel room"];

pub const DESCRIPTION_SPACE: &str = "description";
pub const AMENITIES_SPACE: &str = "amenities";
pub const ROOM_TYPE_SPACE: &str = "room_type";
pub const RATING_SPACE: &str = "review_rating";
pub const PRICE_SPACE: &str = "price";
pub const RECENCY_SPACE: &str = "recency";

pub const PRICE_MAX: f64 = 500_000.0;
pub const RECENCY_HALF_LIFE_DAYS: i64 = 365;

pub fn schema() -> Schema {
    Schema::new(SCHEMA_NAME)
        .with_field("name", AttributeKind::Text)
        .with_field("description", AttributeKind::Text)
        .with_field("amenities", AttributeKind::Text)
        .with_field("bathrooms_text", AttributeKind::Text)
        .with_field("listing_url", AttributeKind::Text)
        .with_field("room_type", AttributeKind::Category)
        .with_field("price", AttributeKind::Number)
        .with_field("review_scores_rating", AttributeKind::Number)
        .with_field("bedrooms", AttributeKind::Number)
        .with_field("beds", AttributeKind::Number)
        .with_field("bathrooms", AttributeKind::Number)
        .with_field("host_is_superhost", AttributeKind::Number)
        .with_field("number_of_reviews", AttributeKind::Number)
        .with_field("last_scraped", AttributeKind::Timestamp)
}

/// Spaces in index order. Both text spaces share one model identity.
pub fn spaces(text_model: &str, text_dim: usize) -> Vec<Space> {
    vec![
        Space::Category(CategorySpace::new(
            ROOM_TYPE_SPACE,
            "room_type",
            ROOM_TYPES.iter().map(|s| s.to_string()).collect(),
        )),
        Space::Text(TextSpace::new(DESCRIPTION_SPACE, "description", text_model, text_dim)),
        Space::Number(NumberSpace::new(
            RATING_SPACE,
            "review_scores_rating",
            0.0,
            5.0,
            NumberMode::Maximum,
        )),
        Space::Number(
            NumberSpace::new(PRICE_SPACE, "price", 0.0, PRICE_MAX, NumberMode::Minimum)
                .with_scale(NumberScale::Logarithmic),
        ),
        Space::Recency(RecencySpace::new(
            RECENCY_SPACE,
            "last_scraped",
            Duration::days(RECENCY_HALF_LIFE_DAYS),
        )),
        Space::Text(TextSpace::new(AMENITIES_SPACE, "amenities", text_model, text_dim)),
    ]
}

pub fn index_config(text_model: &str, text_dim: usize, now: DateTime<Utc>) -> IndexConfig {
    IndexConfig::new(INDEX_NAME, schema(), spaces(text_model, text_dim), now)
}

/// Weights, room type filter and natural-language input
pub fn base_query() -> QueryTemplate {
    QueryTemplate::new("base_query")
        .weight(DESCRIPTION_SPACE, "description_weight")
        .weight(RATING_SPACE, "review_rating_maximizer_weight")
        .weight(PRICE_SPACE, "price_minimizer_weight")
        .weight(AMENITIES_SPACE, "amenities_weight")
        .natural_query("natural_query")
        .filter("room_type", Comparator::Eq, "filter_by_type")
        .with_options(ROOM_TYPES)
        .describe("filter_by_type", "The kind of room the user wants.")
        .limit(5)
}

fn with_similarity_and_thresholds(base: QueryTemplate) -> QueryTemplate {
    base.similar(
        DESCRIPTION_SPACE,
        "query_description",
        Some("description_similar_clause_weight"),
    )
    .similar(
        AMENITIES_SPACE,
        "query_amenities",
        Some("amenities_similar_clause_weight"),
    )
    .filter("review_scores_rating", Comparator::Ge, "review_rating_bigger_than")
    .filter("price", Comparator::Le, "price_smaller_than")
    .describe(
        "query_description",
        "The text in the user's query that is used to search in the listings' descriptions. \
         Extract info that does not apply to other spaces or params.",
    )
    .describe(
        "query_amenities",
        "The text in the user's query that is used to search in the listings' amenities. \
         Extract info that does not apply to other spaces or params.",
    )
    .describe(
        "review_rating_bigger_than",
        "Used to find listings with a review rating bigger than the provided number.",
    )
    .describe(
        "price_smaller_than",
        "Used to find listings with a price smaller than the provided number.",
    )
}

/// Base query plus description/amenities similarity and rating/price thresholds
pub fn filter_query() -> QueryTemplate {
    with_similarity_and_thresholds(base_query().derive("filter_query"))
}

pub fn semantic_search_query() -> QueryTemplate {
    with_similarity_and_thresholds(base_query().derive("semantic_search_query"))
}

pub fn templates() -> Vec<QueryTemplate> {
    vec![base_query(), filter_query(), semantic_search_query()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_config_is_valid() {
        let config = index_config("m", 16, Utc::now());
        config.validate().unwrap();
        let dim: usize = config.spaces.iter().map(Space::dimension).sum();
        assert_eq!(dim, 4 + 16 + 2 + 2 + 2 + 16);
    }

    #[test]
    fn test_templates_declare_expected_params() {
        let filter = filter_query();
        for param in [
            "natural_query",
            "description_weight",
            "review_rating_maximizer_weight",
            "price_minimizer_weight",
            "amenities_weight",
            "filter_by_type",
            "query_description",
            "description_similar_clause_weight",
            "query_amenities",
            "amenities_similar_clause_weight",
            "review_rating_bigger_than",
            "price_smaller_than",
            "limit",
        ] {
            assert!(filter.declares(param), "missing {}", param);
        }
        assert!(!base_query().declares("price_smaller_than"));
        assert_eq!(filter.filters.len(), 3);
        assert_eq!(filter.limit, 5);
    }
}
