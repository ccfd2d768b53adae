// property_tests.rs
// Property-based tests for projection, sort, unwind and group averages

use proptest::prelude::*;
use serde_json::{json, Value};
use shelfdb_core::{Collection, IdStrategy, Pipeline};

const CATEGORIES: [&str; 3] = ["Electronics", "Furniture", "Garden"];

fn arb_price() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..100_000).prop_map(Value::from),
        (0.0f64..100_000.0).prop_map(Value::from),
        Just(json!("n/a")),
        Just(Value::Null),
    ]
}

fn arb_product() -> impl Strategy<Value = Value> {
    (
        0usize..CATEGORIES.len(),
        arb_price(),
        0i64..500,
        prop::collection::vec(1i64..=5, 0..4),
        any::<bool>(),
    )
        .prop_map(|(category, price, stock, ratings, has_stock)| {
            let mut doc = json!({
                "name": format!("item-{}", stock),
                "category": CATEGORIES[category],
                "price": price,
                "reviews": ratings.iter().map(|r| json!({"rating": r})).collect::<Vec<_>>()
            });
            if has_stock {
                doc["stock"] = json!(stock);
            }
            doc
        })
}

fn arb_rating() -> impl Strategy<Value = Value> {
    prop_oneof![
        (1i64..=5).prop_map(Value::from),
        (1.0f64..=5.0).prop_map(Value::from),
    ]
}

/// Products with distinct ids and at least one numeric rating each
fn arb_rated_products() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(prop::collection::vec(arb_rating(), 1..6), 0..12).prop_map(|rating_sets| {
        rating_sets
            .into_iter()
            .enumerate()
            .map(|(i, ratings)| {
                json!({
                    "product_id": format!("P{}", i),
                    "reviews": ratings.into_iter().map(|r| json!({"rating": r})).collect::<Vec<_>>()
                })
            })
            .collect()
    })
}

fn collection_of(products: Vec<Value>) -> Collection {
    let collection = Collection::new("products", IdStrategy::AutoIncrement);
    collection.insert_many(products).unwrap();
    collection
}

proptest! {
    #[test]
    fn prop_inclusion_projection_returns_only_named_fields(products in prop::collection::vec(arb_product(), 0..20)) {
        let collection = collection_of(products);
        for doc in collection.find(&Value::Null, &json!({"price": 1, "name": 1})).unwrap() {
            let obj = doc.as_object().unwrap();
            prop_assert!(obj.contains_key("_id"));
            prop_assert!(!obj.contains_key("stock"));
            prop_assert!(!obj.contains_key("category"));
            prop_assert!(!obj.contains_key("reviews"));
            prop_assert!(obj.keys().all(|k| ["_id", "price", "name"].contains(&k.as_str())));
        }
    }

    #[test]
    fn prop_group_average_matches_manual_mean(products in prop::collection::vec(arb_product(), 0..30)) {
        let collection = collection_of(products.clone());
        let out = collection
            .aggregate(&json!([{"$group": {"_id": "$category", "avg_price": {"$avg": "$price"}}}]))
            .unwrap();

        for group in out {
            let category = group["_id"].as_str().unwrap();
            let prices: Vec<f64> = products
                .iter()
                .filter(|p| p["category"] == category)
                .filter_map(|p| p["price"].as_f64())
                .collect();
            if prices.is_empty() {
                prop_assert_eq!(&group["avg_price"], &Value::Null);
            } else {
                let expected = prices.iter().sum::<f64>() / prices.len() as f64;
                let actual = group["avg_price"].as_f64().unwrap();
                prop_assert!((actual - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn prop_review_average_per_product_matches_manual_mean(products in arb_rated_products()) {
        let collection = collection_of(products.clone());
        let out = collection
            .aggregate(&json!([
                {"$unwind": "$reviews"},
                {"$group": {"_id": "$product_id", "avg_rating": {"$avg": "$reviews.rating"}}}
            ]))
            .unwrap();
        prop_assert_eq!(out.len(), products.len());

        for group in out {
            let product = products
                .iter()
                .find(|p| p["product_id"] == group["_id"])
                .unwrap();
            let ratings: Vec<f64> = product["reviews"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["rating"].as_f64().unwrap())
                .collect();
            let expected = ratings.iter().sum::<f64>() / ratings.len() as f64;
            let actual = group["avg_rating"].as_f64().unwrap();
            prop_assert!((actual - expected).abs() <= 1e-9);
        }
    }

    #[test]
    fn prop_sort_descending_is_non_increasing(products in prop::collection::vec(arb_product(), 0..30)) {
        let collection = collection_of(products);
        let pipeline = Pipeline::from_json(&json!([
            {"$group": {"_id": "$category", "avg_price": {"$avg": "$price"}}},
            {"$match": {"avg_price": {"$gte": 0}}},
            {"$sort": {"avg_price": -1}}
        ]))
        .unwrap();
        let out = collection.aggregate_with(&pipeline);
        let averages: Vec<f64> = out.iter().map(|d| d["avg_price"].as_f64().unwrap()).collect();
        prop_assert!(averages.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn prop_unwind_emits_one_document_per_review(products in prop::collection::vec(arb_product(), 0..20)) {
        let expected: usize = products
            .iter()
            .map(|p| p["reviews"].as_array().map_or(0, Vec::len))
            .sum();
        let collection = collection_of(products);
        let out = collection.aggregate(&json!([{"$unwind": "$reviews"}])).unwrap();
        prop_assert_eq!(out.len(), expected);
        prop_assert!(out.iter().all(|d| d["reviews"].is_object()));
    }
}
