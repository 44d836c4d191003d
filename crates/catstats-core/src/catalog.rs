//! Built-in catalog for the item and cat domains

use crate::schema::{EntityBinding, FieldBinding, NavigationBinding, RelationKind, SchemaRegistry};
use crate::value::FieldType;

pub const ITEM: &str = "Item";
pub const ASSOCIATION: &str = "Association";
pub const ITEM_STATS: &str = "ItemStats";
pub const CAT: &str = "Cat";
pub const CAT_STATS: &str = "CatStats";
pub const OWNER: &str = "Owner";

impl SchemaRegistry {
    /// Registry with the built-in item/cat catalog
    pub fn builtin() -> Self {
        let mut registry = SchemaRegistry::default();
        for entity in [item(), association(), item_stats(), cat(), cat_stats(), owner()] {
            registry.insert_unchecked(entity);
        }
        registry
    }
}

fn nav(
    name: &str,
    target: &str,
    collection: bool,
    left_key: &str,
    right_key: &str,
    kind: RelationKind,
) -> NavigationBinding {
    NavigationBinding {
        name: name.to_string(),
        target: target.to_string(),
        collection,
        left_key: left_key.to_string(),
        right_key: right_key.to_string(),
        kind,
    }
}

fn id_field() -> FieldBinding {
    FieldBinding::new("id", "id", FieldType::String)
        .with_filter()
        .with_sort()
}

fn item() -> EntityBinding {
    EntityBinding {
        name: ITEM.to_string(),
        table: "item".to_string(),
        identity: "id".to_string(),
        fields: vec![
            id_field(),
            FieldBinding::new("name", "name", FieldType::String)
                .with_filter()
                .with_sort(),
            FieldBinding::new("itemType", "item_type", FieldType::String)
                .with_filter()
                .with_sort()
                .with_group(),
            FieldBinding::new("price", "price", FieldType::Double)
                .with_filter()
                .with_sort(),
            FieldBinding::new("quantity", "quantity", FieldType::Int32)
                .with_filter()
                .with_sort()
                .with_group(),
            FieldBinding::new("inStock", "in_stock", FieldType::Bool)
                .with_filter()
                .with_group(),
            FieldBinding::new("createdAt", "created_at", FieldType::Timestamp)
                .with_filter()
                .with_sort(),
        ],
        navigations: vec![
            nav(
                "associations",
                ASSOCIATION,
                true,
                "id",
                "itemId",
                RelationKind::Association,
            ),
            nav("stats", ITEM_STATS, true, "id", "itemId", RelationKind::Metrics),
        ],
        timestamp_field: None,
    }
}

fn association() -> EntityBinding {
    EntityBinding {
        name: ASSOCIATION.to_string(),
        table: "association".to_string(),
        identity: "id".to_string(),
        fields: vec![
            id_field(),
            FieldBinding::new("itemId", "item_id", FieldType::String).with_filter(),
            FieldBinding::new("targetId", "target_id", FieldType::String).with_filter(),
            FieldBinding::new("kind", "kind", FieldType::String)
                .with_filter()
                .with_sort()
                .with_group(),
            FieldBinding::new("weight", "weight", FieldType::Double)
                .with_filter()
                .with_sort(),
        ],
        navigations: vec![],
        timestamp_field: None,
    }
}

fn item_stats() -> EntityBinding {
    EntityBinding {
        name: ITEM_STATS.to_string(),
        table: "item_stats".to_string(),
        identity: "itemId".to_string(),
        fields: vec![
            FieldBinding::new("itemId", "item_id", FieldType::String).with_filter(),
            FieldBinding::new("viewCount", "view_count", FieldType::Double).as_metric(),
            FieldBinding::new("salesCount", "sales_count", FieldType::Double).as_metric(),
            FieldBinding::new("stockLevel", "stock_level", FieldType::Double).as_metric(),
            FieldBinding::new("timestamp", "timestamp", FieldType::Timestamp)
                .with_filter()
                .with_sort(),
        ],
        navigations: vec![],
        timestamp_field: Some("timestamp".to_string()),
    }
}

fn cat() -> EntityBinding {
    EntityBinding {
        name: CAT.to_string(),
        table: "cat".to_string(),
        identity: "id".to_string(),
        fields: vec![
            id_field(),
            FieldBinding::new("name", "name", FieldType::String)
                .with_filter()
                .with_sort(),
            FieldBinding::new("breed", "breed", FieldType::String)
                .with_filter()
                .with_sort()
                .with_group(),
            FieldBinding::new("age", "age", FieldType::Int32)
                .with_filter()
                .with_sort()
                .with_group(),
            FieldBinding::new("weight", "weight", FieldType::Double)
                .with_filter()
                .with_sort(),
            FieldBinding::new("ownerId", "owner_id", FieldType::String).with_filter(),
            FieldBinding::new("indoor", "indoor", FieldType::Bool)
                .with_filter()
                .with_group(),
        ],
        navigations: vec![
            nav("stats", CAT_STATS, true, "id", "catId", RelationKind::Metrics),
            nav(
                "owner",
                OWNER,
                false,
                "ownerId",
                "id",
                RelationKind::Association,
            ),
        ],
        timestamp_field: None,
    }
}

fn cat_stats() -> EntityBinding {
    EntityBinding {
        name: CAT_STATS.to_string(),
        table: "cat_stats".to_string(),
        identity: "catId".to_string(),
        fields: vec![
            FieldBinding::new("catId", "cat_id", FieldType::String).with_filter(),
            FieldBinding::new("heartRate", "heart_rate", FieldType::Double).as_metric(),
            FieldBinding::new("bodyTemperature", "body_temperature", FieldType::Double)
                .as_metric(),
            FieldBinding::new("activityLevel", "activity_level", FieldType::Double).as_metric(),
            FieldBinding::new("timestamp", "timestamp", FieldType::Timestamp)
                .with_filter()
                .with_sort(),
        ],
        navigations: vec![],
        timestamp_field: Some("timestamp".to_string()),
    }
}

fn owner() -> EntityBinding {
    EntityBinding {
        name: OWNER.to_string(),
        table: "owner".to_string(),
        identity: "id".to_string(),
        fields: vec![
            id_field(),
            FieldBinding::new("name", "name", FieldType::String)
                .with_filter()
                .with_sort(),
            FieldBinding::new("email", "email", FieldType::String).with_filter(),
            FieldBinding::new("city", "city", FieldType::String)
                .with_filter()
                .with_sort()
                .with_group(),
        ],
        navigations: vec![],
        timestamp_field: None,
    }
}
