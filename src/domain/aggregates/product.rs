//! Catalog products as served by the backend

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub price: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub brand: Option<Brand>,
    #[serde(default)]
    pub images: Vec<ProductImage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct Category { pub id: i64, pub name: String, pub slug: String }
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct Brand { pub id: i64, pub name: String, pub slug: String }
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct ProductImage { pub id: i64, pub image: String, #[serde(default)] pub alt_text: String }

impl Product {
    pub fn price(&self) -> Money { Money::parse_lenient(&self.price) }
    pub fn first_image(&self) -> Option<&str> { self.images.first().map(|i| i.image.as_str()) }
}
