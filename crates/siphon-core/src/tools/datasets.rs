//! Built-in dataset catalog feeding the grouped tools

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::group::{DatasetDescriptor, TaskExecutor};

/// (id, group, site, task description, cost)
const CATALOG: &[(&str, &str, &str, &str, u32)] = &[
    ("amazon_product", "e_commerce", "amazon", "Get data for a single product.", 50),
    ("amazon_product_reviews", "e_commerce", "amazon", "Get reviews for a product.", 50),
    ("walmart_product", "e_commerce", "walmart", "Get data from a Walmart product page.", 50),
    ("ebay_product", "e_commerce", "ebay", "Get data from an eBay product page.", 50),
    ("linkedin_person_profile", "social_professional", "linkedin", "Get data from a LinkedIn user profile.", 75),
    ("linkedin_company_profile", "social_professional", "linkedin", "Get data from a LinkedIn company profile.", 75),
    ("instagram_posts", "social_professional", "instagram", "Get data for an Instagram post.", 40),
    ("facebook_posts", "social_professional", "facebook", "Get data for a Facebook post.", 40),
    ("tiktok_posts", "social_professional", "tiktok", "Get data for a TikTok post.", 40),
    ("x_posts", "social_professional", "x", "Get data for an X (Twitter) post.", 40),
    ("youtube_videos", "social_professional", "youtube", "Get data for a YouTube video.", 40),
    ("Maps_reviews", "business_data", "Maps", "Get reviews for a business from Google Maps.", 60),
    ("crunchbase_company", "business_data", "crunchbase", "Get structured data for a company from Crunchbase.", 60),
    ("yahoo_finance_business", "business_data", "yahoo_finance", "Get structured financial data for a business from Yahoo Finance.", 60),
];

/// Every dataset shipped with the server. All of them take a single `url`.
pub fn catalog() -> Vec<DatasetDescriptor> {
    CATALOG
        .iter()
        .map(|&(id, group, site, task_desc, cost)| {
            DatasetDescriptor::new(id, group, site, task_desc, cost)
        })
        .collect()
}

/// Executor for one catalog dataset.
///
/// Reports the collection it would start; it does not call a dataset API.
/// Collection trigger and snapshot polling are left to the dataset service.
pub struct DatasetTask {
    dataset_id: String,
}

impl DatasetTask {
    pub fn new(dataset: &DatasetDescriptor) -> Self {
        Self {
            dataset_id: dataset.id.clone(),
        }
    }
}

#[async_trait]
impl TaskExecutor for DatasetTask {
    async fn run(&self, input: Value) -> Result<String> {
        debug!("Dataset request: {} {}", self.dataset_id, input);
        Ok(format!("Data for {} with args {}", self.dataset_id, input))
    }
}

/// Executor factory used by the standard registry
pub fn executor_for(dataset: &DatasetDescriptor) -> Arc<dyn TaskExecutor> {
    Arc::new(DatasetTask::new(dataset))
}
