pub mod health;
pub mod messages;
pub mod nodes;
pub mod recommendations;
pub mod sessions;

use serde::Deserialize;

/// Common pagination query (`?skip=&limit=`).
#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    50
}
